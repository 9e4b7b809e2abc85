/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::debug;
use zerocopy::FromBytes;

use crate::common::{Communication, Outbox};
use crate::message::{
    ComponentId, Header, HeaderType, Identifier, ResponseHandle, SmartPayload, BROADCAST,
};
use crate::traits::{Availability, DeliveryStatus, Postman};

type ActionHandler = Box<
    dyn FnMut(&mut Communication<'_>, ResponseHandle, &SmartPayload) -> Result<(), DeliveryStatus>
        + Send,
>;

type HeaderHandler = Box<
    dyn FnMut(&mut Communication<'_>, &Header, &SmartPayload) -> Result<(), DeliveryStatus> + Send,
>;

fn action_handler<F>(handler: F) -> ActionHandler
where
    F: FnMut(&mut Communication<'_>, ResponseHandle, &SmartPayload) -> Result<(), DeliveryStatus>
        + Send
        + 'static,
{
    Box::new(handler)
}

fn header_handler<F>(handler: F) -> HeaderHandler
where
    F: FnMut(&mut Communication<'_>, &Header, &SmartPayload) -> Result<(), DeliveryStatus>
        + Send
        + 'static,
{
    Box::new(handler)
}

fn decode<T: FromBytes>(payload: &SmartPayload) -> Result<T, DeliveryStatus> {
    payload.read::<T>().ok_or(DeliveryStatus::PayloadMismatch {
        expected: std::mem::size_of::<T>(),
        actual: payload.len(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RouteKey {
    component: ComponentId,
    identifier: Identifier,
    kind: HeaderType,
}

enum Route {
    Action(ActionHandler),
    Answer(HeaderHandler),
}

struct Subscription {
    component: ComponentId,
    handler: HeaderHandler,
}

/// The [`Postman`] used by applications: a table from
/// (component, identifier, header type) to handler.
///
/// Built once with [`RoutingTable::builder`] and read-only afterwards.
///
/// ```rust,ignore
/// let table = RoutingTable::builder()
///     .component(SENDER)
///     .action(RECEIVER, SET_POSITION, |comm, handle, position: &Position| {
///         let _ = comm.send_response(&handle, position);
///     })
///     .event(SENDER, POSITION_REACHED, |_comm, _header, position: &Position| {
///         tracing::info!(?position, "reached");
///     })
///     .build();
/// ```
pub struct RoutingTable {
    components: BTreeSet<ComponentId>,
    routes: HashMap<RouteKey, Route>,
    events: HashMap<Identifier, Vec<Subscription>>,
}

impl RoutingTable {
    /// Starts an empty table.
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder {
            table: Self {
                components: BTreeSet::new(),
                routes: HashMap::new(),
                events: HashMap::new(),
            },
        }
    }

    /// Components hosted by this table, in ascending order.
    pub fn components(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.iter().copied()
    }

    /// Whether `component` subscribes to `event`.
    pub fn is_subscribed(&self, component: ComponentId, event: Identifier) -> bool {
        self.events
            .get(&event)
            .is_some_and(|subs| subs.iter().any(|sub| sub.component == component))
    }

    fn deliver_event(
        &mut self,
        header: &Header,
        payload: &SmartPayload,
        outbox: &mut Outbox<'_>,
    ) -> DeliveryStatus {
        let Some(subscriptions) = self.events.get_mut(&header.packet_identifier()) else {
            return DeliveryStatus::NotAvailable;
        };

        let mut handlers = 0;
        let mut rejected = None;
        for subscription in subscriptions.iter_mut() {
            let mut comm = outbox.communication(subscription.component);
            match (subscription.handler)(&mut comm, header, payload) {
                Ok(()) => handlers += 1,
                Err(status) => {
                    debug!(
                        component = subscription.component,
                        header = %header,
                        ?status,
                        "Subscriber rejected event payload"
                    );
                    rejected = Some(status);
                }
            }
        }

        match (handlers, rejected) {
            (0, Some(status)) => status,
            (0, None) => DeliveryStatus::NotAvailable,
            (handlers, _) => DeliveryStatus::Delivered { handlers },
        }
    }
}

impl Postman for RoutingTable {
    fn deliver_packet(
        &mut self,
        header: &Header,
        payload: &SmartPayload,
        outbox: &mut Outbox<'_>,
    ) -> DeliveryStatus {
        if header.is_event() {
            return self.deliver_event(header, payload, outbox);
        }

        let destination = header.destination();
        if !self.components.contains(&destination) {
            return DeliveryStatus::ComponentNotAvailable;
        }

        let key = RouteKey {
            component: destination,
            identifier: header.packet_identifier(),
            kind: header.kind(),
        };
        let result = match self.routes.get_mut(&key) {
            None => return DeliveryStatus::NotAvailable,
            Some(Route::Action(handler)) => {
                handler(&mut outbox.communication(destination), header.into(), payload)
            }
            Some(Route::Answer(handler)) => {
                handler(&mut outbox.communication(destination), header, payload)
            }
        };

        match result {
            Ok(()) => DeliveryStatus::Delivered { handlers: 1 },
            Err(status) => status,
        }
    }

    fn is_component_available(&self, component: ComponentId) -> bool {
        self.components.contains(&component)
    }

    fn availability(
        &self,
        destination: ComponentId,
        identifier: Identifier,
        kind: HeaderType,
    ) -> Availability {
        if destination == BROADCAST {
            return if self.events.contains_key(&identifier) {
                Availability::EventAvailable
            } else {
                Availability::NotAvailable
            };
        }
        if !self.components.contains(&destination) {
            return Availability::ComponentNotAvailable;
        }
        let key = RouteKey {
            component: destination,
            identifier,
            kind,
        };
        match self.routes.get(&key) {
            Some(_) => Availability::ActionAvailable,
            None => Availability::NotAvailable,
        }
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("components", &self.components)
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`RoutingTable`].
///
/// Registering a handler also registers its component. Registering a second
/// action handler for the same triple replaces the first.
pub struct RoutingTableBuilder {
    table: RoutingTable,
}

impl RoutingTableBuilder {
    /// Hosts `component` here, even if nothing is bound to it yet.
    pub fn component(mut self, component: ComponentId) -> Self {
        self.table.components.insert(component);
        self
    }

    /// Binds `action` of `component` to a handler taking a typed payload.
    ///
    /// Requests whose payload is not exactly `size_of::<T>()` bytes are
    /// reported as [`DeliveryStatus::PayloadMismatch`] and not handed over.
    pub fn action<T, F>(self, component: ComponentId, action: Identifier, mut handler: F) -> Self
    where
        T: FromBytes + 'static,
        F: FnMut(&mut Communication<'_>, ResponseHandle, &T) + Send + 'static,
    {
        self.route(
            component,
            action,
            HeaderType::Request,
            Route::Action(action_handler(move |comm, handle, payload| {
                let value = decode::<T>(payload)?;
                handler(comm, handle, &value);
                Ok(())
            })),
        )
    }

    /// Binds `action` of `component` to a handler taking the raw payload.
    pub fn raw_action<F>(self, component: ComponentId, action: Identifier, mut handler: F) -> Self
    where
        F: FnMut(&mut Communication<'_>, ResponseHandle, &SmartPayload) + Send + 'static,
    {
        self.route(
            component,
            action,
            HeaderType::Request,
            Route::Action(action_handler(move |comm, handle, payload| {
                handler(comm, handle, payload);
                Ok(())
            })),
        )
    }

    /// Subscribes `component` to `event` with a typed payload.
    pub fn event<T, F>(self, component: ComponentId, event: Identifier, mut handler: F) -> Self
    where
        T: FromBytes + 'static,
        F: FnMut(&mut Communication<'_>, &Header, &T) + Send + 'static,
    {
        self.subscribe(
            component,
            event,
            header_handler(move |comm, header, payload| {
                let value = decode::<T>(payload)?;
                handler(comm, header, &value);
                Ok(())
            }),
        )
    }

    /// Subscribes `component` to `event` with the raw payload.
    pub fn raw_event<F>(self, component: ComponentId, event: Identifier, mut handler: F) -> Self
    where
        F: FnMut(&mut Communication<'_>, &Header, &SmartPayload) + Send + 'static,
    {
        self.subscribe(
            component,
            event,
            header_handler(move |comm, header, payload| {
                handler(comm, header, payload);
                Ok(())
            }),
        )
    }

    /// Binds answers of `kind` for `identifier` that arrive at `component`
    /// without a pending callback.
    ///
    /// `kind` is [`HeaderType::Response`] or [`HeaderType::NegativeResponse`];
    /// requests are bound with [`action`](Self::action).
    pub fn response<F>(
        self,
        component: ComponentId,
        identifier: Identifier,
        kind: HeaderType,
        mut handler: F,
    ) -> Self
    where
        F: FnMut(&mut Communication<'_>, &Header, &SmartPayload) + Send + 'static,
    {
        self.route(
            component,
            identifier,
            kind,
            Route::Answer(header_handler(move |comm, header, payload| {
                handler(comm, header, payload);
                Ok(())
            })),
        )
    }

    /// Finishes the table.
    pub fn build(self) -> RoutingTable {
        debug!(
            components = self.table.components.len(),
            routes = self.table.routes.len(),
            events = self.table.events.len(),
            "Routing table built"
        );
        self.table
    }

    fn route(
        mut self,
        component: ComponentId,
        identifier: Identifier,
        kind: HeaderType,
        route: Route,
    ) -> Self {
        self.table.components.insert(component);
        let key = RouteKey {
            component,
            identifier,
            kind,
        };
        if self.table.routes.insert(key, route).is_some() {
            debug!(component, identifier, %kind, "Replaced existing route");
        }
        self
    }

    fn subscribe(
        mut self,
        component: ComponentId,
        event: Identifier,
        handler: HeaderHandler,
    ) -> Self {
        self.table.components.insert(component);
        self.table
            .events
            .entry(event)
            .or_default()
            .push(Subscription { component, handler });
        self
    }
}
