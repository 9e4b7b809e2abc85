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

use crate::common::Outbox;
use crate::message::{ComponentId, Header, HeaderType, Identifier, SmartPayload};

/// What a [`Postman`] knows about a (component, identifier, type) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// A handler is bound for the action.
    ActionAvailable,
    /// At least one component subscribes to the event.
    EventAvailable,
    /// The component is local but has nothing bound for the identifier.
    NotAvailable,
    /// The component is not hosted here.
    ComponentNotAvailable,
}

/// Result of handing one packet to a [`Postman`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The packet was handed to `handlers` handlers.
    Delivered {
        /// Number of handlers invoked. Always 1 for directed packets.
        handlers: usize,
    },
    /// The destination component is not hosted here.
    ComponentNotAvailable,
    /// The component is hosted here but nothing is bound for the identifier.
    NotAvailable,
    /// The payload size does not match the handler's declared type.
    PayloadMismatch {
        /// Size of the declared type.
        expected: usize,
        /// Size of the received payload.
        actual: usize,
    },
}

impl DeliveryStatus {
    /// Whether at least one handler ran.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { handlers } if *handlers > 0)
    }
}

/// Routes received packets to the handlers of local components.
///
/// Handlers run inline on the dispatcher's thread of control and must not
/// block. A missing route is reported through [`DeliveryStatus`] and is never
/// fatal.
pub trait Postman {
    /// Delivers one packet. `outbox` lets handlers send answers and new requests.
    fn deliver_packet(
        &mut self,
        header: &Header,
        payload: &SmartPayload,
        outbox: &mut Outbox<'_>,
    ) -> DeliveryStatus;

    /// Whether `component` is hosted by this postman.
    fn is_component_available(&self, component: ComponentId) -> bool;

    /// Classifies a destination without delivering anything.
    fn availability(
        &self,
        destination: ComponentId,
        identifier: Identifier,
        kind: HeaderType,
    ) -> Availability;
}
