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

use std::time::Instant;

use tracing::{trace, warn};

use crate::common::response_tracker::PendingAcknowledge;
use crate::common::{DispatcherConfig, DispatcherStats, ResponseCallback, ResponseTracker};
use crate::message::{
    CommunicationError, ComponentId, Header, HeaderType, Identifier, ResponseHandle,
    ResponseOutcome, SmartPayload, BROADCAST,
};
use crate::traits::Backend;

/// Sending side of a dispatcher, borrowed for the duration of one call.
///
/// Postmen receive an `Outbox` so the handlers they invoke can answer and
/// send new requests through the same backend and tracker as the dispatcher.
pub struct Outbox<'a> {
    backend: &'a mut dyn Backend,
    tracker: &'a mut ResponseTracker,
    config: &'a DispatcherConfig,
    stats: &'a DispatcherStats,
    now: Instant,
}

impl<'a> Outbox<'a> {
    pub(crate) fn new(
        backend: &'a mut dyn Backend,
        tracker: &'a mut ResponseTracker,
        config: &'a DispatcherConfig,
        stats: &'a DispatcherStats,
        now: Instant,
    ) -> Self {
        Self {
            backend,
            tracker,
            config,
            stats,
            now,
        }
    }

    /// A [`Communication`] sending on behalf of `component`.
    pub fn communication(&mut self, component: ComponentId) -> Communication<'_> {
        Communication::new(component, self.reborrow())
    }

    fn reborrow(&mut self) -> Outbox<'_> {
        Outbox {
            backend: &mut *self.backend,
            tracker: &mut *self.tracker,
            config: self.config,
            stats: self.stats,
            now: self.now,
        }
    }

    pub(crate) fn transmit(
        &mut self,
        header: Header,
        payload: SmartPayload,
    ) -> Result<(), CommunicationError> {
        if let Err(e) = self.backend.send_packet(&header, &payload) {
            self.stats.record_send_failure();
            warn!(header = %header, error = %e, "Failed to send packet");
            return Err(e);
        }
        self.stats.record_sent();
        trace!(header = %header, len = payload.len(), "Packet sent");

        if self.config.acknowledge && header.requires_acknowledge() {
            self.tracker.expect_acknowledge(PendingAcknowledge {
                header,
                payload,
                deadline: self.now + self.config.acknowledge_timeout(),
                retransmissions: 0,
            });
        }
        Ok(())
    }

    pub(crate) fn retransmit(&mut self, mut entry: PendingAcknowledge) {
        match self.backend.send_packet(&entry.header, &entry.payload) {
            Ok(()) => self.stats.record_retransmission(),
            Err(e) => {
                self.stats.record_send_failure();
                warn!(header = %entry.header, error = %e, "Failed to retransmit packet");
            }
        }
        entry.retransmissions += 1;
        entry.deadline = self.now + self.config.acknowledge_timeout();
        self.tracker.expect_acknowledge(entry);
    }

    /// Answers a received directed header with an acknowledge.
    pub(crate) fn send_acknowledge(&mut self, received: &Header) {
        let ack = received.acknowledge();
        match self.backend.send_packet(&ack, &SmartPayload::empty()) {
            Ok(()) => {
                self.stats.record_acknowledge_sent();
                trace!(header = %ack, "Acknowledge sent");
            }
            Err(e) => {
                self.stats.record_send_failure();
                warn!(header = %ack, error = %e, "Failed to send acknowledge");
            }
        }
    }

    fn expect_response(
        &mut self,
        requester: ComponentId,
        responder: ComponentId,
        identifier: Identifier,
        callback: ResponseCallback,
    ) {
        let deadline = self.now + self.config.response_timeout();
        self.tracker
            .expect_response(requester, responder, identifier, deadline, callback);
    }
}

/// The API a component uses to talk to other components.
///
/// Bound to one component id, which becomes the source of everything sent
/// through it. None of the operations block; they hand the packet to the
/// backend and return.
///
/// ```rust,ignore
/// let mut comm = dispatcher.communication(SENDER);
/// comm.call_action_with_callback(RECEIVER, SET_POSITION, &position, |comm, outcome| {
///     if outcome.is_response() {
///         let _ = comm.publish_event(POSITION_REACHED, ());
///     }
/// })?;
/// ```
pub struct Communication<'a> {
    component: ComponentId,
    outbox: Outbox<'a>,
}

impl<'a> Communication<'a> {
    pub(crate) fn new(component: ComponentId, outbox: Outbox<'a>) -> Self {
        Self { component, outbox }
    }

    /// The component this facade sends for.
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Calls `action` on `receiver` without waiting for an answer.
    ///
    /// # Errors
    ///
    /// [`CommunicationError::InvalidDestination`] if `receiver` is the broadcast
    /// address, or the backend's error if the packet cannot be queued.
    pub fn call_action(
        &mut self,
        receiver: ComponentId,
        action: Identifier,
        data: impl Into<SmartPayload>,
    ) -> Result<(), CommunicationError> {
        if receiver == BROADCAST {
            return Err(CommunicationError::InvalidDestination);
        }
        let header = Header::request(receiver, self.component, action);
        self.outbox.transmit(header, data.into())
    }

    /// Calls `action` on `receiver` and runs `callback` with the answer.
    ///
    /// The callback runs exactly once: with the response, the negative
    /// response, or [`ResponseOutcome::Timeout`] once the configured response
    /// timeout has passed. Nothing is registered if sending fails.
    ///
    /// # Errors
    ///
    /// Same as [`call_action`](Self::call_action).
    pub fn call_action_with_callback<F>(
        &mut self,
        receiver: ComponentId,
        action: Identifier,
        data: impl Into<SmartPayload>,
        callback: F,
    ) -> Result<(), CommunicationError>
    where
        F: FnOnce(&mut Communication<'_>, ResponseOutcome) + Send + 'static,
    {
        self.call_action(receiver, action, data)?;
        self.outbox
            .expect_response(self.component, receiver, action, Box::new(callback));
        Ok(())
    }

    /// Answers the request behind `handle` positively.
    ///
    /// # Errors
    ///
    /// The backend's error if the packet cannot be queued.
    pub fn send_response(
        &mut self,
        handle: &ResponseHandle,
        data: impl Into<SmartPayload>,
    ) -> Result<(), CommunicationError> {
        self.answer(HeaderType::Response, handle, data.into())
    }

    /// Answers the request behind `handle` negatively.
    ///
    /// # Errors
    ///
    /// The backend's error if the packet cannot be queued.
    pub fn send_negative_response(
        &mut self,
        handle: &ResponseHandle,
        data: impl Into<SmartPayload>,
    ) -> Result<(), CommunicationError> {
        self.answer(HeaderType::NegativeResponse, handle, data.into())
    }

    /// Publishes `event` to every subscriber.
    ///
    /// # Errors
    ///
    /// The backend's error if the packet cannot be queued.
    pub fn publish_event(
        &mut self,
        event: Identifier,
        data: impl Into<SmartPayload>,
    ) -> Result<(), CommunicationError> {
        self.outbox
            .transmit(Header::event(self.component, event), data.into())
    }

    fn answer(
        &mut self,
        kind: HeaderType,
        handle: &ResponseHandle,
        payload: SmartPayload,
    ) -> Result<(), CommunicationError> {
        let header = Header::new(
            kind,
            false,
            handle.source(),
            self.component,
            handle.packet_identifier(),
        );
        self.outbox.transmit(header, payload)
    }
}
