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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::common::config::{DispatcherConfig, CONFIG};
use crate::common::response_tracker::PendingResponse;
use crate::common::{Communication, Outbox, ResponseTracker};
use crate::message::{ComponentId, Header, HeaderType, Message, ResponseOutcome, SmartPayload};
use crate::traits::{Backend, DeliveryStatus, Postman};

/// Counters kept by a [`Dispatcher`].
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Packets taken from the backend.
    pub packets_received: AtomicUsize,
    /// Packets handed to the backend.
    pub packets_sent: AtomicUsize,
    /// Packets the backend refused.
    pub send_failures: AtomicUsize,
    /// Packets delivered to at least one handler.
    pub delivered: AtomicUsize,
    /// Packets addressed to a component not hosted here.
    pub component_not_available: AtomicUsize,
    /// Packets for a hosted component with nothing bound to the identifier.
    pub not_available: AtomicUsize,
    /// Packets whose payload did not fit the handler's type.
    pub payload_mismatches: AtomicUsize,
    /// Answers matched to a waiting callback.
    pub responses_matched: AtomicUsize,
    /// Callbacks that ended with a timeout.
    pub timeouts: AtomicUsize,
    /// Acknowledge headers sent.
    pub acknowledges_sent: AtomicUsize,
    /// Acknowledge headers matched to a sent packet.
    pub acknowledges_received: AtomicUsize,
    /// Packets sent again after a missing acknowledge.
    pub retransmissions: AtomicUsize,
    /// Packets given up on after their last retransmission.
    pub unacknowledged: AtomicUsize,
}

impl DispatcherStats {
    /// Create new statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets taken from the backend.
    #[must_use]
    pub fn packets_received(&self) -> usize {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Packets handed to the backend.
    #[must_use]
    pub fn packets_sent(&self) -> usize {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Packets the backend refused.
    #[must_use]
    pub fn send_failures(&self) -> usize {
        self.send_failures.load(Ordering::Relaxed)
    }

    /// Packets delivered to at least one handler.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Packets addressed to a component not hosted here.
    #[must_use]
    pub fn component_not_available(&self) -> usize {
        self.component_not_available.load(Ordering::Relaxed)
    }

    /// Packets for a hosted component with nothing bound to the identifier.
    #[must_use]
    pub fn not_available(&self) -> usize {
        self.not_available.load(Ordering::Relaxed)
    }

    /// Packets whose payload did not fit the handler's type.
    #[must_use]
    pub fn payload_mismatches(&self) -> usize {
        self.payload_mismatches.load(Ordering::Relaxed)
    }

    /// Answers matched to a waiting callback.
    #[must_use]
    pub fn responses_matched(&self) -> usize {
        self.responses_matched.load(Ordering::Relaxed)
    }

    /// Callbacks that ended with a timeout.
    #[must_use]
    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Acknowledge headers sent.
    #[must_use]
    pub fn acknowledges_sent(&self) -> usize {
        self.acknowledges_sent.load(Ordering::Relaxed)
    }

    /// Acknowledge headers matched to a sent packet.
    #[must_use]
    pub fn acknowledges_received(&self) -> usize {
        self.acknowledges_received.load(Ordering::Relaxed)
    }

    /// Packets sent again after a missing acknowledge.
    #[must_use]
    pub fn retransmissions(&self) -> usize {
        self.retransmissions.load(Ordering::Relaxed)
    }

    /// Packets given up on after their last retransmission.
    #[must_use]
    pub fn unacknowledged(&self) -> usize {
        self.unacknowledged.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acknowledge_sent(&self) {
        self.acknowledges_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivery(&self, status: &DeliveryStatus) {
        let counter = match status {
            DeliveryStatus::Delivered { .. } => &self.delivered,
            DeliveryStatus::ComponentNotAvailable => &self.component_not_available,
            DeliveryStatus::NotAvailable => &self.not_available,
            DeliveryStatus::PayloadMismatch { .. } => &self.payload_mismatches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The cooperative event loop of one node.
///
/// Owns a [`Backend`] and a [`Postman`]. Each call to [`update`](Self::update)
/// drains every packet the backend has available, routes it, and then expires
/// timed-out response callbacks and unacknowledged packets. Nothing that
/// happens to a single packet stops the loop.
///
/// ```rust,ignore
/// let mut dispatcher = Dispatcher::new(LoopbackBackend::new(), table);
/// dispatcher.communication(SENDER).call_action(RECEIVER, PING, ())?;
/// loop {
///     dispatcher.update();
/// }
/// ```
pub struct Dispatcher<B, P> {
    backend: B,
    postman: P,
    tracker: ResponseTracker,
    config: DispatcherConfig,
    stats: Arc<DispatcherStats>,
}

impl<B: Backend, P: Postman> Dispatcher<B, P> {
    /// Creates a dispatcher configured from the global [`CONFIG`].
    pub fn new(backend: B, postman: P) -> Self {
        Self::with_config(backend, postman, CONFIG.dispatcher.clone())
    }

    /// Creates a dispatcher with an explicit configuration.
    pub fn with_config(backend: B, postman: P, config: DispatcherConfig) -> Self {
        Self {
            backend,
            postman,
            tracker: ResponseTracker::default(),
            config,
            stats: Arc::new(DispatcherStats::new()),
        }
    }

    /// A [`Communication`] sending on behalf of `component`.
    pub fn communication(&mut self, component: ComponentId) -> Communication<'_> {
        self.communication_at(component, Instant::now())
    }

    /// Like [`communication`](Self::communication), with deadlines measured from `now`.
    pub fn communication_at(&mut self, component: ComponentId, now: Instant) -> Communication<'_> {
        let outbox = Outbox::new(
            &mut self.backend,
            &mut self.tracker,
            &self.config,
            &self.stats,
            now,
        );
        Communication::new(component, outbox)
    }

    /// Runs one tick against the current time.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Runs one tick, treating `now` as the current time.
    pub fn update_at(&mut self, now: Instant) {
        self.backend.update();

        while self.backend.is_packet_available() {
            let Some(message) = self.backend.get_packet() else {
                break;
            };
            self.handle_packet(message, now);
        }

        self.expire(now);
    }

    fn handle_packet(&mut self, message: Message, now: Instant) {
        let (header, payload) = message.into_parts();
        self.stats.packets_received.fetch_add(1, Ordering::Relaxed);

        if header.is_acknowledge() {
            if self.tracker.acknowledge(&header) {
                self.stats.acknowledges_received.fetch_add(1, Ordering::Relaxed);
                trace!(header = %header, "Acknowledge received");
            } else {
                trace!(header = %header, "Acknowledge without pending packet");
            }
            return;
        }

        let pending = match header.kind() {
            HeaderType::Request => None,
            HeaderType::Response | HeaderType::NegativeResponse => {
                self.tracker.take_response(&header)
            }
        };

        let mut outbox = Outbox::new(
            &mut self.backend,
            &mut self.tracker,
            &self.config,
            &self.stats,
            now,
        );

        let delivered = if let Some(pending) = pending {
            self.stats.responses_matched.fetch_add(1, Ordering::Relaxed);
            debug!(header = %header, "Answer matched to pending callback");
            let outcome = match header.kind() {
                HeaderType::NegativeResponse => ResponseOutcome::NegativeResponse(payload),
                _ => ResponseOutcome::Response(payload),
            };
            (pending.callback)(&mut outbox.communication(pending.requester), outcome);
            true
        } else {
            let status = self.postman.deliver_packet(&header, &payload, &mut outbox);
            self.stats.record_delivery(&status);
            log_delivery(&header, &payload, &status);
            status.is_delivered()
        };

        if delivered && self.config.acknowledge && header.requires_acknowledge() {
            outbox.send_acknowledge(&header);
        }
    }

    fn expire(&mut self, now: Instant) {
        for entry in self.tracker.expired_acknowledges(now) {
            if entry.retransmissions < self.config.max_retransmissions {
                debug!(
                    header = %entry.header,
                    attempt = entry.retransmissions + 1,
                    "Retransmitting unacknowledged packet"
                );
                Outbox::new(
                    &mut self.backend,
                    &mut self.tracker,
                    &self.config,
                    &self.stats,
                    now,
                )
                .retransmit(entry);
                continue;
            }

            self.stats.unacknowledged.fetch_add(1, Ordering::Relaxed);
            warn!(header = %entry.header, "No acknowledge received, dropping packet");
            if entry.header.kind() == HeaderType::Request {
                for pending in self.tracker.take_responses_to(&entry.header) {
                    self.time_out(pending, now);
                }
            }
        }

        for pending in self.tracker.expired_responses(now) {
            self.time_out(pending, now);
        }
    }

    fn time_out(&mut self, pending: PendingResponse, now: Instant) {
        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
        debug!(
            requester = pending.requester,
            responder = pending.responder,
            identifier = pending.identifier,
            "Response timed out"
        );
        let mut outbox = Outbox::new(
            &mut self.backend,
            &mut self.tracker,
            &self.config,
            &self.stats,
            now,
        );
        (pending.callback)(
            &mut outbox.communication(pending.requester),
            ResponseOutcome::Timeout,
        );
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The postman.
    pub fn postman(&self) -> &P {
        &self.postman
    }

    /// The configuration in use.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Callbacks still waiting for an answer.
    pub fn pending_responses(&self) -> usize {
        self.tracker.pending_responses()
    }

    /// Sent packets still waiting for an acknowledge.
    pub fn pending_acknowledges(&self) -> usize {
        self.tracker.pending_acknowledges()
    }
}

fn log_delivery(header: &Header, payload: &SmartPayload, status: &DeliveryStatus) {
    match status {
        DeliveryStatus::Delivered { handlers } => {
            trace!(header = %header, len = payload.len(), handlers, "Packet delivered");
        }
        DeliveryStatus::ComponentNotAvailable => {
            trace!(header = %header, "Component not hosted here");
        }
        DeliveryStatus::NotAvailable => {
            debug!(header = %header, "No handler bound");
        }
        DeliveryStatus::PayloadMismatch { expected, actual } => {
            warn!(header = %header, expected, actual, "Payload does not match handler type");
        }
    }
}
