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

use crate::common::Communication;
use crate::message::{ComponentId, Header, Identifier, ResponseOutcome, SmartPayload};

/// Callback invoked once with the outcome of an action call.
///
/// It receives a [`Communication`] bound to the component that made the call,
/// so it can send follow-up requests.
pub type ResponseCallback = Box<dyn FnOnce(&mut Communication<'_>, ResponseOutcome) + Send>;

pub(crate) struct PendingResponse {
    pub(crate) requester: ComponentId,
    pub(crate) responder: ComponentId,
    pub(crate) identifier: Identifier,
    pub(crate) deadline: Instant,
    pub(crate) callback: ResponseCallback,
}

pub(crate) struct PendingAcknowledge {
    pub(crate) header: Header,
    pub(crate) payload: SmartPayload,
    pub(crate) deadline: Instant,
    pub(crate) retransmissions: u32,
}

/// Outstanding response callbacks and unacknowledged packets of one dispatcher.
///
/// Entries are kept in registration order, so several calls to the same
/// action are answered first-in first-out.
#[derive(Default)]
pub struct ResponseTracker {
    responses: Vec<PendingResponse>,
    acknowledges: Vec<PendingAcknowledge>,
}

impl ResponseTracker {
    pub(crate) fn expect_response(
        &mut self,
        requester: ComponentId,
        responder: ComponentId,
        identifier: Identifier,
        deadline: Instant,
        callback: ResponseCallback,
    ) {
        self.responses.push(PendingResponse {
            requester,
            responder,
            identifier,
            deadline,
            callback,
        });
    }

    /// Removes the oldest callback waiting for the answer carried by `header`.
    pub(crate) fn take_response(&mut self, header: &Header) -> Option<PendingResponse> {
        let index = self.responses.iter().position(|pending| {
            pending.requester == header.destination()
                && pending.responder == header.source()
                && pending.identifier == header.packet_identifier()
        })?;
        Some(self.responses.remove(index))
    }

    /// Removes every callback waiting on the request described by `request`.
    pub(crate) fn take_responses_to(&mut self, request: &Header) -> Vec<PendingResponse> {
        let (failed, kept) = std::mem::take(&mut self.responses)
            .into_iter()
            .partition(|pending| {
                pending.requester == request.source()
                    && pending.responder == request.destination()
                    && pending.identifier == request.packet_identifier()
            });
        self.responses = kept;
        failed
    }

    pub(crate) fn expired_responses(&mut self, now: Instant) -> Vec<PendingResponse> {
        let (expired, kept) = std::mem::take(&mut self.responses)
            .into_iter()
            .partition(|pending| pending.deadline <= now);
        self.responses = kept;
        expired
    }

    pub(crate) fn expect_acknowledge(&mut self, entry: PendingAcknowledge) {
        self.acknowledges.push(entry);
    }

    /// Resolves the oldest packet acknowledged by `ack`.
    pub(crate) fn acknowledge(&mut self, ack: &Header) -> bool {
        match self
            .acknowledges
            .iter()
            .position(|pending| pending.header.is_acknowledged_by(ack))
        {
            Some(index) => {
                self.acknowledges.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn expired_acknowledges(&mut self, now: Instant) -> Vec<PendingAcknowledge> {
        let (expired, kept) = std::mem::take(&mut self.acknowledges)
            .into_iter()
            .partition(|pending| pending.deadline <= now);
        self.acknowledges = kept;
        expired
    }

    /// Number of callbacks still waiting for an answer.
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    /// Number of sent packets still waiting for an acknowledge.
    pub fn pending_acknowledges(&self) -> usize {
        self.acknowledges.len()
    }
}
