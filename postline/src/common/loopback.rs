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

//! In-process backend.
//!
//! A [`LoopbackBus`] connects any number of [`LoopbackBackend`] endpoints,
//! like nodes on a shared wire: every packet sent by any endpoint is queued
//! for every endpoint, the sender included. A single endpoint on its own bus
//! hands every sent packet back to its own dispatcher.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::message::{CommunicationError, Header, Message, SmartPayload};
use crate::traits::Backend;

type Inbox = Arc<Mutex<VecDeque<Message>>>;

/// A shared wire connecting [`LoopbackBackend`] endpoints.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    endpoints: Arc<Mutex<Vec<Weak<Mutex<VecDeque<Message>>>>>>,
}

impl LoopbackBus {
    /// Creates a bus with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new endpoint. It sees packets sent from now on.
    pub fn endpoint(&self) -> LoopbackBackend {
        let inbox = Inbox::default();
        self.endpoints.lock().push(Arc::downgrade(&inbox));
        LoopbackBackend {
            inbox,
            bus: self.clone(),
        }
    }

    /// Number of endpoints still attached.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints
            .lock()
            .iter()
            .filter(|endpoint| endpoint.strong_count() > 0)
            .count()
    }

    fn broadcast(&self, message: &Message) {
        let mut endpoints = self.endpoints.lock();
        endpoints.retain(|endpoint| match endpoint.upgrade() {
            Some(inbox) => {
                inbox.lock().push_back(message.clone());
                true
            }
            None => false,
        });
    }
}

/// One endpoint of a [`LoopbackBus`].
pub struct LoopbackBackend {
    inbox: Inbox,
    bus: LoopbackBus,
}

impl LoopbackBackend {
    /// An endpoint on a bus of its own.
    pub fn new() -> Self {
        LoopbackBus::new().endpoint()
    }

    /// The bus this endpoint is attached to.
    pub fn bus(&self) -> &LoopbackBus {
        &self.bus
    }

    /// Packets waiting to be taken.
    pub fn queued(&self) -> usize {
        self.inbox.lock().len()
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for LoopbackBackend {
    fn send_packet(
        &mut self,
        header: &Header,
        payload: &SmartPayload,
    ) -> Result<(), CommunicationError> {
        trace!(header = %header, "loopback send");
        self.bus.broadcast(&Message::new(*header, payload.clone()));
        Ok(())
    }

    fn is_packet_available(&self) -> bool {
        !self.inbox.lock().is_empty()
    }

    fn get_packet(&mut self) -> Option<Message> {
        self.inbox.lock().pop_front()
    }
}
