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

use crate::message::{CommunicationError, Header, Message, SmartPayload};

/// A transport that moves packets between dispatchers.
///
/// Backends never block the caller. [`send_packet`](Backend::send_packet) may
/// buffer, and delivery is not guaranteed. The [`Dispatcher`](crate::common::Dispatcher)
/// calls [`update`](Backend::update) once per tick and then drains every
/// available packet.
pub trait Backend {
    /// Hands a packet to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the packet cannot be queued at all, for example
    /// because the payload exceeds the transport's frame size.
    fn send_packet(&mut self, header: &Header, payload: &SmartPayload)
        -> Result<(), CommunicationError>;

    /// Whether [`get_packet`](Backend::get_packet) would return a packet.
    fn is_packet_available(&self) -> bool;

    /// Takes the oldest received packet.
    fn get_packet(&mut self) -> Option<Message>;

    /// Drives pending transport work. Called once per dispatcher tick.
    fn update(&mut self) {}
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn send_packet(
        &mut self,
        header: &Header,
        payload: &SmartPayload,
    ) -> Result<(), CommunicationError> {
        (**self).send_packet(header, payload)
    }

    fn is_packet_available(&self) -> bool {
        (**self).is_packet_available()
    }

    fn get_packet(&mut self) -> Option<Message> {
        (**self).get_packet()
    }

    fn update(&mut self) {
        (**self).update();
    }
}
