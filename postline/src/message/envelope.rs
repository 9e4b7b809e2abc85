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

use crate::message::{Header, SmartPayload};

/// A header together with its payload, as handed over by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    header: Header,
    payload: SmartPayload,
}

impl Message {
    /// Creates a message.
    pub fn new(header: Header, payload: SmartPayload) -> Self {
        Self { header, payload }
    }

    /// The routing header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The payload.
    pub fn payload(&self) -> &SmartPayload {
        &self.payload
    }

    /// Splits the message into header and payload.
    pub fn into_parts(self) -> (Header, SmartPayload) {
        (self.header, self.payload)
    }
}
