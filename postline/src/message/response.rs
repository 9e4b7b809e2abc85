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

use crate::message::{ComponentId, Header, Identifier, SmartPayload};

/// Everything needed to answer one received request.
///
/// Handed to action handlers; pass it to
/// [`Communication::send_response`](crate::common::Communication::send_response)
/// or
/// [`Communication::send_negative_response`](crate::common::Communication::send_negative_response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseHandle {
    source: ComponentId,
    packet_identifier: Identifier,
}

impl ResponseHandle {
    /// Creates a handle answering `source` for `packet_identifier`.
    pub const fn new(source: ComponentId, packet_identifier: Identifier) -> Self {
        Self {
            source,
            packet_identifier,
        }
    }

    /// Component that sent the request.
    pub const fn source(&self) -> ComponentId {
        self.source
    }

    /// Identifier of the requested action.
    pub const fn packet_identifier(&self) -> Identifier {
        self.packet_identifier
    }
}

impl From<&Header> for ResponseHandle {
    fn from(header: &Header) -> Self {
        Self::new(header.source(), header.packet_identifier())
    }
}

/// How an action call with a callback ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The receiver answered with a response.
    Response(SmartPayload),
    /// The receiver answered with a negative response.
    NegativeResponse(SmartPayload),
    /// No answer arrived in time, or the request was never acknowledged.
    Timeout,
}

impl ResponseOutcome {
    /// The answer's payload, `None` on timeout.
    pub fn payload(&self) -> Option<&SmartPayload> {
        match self {
            Self::Response(payload) | Self::NegativeResponse(payload) => Some(payload),
            Self::Timeout => None,
        }
    }

    /// Whether the receiver answered positively.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Whether no answer arrived.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
