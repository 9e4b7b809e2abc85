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

use std::fmt;

use crate::message::CommunicationError;

/// Errors of the TCP/IP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer closed the connection, possibly in the middle of a frame.
    ConnectionClosed,

    /// A frame violated the wire format.
    ProtocolError(String),

    /// A payload larger than the frame limit.
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Largest payload allowed.
        max: usize,
    },

    /// Socket or I/O error.
    IoError(String),

    /// A connection attempt did not finish in time.
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::ProtocolError(e) => write!(f, "Protocol error: {e}"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "Payload of {size} bytes exceeds the frame limit of {max} bytes")
            }
            Self::IoError(e) => write!(f, "I/O error: {e}"),
            Self::Timeout => write!(f, "Connection attempt timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::IoError(err.to_string())
        }
    }
}

impl From<TransportError> for CommunicationError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            TransportError::ConnectionClosed => Self::Disconnected,
            other => Self::Transport(other.to_string()),
        }
    }
}
