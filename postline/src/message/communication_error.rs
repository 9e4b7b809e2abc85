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
/// Errors returned by the communication facade and by backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunicationError {
    /// The payload does not fit into a single frame of the backend.
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Largest payload the backend accepts.
        max: usize,
    },
    /// The backend's outbound queue is full and the packet was not queued.
    QueueFull,
    /// The backend has shut down and accepts no more packets.
    Disconnected,
    /// A directed operation was given the broadcast address.
    InvalidDestination,
    /// A header could not be decoded.
    InvalidHeader(String),
    /// Any other transport failure.
    Transport(String),
}

impl std::fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PayloadTooLarge { size, max } => {
                write!(f, "Payload of {size} bytes exceeds the limit of {max} bytes")
            }
            Self::QueueFull => write!(f, "Outbound queue is full"),
            Self::Disconnected => write!(f, "Backend is disconnected"),
            Self::InvalidDestination => {
                write!(f, "Broadcast address used as a directed destination")
            }
            Self::InvalidHeader(msg) => write!(f, "Invalid header: {msg}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
        }
    }
}

impl std::error::Error for CommunicationError {}
