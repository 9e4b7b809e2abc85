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

//! Packet model: headers, payloads and the types used to correlate answers.

pub use communication_error::CommunicationError;
pub use envelope::Message;
pub use header::{ComponentId, Header, HeaderType, Identifier, BROADCAST};
pub(crate) use header::RawHeader;
pub use payload::SmartPayload;
pub use response::{ResponseHandle, ResponseOutcome};

/// Defines [`CommunicationError`].
mod communication_error;
/// Defines [`Message`].
mod envelope;
/// Defines [`Header`] and its wire layout.
mod header;
/// Defines [`SmartPayload`].
mod payload;
/// Defines [`ResponseHandle`] and [`ResponseOutcome`].
mod response;
