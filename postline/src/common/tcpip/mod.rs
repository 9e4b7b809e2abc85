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

//! Hosted TCP/IP transport.
//!
//! Three kinds of actors share the work:
//!
//! * the [`server`] routes frames between clients,
//! * a [`Client`] is the dispatcher's [`Backend`](crate::traits::Backend) and
//!   keeps the connection to the server,
//! * one [`Receiver`] per local component reads the frames the server
//!   forwards to it.

pub use client::{Client, ClientStats};
pub use config::TcpIpConfig;
pub use receiver::Receiver;
pub use server::{run, start_server, ServerHandle, ServerStats};
pub use types::TransportError;

/// Defines [`Client`].
mod client;
/// TCP/IP transport configuration.
mod config;
/// Wire format: frame header, frame encoding and async framing helpers.
pub mod protocol;
/// Defines [`Receiver`].
mod receiver;
/// Routes frames between clients.
pub mod server;
/// Defines [`TransportError`].
mod types;
