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

//! Internal building blocks: configuration, routing, dispatch and the
//! in-process and TCP/IP backends.

pub use communication::{Communication, Outbox};
pub use config::{ConfigError, DispatcherConfig, PostlineConfig};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use loopback::{LoopbackBackend, LoopbackBus};
pub use response_tracker::{ResponseCallback, ResponseTracker};
pub use routing_table::{RoutingTable, RoutingTableBuilder};

/// Defines [`Communication`] and [`Outbox`].
mod communication;
/// Configuration loaded from XDG-compliant locations.
pub mod config;
/// Defines [`Dispatcher`].
mod dispatcher;
/// Defines the in-process backend.
mod loopback;
/// Bookkeeping for outstanding answers and acknowledges.
mod response_tracker;
/// Defines [`RoutingTable`].
mod routing_table;

/// Hosted TCP/IP transport.
///
/// Only available when the `tcpip` feature is enabled.
#[cfg(feature = "tcpip")]
pub mod tcpip;
