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

#![warn(missing_docs)]

//! # Postline
//!
//! Component communication for embedded and hosted systems. Software
//! components address each other by a one-byte id and exchange three kinds of
//! packets:
//!
//! - **Actions**: a request to one component, optionally answered by a
//!   response or a negative response.
//! - **Events**: a request to the broadcast address, handled by every
//!   subscriber.
//! - **Acknowledges**: optional link-level confirmations of directed packets.
//!
//! ## Key Concepts
//!
//! - **`Header` / `SmartPayload`**: five bytes of routing metadata plus a shared,
//!   reference-counted payload buffer.
//! - **`Backend`**: the transport seam. `LoopbackBackend` stays in-process; the
//!   `tcpip` feature adds a TCP client, server and per-component receivers.
//! - **`Postman`**: routes a packet to local handlers. `RoutingTable` is the
//!   builder-made implementation.
//! - **`Dispatcher`**: the cooperative loop. Call `update()` periodically; it
//!   drains the backend, routes, answers, and expires timeouts.
//! - **`Communication`**: what a component uses to call actions, answer them
//!   and publish events.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use postline::prelude::*;
//!
//! const SENDER: ComponentId = 0x01;
//! const RECEIVER: ComponentId = 0x02;
//! const DOUBLE: Identifier = 0x10;
//!
//! let table = RoutingTable::builder()
//!     .component(SENDER)
//!     .action(RECEIVER, DOUBLE, |comm, handle, value: &u32| {
//!         let _ = comm.send_response(&handle, &(value * 2));
//!     })
//!     .build();
//!
//! let mut dispatcher = Dispatcher::new(LoopbackBackend::new(), table);
//! dispatcher
//!     .communication(SENDER)
//!     .call_action_with_callback(RECEIVER, DOUBLE, &21u32, |_comm, outcome| {
//!         assert_eq!(outcome.payload().and_then(|p| p.read::<u32>()), Some(42));
//!     })?;
//! dispatcher.update();
//! ```

/// Configuration, routing, dispatch and backends.
pub(crate) mod common;

/// Headers, payloads and answer correlation.
pub(crate) mod message;

/// The `Backend` and `Postman` seams.
pub(crate) mod traits;

pub use zerocopy;

/// Hosted TCP/IP transport.
///
/// Only available when the `tcpip` feature is enabled.
#[cfg(feature = "tcpip")]
pub mod tcpip {
    pub use crate::common::tcpip::{
        run, start_server, Client, ClientStats, Receiver, ServerHandle, ServerStats,
        TcpIpConfig, TransportError,
    };

    /// Wire format of the TCP/IP transport.
    pub mod protocol {
        pub use crate::common::tcpip::protocol::{
            read_frame, read_payload, read_tcp_header, write_frame, TcpHeader, TcpMessage,
            TcpMessageType, MSG_TYPE_DATA, MSG_TYPE_REGISTER, TCP_HEADER_SIZE,
        };
    }
}

/// Configuration types and the global configuration.
pub mod config {
    pub use crate::common::config::{ConfigError, DispatcherConfig, PostlineConfig, CONFIG};
}

/// A prelude module for conveniently importing the most commonly used items.
///
/// # Re-exports
///
/// ## Macros (from `postline-macro`)
/// *   [`postline_macro::postline_message`]: Attribute macro for payload types.
///
/// ## Core Types
/// *   [`crate::message::Header`], [`crate::message::HeaderType`]: Packet routing metadata.
/// *   [`crate::message::SmartPayload`]: Shared payload buffer.
/// *   [`crate::message::Message`]: Header plus payload.
/// *   [`crate::message::ResponseHandle`], [`crate::message::ResponseOutcome`]: Answer correlation.
/// *   [`crate::common::Dispatcher`]: The cooperative loop.
/// *   [`crate::common::Communication`]: The component-facing API.
/// *   [`crate::common::RoutingTable`]: The builder-made postman.
/// *   [`crate::common::LoopbackBackend`], [`crate::common::LoopbackBus`]: In-process backend.
/// *   [`crate::traits::Backend`], [`crate::traits::Postman`]: Extension seams.
///
/// ## TCP/IP Types (requires `tcpip` feature)
/// *   [`crate::common::tcpip::Client`]: Backend connected to a server.
/// *   [`crate::common::tcpip::ServerHandle`]: Handle of a running server.
/// *   [`crate::common::tcpip::TcpIpConfig`]: Transport configuration.
pub mod prelude {
    pub use postline_macro::*;

    pub use crate::common::{
        Communication, ConfigError, Dispatcher, DispatcherConfig, DispatcherStats,
        LoopbackBackend, LoopbackBus, Outbox, PostlineConfig, ResponseCallback, RoutingTable,
        RoutingTableBuilder,
    };
    pub use crate::message::{
        CommunicationError, ComponentId, Header, HeaderType, Identifier, Message,
        ResponseHandle, ResponseOutcome, SmartPayload, BROADCAST,
    };
    pub use crate::traits::{Availability, Backend, DeliveryStatus, Postman};

    #[cfg(feature = "tcpip")]
    pub use crate::common::tcpip::{
        start_server, Client, ClientStats, ServerHandle, ServerStats, TcpIpConfig,
        TransportError,
    };
}
