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

//! Central router of the TCP/IP transport.
//!
//! Clients connect to the server's base port and write REGISTER and DATA
//! frames. For every registered component the server opens a connection back
//! to the component's receiver and forwards the frames addressed to it.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::receiver_port;
use super::protocol::{read_frame, write_frame, TcpMessage, TcpMessageType};
use super::{TcpIpConfig, TransportError};
use crate::message::{ComponentId, BROADCAST};

/// Connection attempts to a receiver before its route is given up.
const MAX_ROUTE_CONNECT_ATTEMPTS: u32 = 10;

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total client connections accepted.
    pub connections_accepted: AtomicUsize,
    /// Currently connected clients.
    pub connections_active: AtomicUsize,
    /// Total frames read from clients.
    pub frames_received: AtomicUsize,
    /// Total frames written to receivers.
    pub frames_forwarded: AtomicUsize,
    /// Total REGISTER frames that opened a route.
    pub registrations: AtomicUsize,
    /// DATA frames with no route to their destination.
    pub undeliverable: AtomicUsize,
    /// Frames dropped on a full or closed route.
    pub dropped: AtomicUsize,
    /// Failed writes to receivers.
    pub write_errors: AtomicUsize,
    /// Other errors: accept failures and malformed frames.
    pub errors: AtomicUsize,
}

impl ServerStats {
    /// Create new statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total client connections accepted.
    #[must_use]
    pub fn connections_accepted(&self) -> usize {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Currently connected clients.
    #[must_use]
    pub fn connections_active(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Total frames read from clients.
    #[must_use]
    pub fn frames_received(&self) -> usize {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Total frames written to receivers.
    #[must_use]
    pub fn frames_forwarded(&self) -> usize {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    /// Total REGISTER frames that opened a route.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::Relaxed)
    }

    /// DATA frames with no route to their destination.
    #[must_use]
    pub fn undeliverable(&self) -> usize {
        self.undeliverable.load(Ordering::Relaxed)
    }

    /// Frames dropped on a full or closed route.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Failed writes to receivers.
    #[must_use]
    pub fn write_errors(&self) -> usize {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Other errors.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

type ConnectionId = u64;

struct Route {
    client: ConnectionId,
    generation: u64,
    sender: mpsc::Sender<TcpMessage>,
}

struct ServerState {
    config: TcpIpConfig,
    routes: DashMap<ComponentId, Route>,
    stats: Arc<ServerStats>,
    cancel_token: CancellationToken,
    next_connection: AtomicU64,
    next_generation: AtomicU64,
}

/// Server handle for managing the server lifecycle.
pub struct ServerHandle {
    /// Statistics for the server.
    pub stats: Arc<ServerStats>,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    cancel_token: CancellationToken,
}

impl ServerHandle {
    /// Request the server to stop. Closes every client and route connection.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the server has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// The address the server listens on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Components with a live route, in ascending order.
    #[must_use]
    pub fn registered_components(&self) -> Vec<ComponentId> {
        let mut components: Vec<_> = self.state.routes.iter().map(|route| *route.key()).collect();
        components.sort_unstable();
        components
    }
}

/// Starts a server on `config.host:config.base_port` with its own
/// cancellation token.
///
/// # Errors
///
/// See [`run`].
pub async fn start_server(config: TcpIpConfig) -> Result<ServerHandle, TransportError> {
    run(config, CancellationToken::new()).await
}

/// Binds the server port and spawns the accept loop.
///
/// # Errors
///
/// [`TransportError::IoError`] if the port cannot be bound.
pub async fn run(
    config: TcpIpConfig,
    cancel_token: CancellationToken,
) -> Result<ServerHandle, TransportError> {
    let address = config.server_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| TransportError::IoError(format!("Failed to bind {address}: {e}")))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "Server listening");

    let stats = Arc::new(ServerStats::new());
    let state = Arc::new(ServerState {
        config,
        routes: DashMap::new(),
        stats: Arc::clone(&stats),
        cancel_token: cancel_token.clone(),
        next_connection: AtomicU64::new(1),
        next_generation: AtomicU64::new(1),
    });

    tokio::spawn(accept_loop(listener, Arc::clone(&state)));

    Ok(ServerHandle {
        stats,
        local_addr,
        state,
        cancel_token,
    })
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        tokio::select! {
            biased;
            () = state.cancel_token.cancelled() => {
                info!("Server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection = state.next_connection.fetch_add(1, Ordering::Relaxed);
                    state.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    state.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                    debug!(connection, %peer, "Client connected");
                    tokio::spawn(handle_client(stream, peer, connection, Arc::clone(&state)));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept client");
                    state.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    state: Arc<ServerState>,
) {
    let max_payload = state.config.payload_limit();
    loop {
        let frame = tokio::select! {
            biased;
            () = state.cancel_token.cancelled() => break,
            frame = read_frame(&mut stream, max_payload) => frame,
        };

        match frame {
            Ok(frame) => {
                state.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                match frame.kind() {
                    TcpMessageType::Register => {
                        register(&state, connection, peer.ip(), frame.header().source());
                    }
                    TcpMessageType::Data => distribute(&state, frame),
                }
            }
            Err(TransportError::ConnectionClosed) => {
                debug!(connection, %peer, "Client disconnected");
                break;
            }
            Err(e) => {
                warn!(connection, %peer, error = %e, "Dropping client after bad frame");
                state.stats.errors.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    state.routes.retain(|component, route| {
        let keep = route.client != connection;
        if !keep {
            debug!(component = *component, connection, "Route removed with its client");
        }
        keep
    });
    state.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
}

/// Opens a route to the receiver of `component` on the client at `ip`.
///
/// A second REGISTER from the client that already owns the route is ignored;
/// one from another client takes the route over.
fn register(
    state: &Arc<ServerState>,
    connection: ConnectionId,
    ip: IpAddr,
    component: ComponentId,
) {
    if component == BROADCAST {
        warn!(connection, "Ignoring registration of the broadcast id");
        return;
    }
    let owned_here = state
        .routes
        .get(&component)
        .is_some_and(|route| route.client == connection);
    if owned_here {
        trace!(component, connection, "Component already registered");
        return;
    }
    let Some(port) = receiver_port(state.config.base_port, component) else {
        warn!(component, "No receiver port for component");
        return;
    };

    let (sender, receiver) = mpsc::channel(state.config.outbound_queue_capacity.max(1));
    let generation = state.next_generation.fetch_add(1, Ordering::Relaxed);
    let replaced = state.routes.insert(
        component,
        Route {
            client: connection,
            generation,
            sender,
        },
    );
    state.stats.registrations.fetch_add(1, Ordering::Relaxed);

    let address = SocketAddr::new(ip, port);
    if replaced.is_some() {
        info!(component, %address, "Component moved to another client");
    } else {
        info!(component, %address, "Component registered");
    }
    tokio::spawn(route_connection(
        Arc::clone(state),
        component,
        generation,
        address,
        receiver,
    ));
}

/// Forwards a DATA frame: to the destination's route, or once to every
/// connected client for events.
fn distribute(state: &ServerState, frame: TcpMessage) {
    let header = *frame.header();
    if header.is_event() {
        let targets = event_targets(
            state
                .routes
                .iter()
                .map(|route| (*route.key(), route.client, route.sender.clone())),
        );
        if targets.is_empty() {
            state.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
            trace!(header = %header, "Event without any connected client");
            return;
        }
        for (component, sender) in targets {
            forward(state, component, &sender, frame.clone());
        }
        return;
    }

    let destination = header.destination();
    let sender = state
        .routes
        .get(&destination)
        .map(|route| route.sender.clone());
    match sender {
        Some(sender) => forward(state, destination, &sender, frame),
        None => {
            state.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
            debug!(header = %header, "No route to destination");
        }
    }
}

/// Picks one route per client for an event: the route of the client's lowest
/// component id. Events to a client stay on one connection while its routes
/// are unchanged.
fn event_targets<T>(
    routes: impl IntoIterator<Item = (ComponentId, ConnectionId, T)>,
) -> Vec<(ComponentId, T)> {
    let mut chosen: BTreeMap<ConnectionId, (ComponentId, T)> = BTreeMap::new();
    for (component, client, target) in routes {
        match chosen.entry(client) {
            Entry::Vacant(slot) => {
                slot.insert((component, target));
            }
            Entry::Occupied(mut slot) => {
                if component < slot.get().0 {
                    slot.insert((component, target));
                }
            }
        }
    }
    chosen.into_values().collect()
}

fn forward(
    state: &ServerState,
    component: ComponentId,
    sender: &mpsc::Sender<TcpMessage>,
    frame: TcpMessage,
) {
    match sender.try_send(frame) {
        Ok(()) => {}
        Err(TrySendError::Full(frame)) => {
            state.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(component, header = %frame.header(), "Route queue full, dropping frame");
        }
        Err(TrySendError::Closed(frame)) => {
            state.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(component, header = %frame.header(), "Route closed, dropping frame");
        }
    }
}

fn remove_route(state: &ServerState, component: ComponentId, generation: u64) {
    if state
        .routes
        .remove_if(&component, |_, route| route.generation == generation)
        .is_some()
    {
        debug!(component, "Route removed");
    }
}

async fn route_connection(
    state: Arc<ServerState>,
    component: ComponentId,
    generation: u64,
    address: SocketAddr,
    mut frames: mpsc::Receiver<TcpMessage>,
) {
    let Some(stream) = connect_route(&state, component, address).await else {
        remove_route(&state, component, generation);
        return;
    };
    let _ = stream.set_nodelay(true);
    debug!(component, %address, "Route connected");

    let (mut reader, mut writer) = stream.into_split();
    let mut discard = [0u8; 64];
    loop {
        tokio::select! {
            biased;
            () = state.cancel_token.cancelled() => break,
            read = reader.read(&mut discard) => match read {
                Ok(0) | Err(_) => {
                    debug!(component, %address, "Receiver closed route connection");
                    remove_route(&state, component, generation);
                    break;
                }
                Ok(_) => {}
            },
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        state.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        state.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            component,
                            %address,
                            error = %e,
                            "Write to receiver failed, dropping route"
                        );
                        remove_route(&state, component, generation);
                        break;
                    }
                    state.stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
                    trace!(component, header = %frame.header(), "Frame forwarded");
                }
                None => break,
            },
        }
    }
}

async fn connect_route(
    state: &ServerState,
    component: ComponentId,
    address: SocketAddr,
) -> Option<TcpStream> {
    for attempt in 1..=MAX_ROUTE_CONNECT_ATTEMPTS {
        let result = tokio::select! {
            biased;
            () = state.cancel_token.cancelled() => return None,
            result = tokio::time::timeout(
                state.config.connect_timeout(),
                TcpStream::connect(address),
            ) => result,
        };
        match result {
            Ok(Ok(stream)) => return Some(stream),
            Ok(Err(e)) => {
                trace!(component, %address, attempt, error = %e, "Receiver not reachable");
            }
            Err(_) => trace!(component, %address, attempt, "Receiver connect timed out"),
        }
        tokio::select! {
            biased;
            () = state.cancel_token.cancelled() => return None,
            () = tokio::time::sleep(state.config.reconnect_interval()) => {}
        }
    }
    state.stats.errors.fetch_add(1, Ordering::Relaxed);
    warn!(component, %address, "Giving up on receiver");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_targets_use_lowest_component_per_client() {
        let routes = vec![(0x07, 1, "a7"), (0x03, 2, "b3"), (0x02, 1, "a2"), (0x05, 2, "b5")];
        assert_eq!(event_targets(routes.clone()), vec![(0x02, "a2"), (0x03, "b3")]);

        let reversed: Vec<_> = routes.into_iter().rev().collect();
        assert_eq!(event_targets(reversed), vec![(0x02, "a2"), (0x03, "b3")]);
    }

    #[test]
    fn test_event_targets_without_routes() {
        let routes: Vec<(ComponentId, ConnectionId, ())> = Vec::new();
        assert!(event_targets(routes).is_empty());
    }
}
