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

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::config::receiver_port;
use super::protocol::{write_frame, TcpMessage};
use super::{Receiver, TcpIpConfig, TransportError};
use crate::message::{CommunicationError, ComponentId, Header, Message, SmartPayload, BROADCAST};
use crate::traits::Backend;

/// Counters kept by a [`Client`] and its receivers.
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Successful connections to the server.
    pub connections: AtomicUsize,
    /// DATA frames written to the server.
    pub frames_sent: AtomicUsize,
    /// DATA frames read by the receivers.
    pub frames_received: AtomicUsize,
    /// Packets dropped because the queue was full or the write failed.
    pub dropped: AtomicUsize,
    /// Failed writes to the server.
    pub write_errors: AtomicUsize,
    /// Failed reads or accepts in the receivers.
    pub read_errors: AtomicUsize,
    /// Receiver connections closed by the server.
    pub disconnects: AtomicUsize,
}

impl ClientStats {
    /// Create new statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful connections to the server.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// DATA frames written to the server.
    #[must_use]
    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// DATA frames read by the receivers.
    #[must_use]
    pub fn frames_received(&self) -> usize {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Packets dropped because the queue was full or the write failed.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Failed writes to the server.
    #[must_use]
    pub fn write_errors(&self) -> usize {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Failed reads or accepts in the receivers.
    #[must_use]
    pub fn read_errors(&self) -> usize {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// Receiver connections closed by the server.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }
}

enum Outbound {
    Register(ComponentId),
    Data(TcpMessage),
}

/// Client side of the TCP/IP transport, used as a dispatcher [`Backend`].
///
/// Socket work runs on a caller-supplied tokio runtime. A background connector
/// keeps a connection to the server, announces every local component with a
/// REGISTER frame whenever it (re)connects, and writes queued DATA frames.
/// Each local component gets a [`Receiver`] for the frames addressed to it.
///
/// ```rust,ignore
/// let mut client = Client::new(runtime.handle().clone(), config);
/// client.connect()?;
/// client.add_receiver_id(SENDER)?;
/// let mut dispatcher = Dispatcher::new(client, table);
/// ```
pub struct Client {
    config: TcpIpConfig,
    runtime: Handle,
    server_port: u16,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Option<mpsc::Receiver<Outbound>>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: mpsc::UnboundedReceiver<Message>,
    inbox: VecDeque<Message>,
    receivers: Vec<Receiver>,
    registered: Arc<Mutex<Vec<ComponentId>>>,
    connected: Arc<AtomicBool>,
    stats: Arc<ClientStats>,
    cancel_token: CancellationToken,
}

impl Client {
    /// Creates an unconnected client.
    pub fn new(runtime: Handle, config: TcpIpConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            server_port: config.base_port,
            config,
            runtime,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            inbound_tx,
            inbound_rx,
            inbox: VecDeque::new(),
            receivers: Vec::new(),
            registered: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ClientStats::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Connects to the configured server.
    ///
    /// # Errors
    ///
    /// See [`connect_to`](Self::connect_to).
    pub fn connect(&mut self) -> Result<(), TransportError> {
        let host = self.config.host.clone();
        self.connect_to(&host, self.config.base_port)
    }

    /// Starts the connector for the server at `host:port`.
    ///
    /// Returns at once; the connector keeps trying every reconnect interval
    /// until it reaches the server and reconnects whenever the connection is
    /// lost. Receiver ports are derived from `port`, so call this before
    /// [`add_receiver_id`](Self::add_receiver_id).
    ///
    /// # Errors
    ///
    /// [`TransportError::ProtocolError`] if the connector is already running.
    pub fn connect_to(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let outbound = self.outbound_rx.take().ok_or_else(|| {
            TransportError::ProtocolError("Client is already connecting".to_string())
        })?;
        if !self.receivers.is_empty() && port != self.server_port {
            warn!(
                port,
                previous = self.server_port,
                "Receivers were bound for a different server port"
            );
        }
        self.server_port = port;

        let connector = Connector {
            address: format!("{host}:{port}"),
            connect_timeout: self.config.connect_timeout(),
            reconnect_interval: self.config.reconnect_interval(),
            registered: Arc::clone(&self.registered),
            connected: Arc::clone(&self.connected),
            stats: Arc::clone(&self.stats),
            cancel_token: self.cancel_token.child_token(),
        };
        info!(address = %connector.address, "Starting connector");
        self.runtime.spawn(connector.run(outbound));
        Ok(())
    }

    /// Hosts `component` on this client: starts its receiver and announces
    /// it to the server. Adding the same id twice does nothing.
    ///
    /// # Errors
    ///
    /// [`TransportError::ProtocolError`] for the broadcast id or a port beyond
    /// 65535, [`TransportError::IoError`] if the port cannot be bound.
    pub fn add_receiver_id(&mut self, component: ComponentId) -> Result<(), TransportError> {
        if component == BROADCAST {
            return Err(TransportError::ProtocolError(
                "The broadcast id cannot host a component".to_string(),
            ));
        }
        if self.receiver(component).is_some() {
            return Ok(());
        }
        let port = receiver_port(self.server_port, component).ok_or_else(|| {
            TransportError::ProtocolError(format!("No receiver port for component {component}"))
        })?;

        let receiver = Receiver::spawn(
            component,
            port,
            &self.runtime,
            self.inbound_tx.clone(),
            self.config.payload_limit(),
            Arc::clone(&self.stats),
            self.cancel_token.child_token(),
        )?;
        self.receivers.push(receiver);
        self.registered.lock().push(component);

        if self.outbound_tx.try_send(Outbound::Register(component)).is_err() {
            debug!(component, "Registration deferred to the next connection");
        }
        Ok(())
    }

    /// Whether the connector currently holds a connection to the server.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The receiver of `component`, if it is hosted here.
    pub fn receiver(&self, component: ComponentId) -> Option<&Receiver> {
        self.receivers
            .iter()
            .find(|receiver| receiver.component_id() == component)
    }

    /// Components hosted by this client.
    pub fn registered_ids(&self) -> Vec<ComponentId> {
        self.registered.lock().clone()
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<ClientStats> {
        Arc::clone(&self.stats)
    }

    /// Stops the connector and closes every receiver at once, dropping any
    /// partially read frame.
    pub fn shutdown(&self) {
        for receiver in &self.receivers {
            receiver.close();
        }
        self.cancel_token.cancel();
        info!(components = ?self.registered_ids(), "Client shut down");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Backend for Client {
    fn send_packet(
        &mut self,
        header: &Header,
        payload: &SmartPayload,
    ) -> Result<(), CommunicationError> {
        let frame = TcpMessage::data(*header, payload.clone(), self.config.payload_limit())?;
        match self.outbound_tx.try_send(Outbound::Data(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(header = %header, "Outbound queue full, dropping packet");
                Err(CommunicationError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(CommunicationError::Disconnected),
        }
    }

    fn is_packet_available(&self) -> bool {
        !self.inbox.is_empty()
    }

    fn get_packet(&mut self) -> Option<Message> {
        self.inbox.pop_front()
    }

    /// Moves every message the receivers have completed into the inbox.
    fn update(&mut self) {
        while let Ok(message) = self.inbound_rx.try_recv() {
            self.inbox.push_back(message);
        }
    }
}

enum SessionEnd {
    Lost,
    Stopped,
}

struct Connector {
    address: String,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    registered: Arc<Mutex<Vec<ComponentId>>>,
    connected: Arc<AtomicBool>,
    stats: Arc<ClientStats>,
    cancel_token: CancellationToken,
}

impl Connector {
    async fn run(self, mut outbound: mpsc::Receiver<Outbound>) {
        loop {
            let attempt = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                attempt = tokio::time::timeout(
                    self.connect_timeout,
                    TcpStream::connect(&self.address),
                ) => attempt,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    self.connected.store(true, Ordering::Release);
                    self.stats.connections.fetch_add(1, Ordering::Relaxed);
                    info!(address = %self.address, "Connected to server");

                    let end = self.session(stream, &mut outbound).await;
                    self.connected.store(false, Ordering::Release);
                    if matches!(end, SessionEnd::Stopped) {
                        break;
                    }
                    info!(address = %self.address, "Connection to server lost");
                }
                Ok(Err(e)) => {
                    trace!(address = %self.address, error = %e, "Server not reachable");
                }
                Err(_) => {
                    trace!(address = %self.address, "Connection attempt timed out");
                }
            }

            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }
        self.connected.store(false, Ordering::Release);
        debug!(address = %self.address, "Connector stopped");
    }

    async fn session(
        &self,
        stream: TcpStream,
        outbound: &mut mpsc::Receiver<Outbound>,
    ) -> SessionEnd {
        let (mut reader, mut writer) = stream.into_split();

        let mut announced = HashSet::new();
        let components = self.registered.lock().clone();
        for component in components {
            if let Err(e) = write_frame(&mut writer, &TcpMessage::register(component)).await {
                self.record_write_error(&e);
                return SessionEnd::Lost;
            }
            announced.insert(component);
            debug!(component, "Component announced");
        }

        let mut discard = [0u8; 64];
        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => return SessionEnd::Stopped,
                read = reader.read(&mut discard) => match read {
                    Ok(0) | Err(_) => return SessionEnd::Lost,
                    Ok(_) => {}
                },
                item = outbound.recv() => match item {
                    None => return SessionEnd::Stopped,
                    Some(Outbound::Register(component)) => {
                        if !announced.insert(component) {
                            continue;
                        }
                        let frame = TcpMessage::register(component);
                        if let Err(e) = write_frame(&mut writer, &frame).await {
                            self.record_write_error(&e);
                            return SessionEnd::Lost;
                        }
                        debug!(component, "Component announced");
                    }
                    Some(Outbound::Data(frame)) => {
                        if let Err(e) = write_frame(&mut writer, &frame).await {
                            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                            self.record_write_error(&e);
                            return SessionEnd::Lost;
                        }
                        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                        trace!(header = %frame.header(), "Frame written");
                    }
                },
            }
        }
    }

    fn record_write_error(&self, error: &TransportError) {
        self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
        warn!(address = %self.address, error = %error, "Write to server failed");
    }
}
