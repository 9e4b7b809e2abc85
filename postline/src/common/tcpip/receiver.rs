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

//! Per-component receiver of the TCP/IP client.
//!
//! Each local component listens on its own port. The server opens one
//! connection per registered component and writes every frame for that
//! component into it. The receiver turns the byte stream back into messages
//! and hands complete ones to the client's inbound queue.

use std::net::{Ipv4Addr, Shutdown, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::protocol::{read_payload, read_tcp_header, TcpHeader, TcpMessageType};
use super::{ClientStats, TransportError};
use crate::message::{ComponentId, Message};

const LISTEN_BACKLOG: u32 = 16;

#[derive(Debug, Default)]
struct ReceiverFlags {
    connected: bool,
    shutdown: bool,
    closed: bool,
}

/// Where a receiver is in reading its connection.
pub(crate) enum ReceiverState {
    /// Waiting for the server to connect.
    Unconnected,
    /// A connection was accepted.
    Connected(TcpStream),
    /// Between frames.
    AwaitingHeader(TcpStream),
    /// The header is read; the payload is outstanding.
    AwaitingBody(TcpStream, TcpHeader),
    /// Finished for good.
    Closed,
}

/// Handle to the receiver of one local component.
#[derive(Debug)]
pub struct Receiver {
    component: ComponentId,
    port: u16,
    flags: Arc<Mutex<ReceiverFlags>>,
    cancel_token: CancellationToken,
}

impl Receiver {
    /// Binds the component's port and starts reading on `runtime`.
    pub(crate) fn spawn(
        component: ComponentId,
        port: u16,
        runtime: &Handle,
        inbound: mpsc::UnboundedSender<Message>,
        max_payload: usize,
        stats: Arc<ClientStats>,
        cancel_token: CancellationToken,
    ) -> Result<Self, TransportError> {
        let listener = {
            let _guard = runtime.enter();
            bind(port)?
        };

        let flags = Arc::new(Mutex::new(ReceiverFlags::default()));
        let task = ReceiverTask {
            component,
            flags: Arc::clone(&flags),
            inbound,
            max_payload,
            stats,
            cancel_token: cancel_token.clone(),
        };
        runtime.spawn(task.run(listener));
        debug!(component, port, "Receiver listening");

        Ok(Self {
            component,
            port,
            flags,
            cancel_token,
        })
    }

    /// The component this receiver reads for.
    pub fn component_id(&self) -> ComponentId {
        self.component
    }

    /// The listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the server is connected.
    pub fn is_connected(&self) -> bool {
        self.flags.lock().connected
    }

    /// Whether the receiver has stopped for good.
    pub fn is_closed(&self) -> bool {
        self.flags.lock().closed
    }

    /// Asks the receiver to stop. Takes effect after the next complete message.
    pub fn shutdown_command(&self) {
        self.flags.lock().shutdown = true;
    }

    /// Stops the receiver immediately, dropping any partial frame.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }
}

fn bind(port: u16) -> Result<TcpListener, TransportError> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket
        .bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .map_err(|e| TransportError::IoError(format!("Failed to bind receiver port {port}: {e}")))?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

fn close(stream: TcpStream) {
    if let Ok(stream) = stream.into_std() {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

struct ReceiverTask {
    component: ComponentId,
    flags: Arc<Mutex<ReceiverFlags>>,
    inbound: mpsc::UnboundedSender<Message>,
    max_payload: usize,
    stats: Arc<ClientStats>,
    cancel_token: CancellationToken,
}

impl ReceiverTask {
    async fn run(self, listener: TcpListener) {
        let mut state = ReceiverState::Unconnected;
        while !matches!(state, ReceiverState::Closed) {
            state = self.step(&listener, state).await;
        }

        let mut flags = self.flags.lock();
        flags.connected = false;
        flags.closed = true;
        debug!(component = self.component, "Receiver closed");
    }

    async fn step(&self, listener: &TcpListener, state: ReceiverState) -> ReceiverState {
        match state {
            ReceiverState::Unconnected => {
                tokio::select! {
                    biased;
                    () = self.cancel_token.cancelled() => ReceiverState::Closed,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(
                                component = self.component,
                                %peer,
                                "Receiver accepted connection"
                            );
                            ReceiverState::Connected(stream)
                        }
                        Err(e) => {
                            warn!(component = self.component, error = %e, "Receiver accept failed");
                            self.stats.record_read_error();
                            ReceiverState::Unconnected
                        }
                    },
                }
            }
            ReceiverState::Connected(stream) => {
                self.flags.lock().connected = true;
                info!(component = self.component, "Receiver connected");
                ReceiverState::AwaitingHeader(stream)
            }
            ReceiverState::AwaitingHeader(mut stream) => {
                let read = tokio::select! {
                    biased;
                    () = self.cancel_token.cancelled() => None,
                    read = read_tcp_header(&mut stream) => Some(read),
                };
                match read {
                    None => {
                        close(stream);
                        ReceiverState::Closed
                    }
                    Some(Ok(header)) => ReceiverState::AwaitingBody(stream, header),
                    Some(Err(e)) => self.disconnect(stream, &e),
                }
            }
            ReceiverState::AwaitingBody(mut stream, header) => {
                let read = tokio::select! {
                    biased;
                    () = self.cancel_token.cancelled() => None,
                    read = read_payload(&mut stream, &header, self.max_payload) => Some(read),
                };
                match read {
                    None => {
                        close(stream);
                        ReceiverState::Closed
                    }
                    Some(Ok(payload)) => {
                        if header.kind() == TcpMessageType::Data {
                            let message = Message::new(*header.header(), payload);
                            trace!(
                                component = self.component,
                                header = %message.header(),
                                "Frame received"
                            );
                            if self.inbound.send(message).is_err() {
                                debug!(component = self.component, "Client gone, closing receiver");
                                close(stream);
                                return ReceiverState::Closed;
                            }
                            self.stats.record_frame_received();
                        } else {
                            debug!(component = self.component, "Ignoring non-data frame");
                        }

                        if self.flags.lock().shutdown {
                            info!(component = self.component, "Receiver shutting down");
                            close(stream);
                            ReceiverState::Closed
                        } else {
                            ReceiverState::AwaitingHeader(stream)
                        }
                    }
                    Some(Err(e)) => self.disconnect(stream, &e),
                }
            }
            ReceiverState::Closed => ReceiverState::Closed,
        }
    }

    fn disconnect(&self, stream: TcpStream, error: &TransportError) -> ReceiverState {
        self.flags.lock().connected = false;
        if *error == TransportError::ConnectionClosed {
            debug!(component = self.component, "Server closed receiver connection");
            self.stats.record_disconnect();
        } else {
            warn!(component = self.component, error = %error, "Receiver read failed");
            self.stats.record_read_error();
        }
        close(stream);
        ReceiverState::Unconnected
    }
}
