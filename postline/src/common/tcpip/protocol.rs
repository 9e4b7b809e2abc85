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

//! Wire format of the TCP/IP transport.
//!
//! Every frame starts with an 8-byte header:
//!
//! ```text
//! ┌──────────┬──────────────────────────────┬──────────────────┐
//! │ type (1) │ header (5)                   │ data_length (2)  │
//! │ 0 = REG  │ kind, ack, dst, src, ident   │ little-endian    │
//! │ 1 = DATA │                              │                  │
//! └──────────┴──────────────────────────────┴──────────────────┘
//! ```
//!
//! followed by `data_length` payload bytes. There is no magic number and no
//! checksum. A REGISTER frame carries the announced component id as the
//! header's source and has no payload.

use static_assertions::assert_eq_size;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::byteorder::{LittleEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, Unaligned};

use super::TransportError;
use crate::message::{
    ComponentId, Header, HeaderType, Message, RawHeader, SmartPayload, BROADCAST,
};

/// Size of the frame header in bytes.
pub const TCP_HEADER_SIZE: usize = 8;

/// Type tag of a REGISTER frame.
pub const MSG_TYPE_REGISTER: u8 = 0;

/// Type tag of a DATA frame.
pub const MSG_TYPE_DATA: u8 = 1;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpMessageType {
    /// A client announces that it hosts a component.
    Register,
    /// A packet for one or more components.
    Data,
}

impl TcpMessageType {
    const fn tag(self) -> u8 {
        match self {
            Self::Register => MSG_TYPE_REGISTER,
            Self::Data => MSG_TYPE_DATA,
        }
    }
}

#[derive(FromBytes, IntoBytes, Immutable, Unaligned)]
#[repr(C)]
struct RawTcpHeader {
    kind: u8,
    header: RawHeader,
    data_length: U16<LittleEndian>,
}

assert_eq_size!(RawTcpHeader, [u8; TCP_HEADER_SIZE]);

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    kind: TcpMessageType,
    header: Header,
    data_length: u16,
}

impl TcpHeader {
    /// Frame type.
    pub fn kind(&self) -> TcpMessageType {
        self.kind
    }

    /// The embedded packet header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of payload bytes following the header.
    pub fn data_length(&self) -> u16 {
        self.data_length
    }

    /// Encodes the header.
    pub fn encode(&self) -> [u8; TCP_HEADER_SIZE] {
        let raw = RawTcpHeader {
            kind: self.kind.tag(),
            header: self.header.to_raw(),
            data_length: U16::new(self.data_length),
        };
        let mut bytes = [0u8; TCP_HEADER_SIZE];
        bytes.copy_from_slice(raw.as_bytes());
        bytes
    }

    /// Decodes a frame header.
    ///
    /// # Errors
    ///
    /// [`TransportError::ProtocolError`] for an unknown frame type or header type.
    pub fn decode(bytes: &[u8; TCP_HEADER_SIZE]) -> Result<Self, TransportError> {
        let raw = RawTcpHeader::read_from_bytes(bytes.as_slice())
            .map_err(|_| TransportError::ProtocolError("malformed frame header".to_string()))?;
        let kind = match raw.kind {
            MSG_TYPE_REGISTER => TcpMessageType::Register,
            MSG_TYPE_DATA => TcpMessageType::Data,
            other => {
                return Err(TransportError::ProtocolError(format!(
                    "Unknown frame type: {other:#04x}"
                )))
            }
        };
        let header = Header::from_raw(raw.header)
            .map_err(|e| TransportError::ProtocolError(e.to_string()))?;
        Ok(Self {
            kind,
            header,
            data_length: raw.data_length.get(),
        })
    }
}

/// A complete frame: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpMessage {
    tcp_header: TcpHeader,
    payload: SmartPayload,
}

impl TcpMessage {
    /// Wraps a packet in a DATA frame.
    ///
    /// # Errors
    ///
    /// [`TransportError::PayloadTooLarge`] if the payload exceeds `max_payload`
    /// or the 16-bit length field.
    pub fn data(
        header: Header,
        payload: SmartPayload,
        max_payload: usize,
    ) -> Result<Self, TransportError> {
        let max = max_payload.min(usize::from(u16::MAX));
        let data_length = u16::try_from(payload.len())
            .ok()
            .filter(|len| usize::from(*len) <= max)
            .ok_or(TransportError::PayloadTooLarge {
                size: payload.len(),
                max,
            })?;
        Ok(Self {
            tcp_header: TcpHeader {
                kind: TcpMessageType::Data,
                header,
                data_length,
            },
            payload,
        })
    }

    /// A REGISTER frame announcing `component`.
    pub fn register(component: ComponentId) -> Self {
        Self {
            tcp_header: TcpHeader {
                kind: TcpMessageType::Register,
                header: Header::new(HeaderType::Request, false, BROADCAST, component, 0),
                data_length: 0,
            },
            payload: SmartPayload::empty(),
        }
    }

    /// The frame header.
    pub fn tcp_header(&self) -> &TcpHeader {
        &self.tcp_header
    }

    /// Frame type.
    pub fn kind(&self) -> TcpMessageType {
        self.tcp_header.kind
    }

    /// The embedded packet header.
    pub fn header(&self) -> &Header {
        &self.tcp_header.header
    }

    /// The payload.
    pub fn payload(&self) -> &SmartPayload {
        &self.payload
    }

    /// Encoded size: header plus payload.
    pub fn message_length(&self) -> usize {
        TCP_HEADER_SIZE + self.payload.len()
    }

    /// Encodes the whole frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.message_length());
        bytes.extend_from_slice(&self.tcp_header.encode());
        bytes.extend_from_slice(self.payload.as_bytes());
        bytes
    }

    /// Unwraps the packet.
    pub fn into_message(self) -> Message {
        Message::new(self.tcp_header.header, self.payload)
    }
}

/// Reads one frame header.
///
/// # Errors
///
/// [`TransportError::ConnectionClosed`] on EOF, including EOF inside the header.
pub async fn read_tcp_header<R>(reader: &mut R) -> Result<TcpHeader, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; TCP_HEADER_SIZE];
    reader.read_exact(&mut bytes).await?;
    TcpHeader::decode(&bytes)
}

/// Reads the payload announced by `header`.
///
/// # Errors
///
/// [`TransportError::PayloadTooLarge`] if the announced length exceeds
/// `max_payload`, [`TransportError::ConnectionClosed`] on EOF.
pub async fn read_payload<R>(
    reader: &mut R,
    header: &TcpHeader,
    max_payload: usize,
) -> Result<SmartPayload, TransportError>
where
    R: AsyncRead + Unpin,
{
    let length = usize::from(header.data_length);
    if length > max_payload {
        return Err(TransportError::PayloadTooLarge {
            size: length,
            max: max_payload,
        });
    }
    if length == 0 {
        return Ok(SmartPayload::empty());
    }
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(SmartPayload::from(payload))
}

/// Reads one complete frame.
///
/// # Errors
///
/// See [`read_tcp_header`] and [`read_payload`].
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<TcpMessage, TransportError>
where
    R: AsyncRead + Unpin,
{
    let tcp_header = read_tcp_header(reader).await?;
    let payload = read_payload(reader, &tcp_header, max_payload).await?;
    Ok(TcpMessage {
        tcp_header,
        payload,
    })
}

/// Writes one complete frame and flushes the writer.
///
/// # Errors
///
/// [`TransportError::IoError`] if writing fails.
pub async fn write_frame<W>(writer: &mut W, message: &TcpMessage) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&message.encode())
        .await
        .map_err(|e| TransportError::IoError(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::IoError(e.to_string()))?;
    Ok(())
}
