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

use static_assertions::assert_eq_size;
use zerocopy::{FromBytes, Immutable, IntoBytes, Unaligned};

use crate::message::CommunicationError;

/// Address of a component. Unique within one deployment.
pub type ComponentId = u8;

/// Action or event identifier. Unique per (component, header type).
pub type Identifier = u8;

/// Destination used for events. No component may use this id.
pub const BROADCAST: ComponentId = 0;

/// The kind of exchange a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeaderType {
    /// An action call, or an event when the destination is [`BROADCAST`].
    #[default]
    Request,
    /// A successful answer to a request.
    Response,
    /// A failed answer to a request.
    NegativeResponse,
}

impl HeaderType {
    const fn to_wire(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Response => 1,
            Self::NegativeResponse => 2,
        }
    }
}

impl TryFrom<u8> for HeaderType {
    type Error = CommunicationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::NegativeResponse),
            other => Err(CommunicationError::InvalidHeader(format!(
                "unknown header type {other}"
            ))),
        }
    }
}

impl fmt::Display for HeaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "REQUEST"),
            Self::Response => write!(f, "RESPONSE"),
            Self::NegativeResponse => write!(f, "NEGATIVE_RESPONSE"),
        }
    }
}

/// Routing metadata carried by every packet.
///
/// A header is fully determined at construction and never changes afterwards.
/// A destination of [`BROADCAST`] marks an event: it has no response and no
/// acknowledge path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Header {
    kind: HeaderType,
    is_acknowledge: bool,
    destination: ComponentId,
    source: ComponentId,
    packet_identifier: Identifier,
}

/// Wire layout of a [`Header`]: five bytes in field order.
#[derive(FromBytes, IntoBytes, Immutable, Unaligned, Clone, Copy, Debug, Default)]
#[repr(C)]
pub(crate) struct RawHeader {
    kind: u8,
    is_acknowledge: u8,
    destination: u8,
    source: u8,
    packet_identifier: u8,
}

assert_eq_size!(RawHeader, [u8; Header::SIZE]);

impl Header {
    /// Encoded size in bytes.
    pub const SIZE: usize = 5;

    /// Creates a header.
    pub const fn new(
        kind: HeaderType,
        is_acknowledge: bool,
        destination: ComponentId,
        source: ComponentId,
        packet_identifier: Identifier,
    ) -> Self {
        Self {
            kind,
            is_acknowledge,
            destination,
            source,
            packet_identifier,
        }
    }

    /// A request from `source` to `destination`.
    pub const fn request(
        destination: ComponentId,
        source: ComponentId,
        packet_identifier: Identifier,
    ) -> Self {
        Self::new(HeaderType::Request, false, destination, source, packet_identifier)
    }

    /// An event published by `source`.
    pub const fn event(source: ComponentId, packet_identifier: Identifier) -> Self {
        Self::new(HeaderType::Request, false, BROADCAST, source, packet_identifier)
    }

    /// Header type.
    pub const fn kind(&self) -> HeaderType {
        self.kind
    }

    /// Whether this header only acknowledges reception of another packet.
    pub const fn is_acknowledge(&self) -> bool {
        self.is_acknowledge
    }

    /// Destination component, [`BROADCAST`] for events.
    pub const fn destination(&self) -> ComponentId {
        self.destination
    }

    /// Source component.
    pub const fn source(&self) -> ComponentId {
        self.source
    }

    /// Action, event or response identifier.
    pub const fn packet_identifier(&self) -> Identifier {
        self.packet_identifier
    }

    /// Whether this header addresses every subscriber instead of one component.
    pub const fn is_event(&self) -> bool {
        self.destination == BROADCAST
    }

    /// Whether a receiver has to acknowledge this header when acknowledgements
    /// are enabled.
    pub const fn requires_acknowledge(&self) -> bool {
        !self.is_acknowledge && !self.is_event()
    }

    /// Builds the acknowledge header answering this one.
    pub const fn acknowledge(&self) -> Self {
        Self::new(
            self.kind,
            true,
            self.source,
            self.destination,
            self.packet_identifier,
        )
    }

    /// Whether `ack` acknowledges this header.
    pub fn is_acknowledged_by(&self, ack: &Header) -> bool {
        ack.is_acknowledge && *ack == self.acknowledge()
    }

    /// Encodes the header into its five-byte wire form.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(self.to_raw().as_bytes());
        bytes
    }

    /// Decodes a header from the first five bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::InvalidHeader`] when fewer than five bytes
    /// are given or the type tag is unknown.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommunicationError> {
        let prefix = bytes.get(..Self::SIZE).ok_or_else(|| {
            CommunicationError::InvalidHeader(format!(
                "need {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            ))
        })?;
        let raw = RawHeader::read_from_bytes(prefix)
            .map_err(|_| CommunicationError::InvalidHeader("malformed header".to_string()))?;
        Self::from_raw(raw)
    }

    pub(crate) const fn to_raw(self) -> RawHeader {
        RawHeader {
            kind: self.kind.to_wire(),
            is_acknowledge: self.is_acknowledge as u8,
            destination: self.destination,
            source: self.source,
            packet_identifier: self.packet_identifier,
        }
    }

    pub(crate) fn from_raw(raw: RawHeader) -> Result<Self, CommunicationError> {
        Ok(Self {
            kind: HeaderType::try_from(raw.kind)?,
            is_acknowledge: raw.is_acknowledge != 0,
            destination: raw.destination,
            source: raw.source,
            packet_identifier: raw.packet_identifier,
        })
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {:#04x} -> {:#04x} id={:#04x}",
            self.kind,
            if self.is_acknowledge { "+ACK" } else { "" },
            self.source,
            self.destination,
            self.packet_identifier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout_is_field_order() {
        let header = Header::new(HeaderType::NegativeResponse, true, 0x12, 0x34, 0x56);
        assert_eq!(header.to_bytes(), [2, 1, 0x12, 0x34, 0x56]);
        assert_eq!(Header::from_bytes(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn test_from_bytes_rejects_short_and_unknown_type() {
        assert!(matches!(
            Header::from_bytes(&[0, 0, 1]),
            Err(CommunicationError::InvalidHeader(_))
        ));
        assert!(matches!(
            Header::from_bytes(&[7, 0, 1, 2, 3]),
            Err(CommunicationError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_acknowledge_swaps_endpoints() {
        let request = Header::request(0x20, 0x10, 3);
        let ack = request.acknowledge();

        assert!(ack.is_acknowledge());
        assert_eq!(ack.source(), 0x20);
        assert_eq!(ack.destination(), 0x10);
        assert_eq!(ack.packet_identifier(), 3);
        assert!(request.is_acknowledged_by(&ack));
        assert!(!request.is_acknowledged_by(&Header::request(0x10, 0x20, 3)));
        assert!(!ack.requires_acknowledge());
    }

    #[test]
    fn test_events_are_broadcast() {
        let event = Header::event(0x10, 9);
        assert!(event.is_event());
        assert_eq!(event.kind(), HeaderType::Request);
        assert!(!event.requires_acknowledge());
        assert!(Header::request(0x11, 0x10, 9).requires_acknowledge());
    }
}
