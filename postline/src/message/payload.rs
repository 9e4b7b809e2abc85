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
use std::sync::Arc;

use zerocopy::{FromBytes, Immutable, IntoBytes};

/// A shared, immutable byte buffer holding a packet's payload.
///
/// Cloning only bumps a reference count, so every copy of a [`Message`](super::Message)
/// sees the same bytes. The buffer is freed when the last clone is dropped.
/// The default value carries no payload.
///
/// Typed values go in through `zerocopy::IntoBytes` and come back out through
/// `zerocopy::FromBytes`; types declared with `#[postline_message]` implement both.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SmartPayload {
    bytes: Option<Arc<[u8]>>,
}

impl SmartPayload {
    /// A payload with no bytes.
    pub const fn empty() -> Self {
        Self { bytes: None }
    }

    /// Copies the bytes of a fixed-layout value into a new payload.
    pub fn from_value<T>(value: &T) -> Self
    where
        T: IntoBytes + Immutable + ?Sized,
    {
        Self::from_slice(value.as_bytes())
    }

    /// Copies raw bytes into a new payload.
    pub fn from_slice(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self {
                bytes: Some(Arc::from(bytes)),
            }
        }
    }

    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.bytes.as_deref().map_or(0, <[u8]>::len)
    }

    /// Whether the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }

    /// Reads the payload back as `T`.
    ///
    /// Returns `None` unless the payload is exactly `size_of::<T>()` bytes long.
    pub fn read<T: FromBytes>(&self) -> Option<T> {
        T::read_from_bytes(self.as_bytes()).ok()
    }

    /// Number of live clones sharing this buffer. Zero for an empty payload.
    pub fn share_count(&self) -> usize {
        self.bytes.as_ref().map_or(0, Arc::strong_count)
    }
}

impl<T> From<&T> for SmartPayload
where
    T: IntoBytes + Immutable + ?Sized,
{
    fn from(value: &T) -> Self {
        Self::from_value(value)
    }
}

impl From<Vec<u8>> for SmartPayload {
    fn from(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self {
                bytes: Some(Arc::from(bytes)),
            }
        }
    }
}

impl From<()> for SmartPayload {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

impl fmt::Debug for SmartPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartPayload")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

    #[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Debug, Clone, Copy, PartialEq)]
    #[repr(C)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_default_payload_is_empty() {
        let payload = SmartPayload::default();
        assert!(payload.is_empty());
        assert_eq!(payload.as_bytes(), &[] as &[u8]);
        assert_eq!(payload.share_count(), 0);
        assert_eq!(SmartPayload::from(()), payload);
    }

    #[test]
    fn test_typed_value_reads_back() {
        let position = Position { x: -4, y: 1024 };
        let payload = SmartPayload::from(&position);

        assert_eq!(payload.len(), 8);
        assert_eq!(payload.read::<Position>(), Some(position));
        assert_eq!(payload.read::<u32>(), None);
    }

    #[test]
    fn test_clones_share_one_buffer() {
        let payload = SmartPayload::from(vec![1u8, 2, 3]);
        let copy = payload.clone();

        assert_eq!(payload.share_count(), 2);
        assert!(std::ptr::eq(payload.as_bytes(), copy.as_bytes()));

        drop(copy);
        assert_eq!(payload.share_count(), 1);
    }
}
