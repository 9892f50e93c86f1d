//! CCNx names: ordered sequences of typed components.
//!
//! Two component types are distinguished: `Generic` and `Chunk` (the chunk
//! number, which terminates a name for prefix-matching purposes). The
//! textual form is `ccnx:/seg1/seg2` with percent-escaped bytes; it is used
//! only at CLI/config boundaries, never in hot paths.

use crate::error::Error;
use crate::tlv::{self, TlvElement};
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of components in a name.
pub const MAX_NAME_COMPONENTS: usize = 16;

/* ---------------------------------------------------------------- *\
 * NameComponent
\* ---------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    Generic,
    Chunk,
}

impl ComponentType {
    pub fn code(&self) -> u16 {
        match self {
            ComponentType::Generic => tlv::COMP_TYPE_GENERIC,
            ComponentType::Chunk => tlv::COMP_TYPE_CHUNK,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, Error> {
        match code {
            tlv::COMP_TYPE_GENERIC => Ok(ComponentType::Generic),
            tlv::COMP_TYPE_CHUNK => Ok(ComponentType::Chunk),
            other => Err(Error::InvalidPacket(format!(
                "unknown name component type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameComponent {
    pub comp_type: ComponentType,
    pub value: Bytes,
}

impl NameComponent {
    pub fn generic(bytes: impl Into<Bytes>) -> Self {
        Self {
            comp_type: ComponentType::Generic,
            value: bytes.into(),
        }
    }

    /// A chunk-number component, encoded as a minimal big-endian integer.
    pub fn chunk(segment: u64) -> Self {
        let mut buf = BytesMut::new();
        tlv::encode_varint(segment, &mut buf);
        Self {
            comp_type: ComponentType::Chunk,
            value: buf.freeze(),
        }
    }

    pub fn is_chunk(&self) -> bool {
        self.comp_type == ComponentType::Chunk
    }

    /// Decodes the chunk number; `None` for generic components.
    pub fn to_segment(&self) -> Option<u64> {
        if !self.is_chunk() {
            return None;
        }
        tlv::decode_varint(&self.value).ok()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        tlv::encode_tlv(self.comp_type.code(), &self.value, buf);
    }

    pub fn from_tlv(element: &TlvElement) -> Result<Self, Error> {
        Ok(Self {
            comp_type: ComponentType::from_code(element.tlv_type)?,
            value: element.value.clone(),
        })
    }

    /// Encoded size, including the TLV header.
    pub fn wire_size(&self) -> usize {
        tlv::TLV_HDR_LEN + self.value.len()
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(seg) = self.to_segment() {
            return write!(f, "chunk={}", seg);
        }
        for &b in &self.value {
            // Percent-escape the separator and anything non-printable.
            if b == b'/' || b == b'%' || !b.is_ascii_graphic() {
                write!(f, "%{:02X}", b)?;
            } else {
                write!(f, "{}", b as char)?;
            }
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------- *\
 * Name
\* ---------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Name {
    components: Vec<NameComponent>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the `ccnx:/a/b` textual form. The scheme prefix is optional;
    /// a trailing empty segment is allowed; `%XX` escapes are decoded.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        let rest = uri.strip_prefix("ccnx:").unwrap_or(uri);
        let rest = rest.strip_prefix('/').unwrap_or(rest);

        let mut components = Vec::new();
        if rest.is_empty() {
            return Ok(Self { components });
        }
        for seg in rest.split('/') {
            if seg.is_empty() {
                continue;
            }
            components.push(NameComponent::generic(percent_decode(seg)?));
        }
        Ok(Self { components })
    }

    pub fn push(&mut self, component: NameComponent) -> &mut Self {
        self.components.push(component);
        self
    }

    /// Appends a chunk-number component.
    pub fn append_segment(&mut self, segment: u64) -> &mut Self {
        self.components.push(NameComponent::chunk(segment));
        self
    }

    /// Returns a copy of this name with a chunk component appended.
    pub fn with_segment(&self, segment: u64) -> Self {
        let mut name = self.clone();
        name.append_segment(segment);
        name
    }

    /// The chunk number carried by the final component, if any.
    pub fn segment(&self) -> Option<u64> {
        self.components.last().and_then(|c| c.to_segment())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &NameComponent> {
        self.components.iter()
    }

    pub fn get(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    /// The prefix of length `len`: the first `len` components.
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            components: self.components.iter().take(len).cloned().collect(),
        }
    }

    /// The name without its final chunk component, if it has one.
    pub fn without_segment(&self) -> Self {
        match self.components.last() {
            Some(c) if c.is_chunk() => self.prefix(self.components.len() - 1),
            _ => self.clone(),
        }
    }

    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Encodes the bare component sequence, without a leading name TLV.
    pub fn encode_components(&self, buf: &mut BytesMut) {
        for component in &self.components {
            component.encode(buf);
        }
    }

    /// Encodes a full name TLV (header plus components).
    pub fn encode(&self, buf: &mut BytesMut) {
        let body: usize = self.components.iter().map(|c| c.wire_size()).sum();
        tlv::encode_tlv_hdr(tlv::TLV_NAME, body, buf);
        self.encode_components(buf);
    }

    /// Wire size of the full name TLV.
    pub fn wire_size(&self) -> usize {
        tlv::TLV_HDR_LEN + self.components.iter().map(|c| c.wire_size()).sum::<usize>()
    }

    /// The bare component bytes (the FIB/PIT hash key form).
    pub fn to_component_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_components(&mut buf);
        buf.freeze()
    }

    /// Decodes a full name TLV.
    pub fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        let element = TlvElement::decode(buf)?;
        if element.tlv_type != tlv::TLV_NAME {
            return Err(Error::InvalidPacket(format!(
                "expected name TLV type {}, got {}",
                tlv::TLV_NAME,
                element.tlv_type
            )));
        }
        Self::decode_components(element.value)
    }

    /// Decodes a bare component sequence.
    pub fn decode_components(mut buf: Bytes) -> Result<Self, Error> {
        let mut components = Vec::new();
        while buf.has_remaining() {
            let e = TlvElement::decode(&mut buf)?;
            components.push(NameComponent::from_tlv(&e)?);
        }
        Ok(Self { components })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ccnx:")?;
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

fn percent_decode(seg: &str) -> Result<Vec<u8>, Error> {
    let raw = seg.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            if i + 3 > raw.len() {
                return Err(Error::InvalidArgument(format!(
                    "truncated percent escape in '{}'",
                    seg
                )));
            }
            let hex = std::str::from_utf8(&raw[i + 1..i + 3])
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("bad percent escape in '{}'", seg))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_roundtrip() {
        let name = Name::from_uri("ccnx:/test/data/1").unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(&name.get(0).unwrap().value[..], b"test");
        assert_eq!(&name.get(1).unwrap().value[..], b"data");
        assert_eq!(&name.get(2).unwrap().value[..], b"1");
        assert_eq!(name.to_string(), "ccnx:/test/data/1");
    }

    #[test]
    fn test_uri_without_scheme() {
        let a = Name::from_uri("/a/b").unwrap();
        let b = Name::from_uri("ccnx:/a/b").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_uri_trailing_and_empty() {
        let name = Name::from_uri("ccnx:/a/b/").unwrap();
        assert_eq!(name.len(), 2);

        let root = Name::from_uri("ccnx:/").unwrap();
        assert!(root.is_empty());
        assert_eq!(root.to_string(), "ccnx:/");
    }

    #[test]
    fn test_percent_escapes() {
        let name = Name::from_uri("ccnx:/a%2Fb/c%25").unwrap();
        assert_eq!(&name.get(0).unwrap().value[..], b"a/b");
        assert_eq!(&name.get(1).unwrap().value[..], b"c%");
        // Re-emission escapes them again.
        assert_eq!(name.to_string(), "ccnx:/a%2Fb/c%25");

        assert!(Name::from_uri("ccnx:/a%2").is_err());
        assert!(Name::from_uri("ccnx:/a%zz").is_err());
    }

    #[test]
    fn test_prefix_matching() {
        let long = Name::from_uri("/a/b/c").unwrap();
        let short = Name::from_uri("/a/b").unwrap();
        let other = Name::from_uri("/a/x").unwrap();

        assert!(short.is_prefix_of(&long));
        assert!(!long.is_prefix_of(&short));
        assert!(!other.is_prefix_of(&long));
        assert_eq!(long.prefix(2), short);
    }

    #[test]
    fn test_segment_component() {
        let mut name = Name::from_uri("/video/seg").unwrap();
        name.append_segment(7);
        assert_eq!(name.segment(), Some(7));
        assert!(name.get(2).unwrap().is_chunk());
        assert_eq!(name.to_string(), "ccnx:/video/seg/chunk=7");

        let base = name.without_segment();
        assert_eq!(base.len(), 2);
        assert_eq!(base.segment(), None);
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut name = Name::from_uri("/a/b").unwrap();
        name.append_segment(3);

        let mut buf = BytesMut::new();
        name.encode(&mut buf);
        assert_eq!(buf.len(), name.wire_size());

        let mut frozen = buf.freeze();
        let decoded = Name::decode(&mut frozen).unwrap();
        assert_eq!(decoded, name);
    }
}
