//! Packet parsing and construction.
//!
//! The forwarder fast path never materializes packets: `parse_packet` is a
//! sanity check that locates the name inside the raw bytes. The consumer
//! side uses the full `Interest`/`ContentObject` types.

use crate::error::{Error, Result};
use crate::name::Name;
use crate::tlv::{self, NakCode, PacketHdr};
use bytes::{Buf, Bytes, BytesMut};

/* ---------------------------------------------------------------- *\
 * Fast-path parse
\* ---------------------------------------------------------------- */

/// The outcome of the quickie sanity check: lengths verified, name located.
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    pub hdr: PacketHdr,
    pub msg_type: u16,
    /// Offset of the name TLV (including its T and L octets).
    pub name_offset: usize,
    /// Length of the name TLV, including the T and L octets.
    pub name_len: usize,
    /// Offset of the relevant hop-by-hop time TLV, if present: interest
    /// lifetime on interests, recommended cache time on content.
    lifetime_idx: Option<usize>,
}

impl ParsedPacket {
    /// The full name TLV bytes within `pkt`.
    pub fn name_slice<'a>(&self, pkt: &'a [u8]) -> &'a [u8] {
        &pkt[self.name_offset..self.name_offset + self.name_len]
    }

    /// Decodes the hop-by-hop time value (milliseconds): the interest
    /// lifetime (variable-length, up to 8 bytes) or the recommended cache
    /// time (fixed 8 bytes), depending on packet type.
    pub fn hop_time_ms(&self, pkt: &[u8]) -> Option<u64> {
        let idx = self.lifetime_idx?;
        let tlv_len = tlv::peek_tlv_length(&pkt[idx..]) as usize;
        let value = &pkt[idx + tlv::TLV_HDR_LEN..idx + tlv::TLV_HDR_LEN + tlv_len];
        match self.hdr.pkt_type {
            tlv::PKT_TYPE_INTEREST if tlv_len <= 8 => tlv::decode_varint(value).ok(),
            tlv::PKT_TYPE_CONTENT if tlv_len == 8 => {
                let mut a = [0u8; 8];
                a.copy_from_slice(value);
                Some(u64::from_be_bytes(a))
            }
            _ => None,
        }
    }
}

/// Quickie packet sanity check: verify lengths, locate the name.
///
/// Checks the version, the total-length field, the header length, and that
/// the message TLV leads with a name TLV whose length stays inside the
/// buffer. Anything else is the caller's business.
pub fn parse_packet(pkt: &[u8]) -> Result<ParsedPacket> {
    if pkt.len() < tlv::PACKET_MIN_LEN {
        return Err(Error::InvalidPacket(format!(
            "packet of {} bytes below minimum {}",
            pkt.len(),
            tlv::PACKET_MIN_LEN
        )));
    }

    let mut cursor = pkt;
    let hdr = PacketHdr::decode(&mut cursor)?;

    if hdr.pkt_len as usize > pkt.len() {
        return Err(Error::InvalidPacket("total length overruns buffer".into()));
    }

    let hdr_len = hdr.hdr_len as usize;
    // Must leave room for at least a message TLV and a name TLV.
    if hdr_len < tlv::PACKET_HDR_LEN || hdr_len + 8 > pkt.len() {
        return Err(Error::InvalidPacket("bad header length".into()));
    }

    // Walk the hop-by-hop options between the fixed header and the message.
    let mut lifetime_idx = None;
    let mut opt = tlv::PACKET_HDR_LEN;
    while opt < hdr_len {
        if hdr_len - opt < tlv::TLV_HDR_LEN {
            return Err(Error::InvalidPacket("truncated hop-by-hop TLV".into()));
        }
        let opt_type = tlv::peek_tlv_type(&pkt[opt..]);
        let opt_len = tlv::TLV_HDR_LEN + tlv::peek_tlv_length(&pkt[opt..]) as usize;
        if opt + opt_len > hdr_len {
            return Err(Error::InvalidPacket("hop-by-hop TLV overruns header".into()));
        }
        match opt_type {
            tlv::HDR_TLV_INT_LIFETIME if hdr.pkt_type == tlv::PKT_TYPE_INTEREST => {
                lifetime_idx = Some(opt);
            }
            tlv::HDR_TLV_CACHE_TIME if hdr.pkt_type == tlv::PKT_TYPE_CONTENT => {
                lifetime_idx = Some(opt);
            }
            _ => {}
        }
        opt += opt_len;
    }

    // Message TLV.
    let msg = hdr_len;
    let msg_type = tlv::peek_tlv_type(&pkt[msg..]);
    let msg_len = tlv::peek_tlv_length(&pkt[msg..]) as usize;
    if msg + tlv::TLV_HDR_LEN + msg_len > pkt.len() || msg_len < 4 {
        return Err(Error::InvalidPacket("bad message TLV length".into()));
    }

    // The name must come first in the message.
    let name_offset = msg + tlv::TLV_HDR_LEN;
    if tlv::peek_tlv_type(&pkt[name_offset..]) != tlv::TLV_NAME {
        return Err(Error::InvalidPacket("message does not lead with a name".into()));
    }
    let name_vlen = tlv::peek_tlv_length(&pkt[name_offset..]) as usize;
    let name_len = tlv::TLV_HDR_LEN + name_vlen;
    if name_offset + name_len > pkt.len() {
        return Err(Error::InvalidPacket("name TLV overruns buffer".into()));
    }

    Ok(ParsedPacket {
        hdr,
        msg_type,
        name_offset,
        name_len,
        lifetime_idx,
    })
}

/* ---------------------------------------------------------------- *\
 * Interest
\* ---------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq)]
pub struct Interest {
    pub name: Name,
    pub lifetime_ms: Option<u64>,
    pub hop_limit: u8,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            lifetime_ms: None,
            hop_limit: tlv::DEFAULT_HOP_LIMIT,
        }
    }

    pub fn with_lifetime(mut self, lifetime_ms: u64) -> Self {
        self.lifetime_ms = Some(lifetime_ms);
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Encodes a complete interest packet.
    pub fn encode(&self) -> Bytes {
        let mut hop = BytesMut::new();
        if let Some(lifetime) = self.lifetime_ms {
            let mut v = BytesMut::new();
            tlv::encode_varint(lifetime, &mut v);
            tlv::encode_tlv(tlv::HDR_TLV_INT_LIFETIME, &v, &mut hop);
        }

        let mut msg = BytesMut::new();
        self.name.encode(&mut msg);

        encode_packet(tlv::PKT_TYPE_INTEREST, self.hop_limit, 0, &hop, tlv::MSG_TYPE_INTEREST, &msg)
    }

    /// Decodes an interest from a full packet.
    pub fn decode(pkt: &Bytes) -> Result<Self> {
        let parsed = parse_packet(pkt)?;
        if parsed.hdr.pkt_type != tlv::PKT_TYPE_INTEREST {
            return Err(Error::InvalidPacket("not an interest packet".into()));
        }
        let mut name_bytes = pkt.slice(parsed.name_offset..parsed.name_offset + parsed.name_len);
        let name = Name::decode(&mut name_bytes)?;
        Ok(Self {
            name,
            lifetime_ms: parsed.hop_time_ms(pkt),
            hop_limit: parsed.hdr.hop_limit,
        })
    }
}

/* ---------------------------------------------------------------- *\
 * ContentObject
\* ---------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq)]
pub struct ContentObject {
    pub name: Name,
    pub payload: Bytes,
    pub cache_time_ms: Option<u64>,
    pub expiry_ms: Option<u64>,
    /// Identifies the downstream path that delivered this object; carried
    /// in the fixed header's reserved byte on content packets.
    pub path_label: u8,
    /// Total wire size, filled on decode.
    pub packet_size: usize,
    /// Discriminates ordinary data from manifests.
    pub payload_type: tlv::PayloadType,
    /// Final chunk number, when the producer signals it.
    pub final_chunk: Option<u64>,
}

impl ContentObject {
    pub fn new(name: Name, payload: impl Into<Bytes>) -> Self {
        Self {
            name,
            payload: payload.into(),
            cache_time_ms: None,
            expiry_ms: None,
            path_label: 0,
            packet_size: 0,
            payload_type: tlv::PayloadType::Data,
            final_chunk: None,
        }
    }

    pub fn with_cache_time(mut self, ms: u64) -> Self {
        self.cache_time_ms = Some(ms);
        self
    }

    pub fn with_final_chunk(mut self, segment: u64) -> Self {
        self.final_chunk = Some(segment);
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn content(&self) -> &Bytes {
        &self.payload
    }

    pub fn encode(&self) -> Bytes {
        let mut hop = BytesMut::new();
        if let Some(cache) = self.cache_time_ms {
            let mut v = BytesMut::new();
            v.extend_from_slice(&cache.to_be_bytes());
            tlv::encode_tlv(tlv::HDR_TLV_CACHE_TIME, &v, &mut hop);
        }

        let mut msg = BytesMut::new();
        self.name.encode(&mut msg);
        if let Some(expiry) = self.expiry_ms {
            tlv::encode_tlv(tlv::TLV_MSG_EXPIRY, &expiry.to_be_bytes(), &mut msg);
        }
        if let Some(final_chunk) = self.final_chunk {
            let mut v = BytesMut::new();
            tlv::encode_varint(final_chunk, &mut v);
            tlv::encode_tlv(tlv::TLV_FINAL_CHUNK, &v, &mut msg);
        }
        if self.payload_type != tlv::PayloadType::Data {
            tlv::encode_tlv(tlv::TLV_PAYLOAD_TYPE, &[self.payload_type as u8], &mut msg);
        }
        tlv::encode_tlv(tlv::TLV_PAYLOAD, &self.payload, &mut msg);

        encode_packet(
            tlv::PKT_TYPE_CONTENT,
            tlv::DEFAULT_HOP_LIMIT,
            self.path_label,
            &hop,
            tlv::MSG_TYPE_CONTENT,
            &msg,
        )
    }

    pub fn decode(pkt: &Bytes) -> Result<Self> {
        let parsed = parse_packet(pkt)?;
        if parsed.hdr.pkt_type != tlv::PKT_TYPE_CONTENT {
            return Err(Error::InvalidPacket("not a content packet".into()));
        }

        let mut name_bytes = pkt.slice(parsed.name_offset..parsed.name_offset + parsed.name_len);
        let name = Name::decode(&mut name_bytes)?;

        // Walk the remaining message TLVs after the name.
        let msg_start = parsed.hdr.hdr_len as usize;
        let msg_len = tlv::peek_tlv_length(&pkt[msg_start..]) as usize;
        let msg_end = msg_start + tlv::TLV_HDR_LEN + msg_len;
        let name_end = parsed.name_offset + parsed.name_len;
        if name_end > msg_end {
            return Err(Error::InvalidPacket("name overruns message TLV".into()));
        }
        let mut rest = pkt.slice(name_end..msg_end);

        let mut payload = Bytes::new();
        let mut expiry_ms = None;
        let mut final_chunk = None;
        let mut payload_type = tlv::PayloadType::Data;
        while rest.has_remaining() {
            let e = tlv::TlvElement::decode(&mut rest)?;
            match e.tlv_type {
                tlv::TLV_PAYLOAD => payload = e.value,
                tlv::TLV_MSG_EXPIRY if e.value.len() == 8 => {
                    let mut a = [0u8; 8];
                    a.copy_from_slice(&e.value);
                    expiry_ms = Some(u64::from_be_bytes(a));
                }
                tlv::TLV_PAYLOAD_TYPE if !e.value.is_empty() => {
                    payload_type = tlv::PayloadType::from_u8(e.value[0]);
                }
                tlv::TLV_FINAL_CHUNK => final_chunk = tlv::decode_varint(&e.value).ok(),
                _ => {} // unknown inner TLVs are skipped
            }
        }

        Ok(Self {
            name,
            payload,
            cache_time_ms: parsed.hop_time_ms(pkt),
            expiry_ms,
            path_label: parsed.hdr.reserved,
            packet_size: pkt.len(),
            payload_type,
            final_chunk,
        })
    }
}

/* ---------------------------------------------------------------- *\
 * NAK
\* ---------------------------------------------------------------- */

/// Builds a NAK echoing an interest's message body.
pub fn encode_nak(code: NakCode, interest_pkt: &[u8]) -> Result<Bytes> {
    let parsed = parse_packet(interest_pkt)?;
    let msg_start = parsed.hdr.hdr_len as usize;
    let msg = &interest_pkt[msg_start..];

    let mut buf = BytesMut::with_capacity(tlv::PACKET_HDR_LEN + msg.len());
    let mut hdr = PacketHdr::new(tlv::PKT_TYPE_NAK);
    hdr.pkt_len = (tlv::PACKET_HDR_LEN + msg.len()) as u16;
    hdr.reserved = code as u8;
    hdr.encode(&mut buf);
    buf.extend_from_slice(msg);
    Ok(buf.freeze())
}

/// Extracts the NAK code from a parsed NAK packet.
pub fn nak_code(parsed: &ParsedPacket) -> Option<NakCode> {
    if parsed.hdr.pkt_type == tlv::PKT_TYPE_NAK {
        NakCode::from_u8(parsed.hdr.reserved)
    } else {
        None
    }
}

/* ---------------------------------------------------------------- *\
 * Shared encode helper
\* ---------------------------------------------------------------- */

fn encode_packet(
    pkt_type: u8,
    hop_limit: u8,
    reserved: u8,
    hop_tlvs: &[u8],
    msg_type: u16,
    msg_body: &[u8],
) -> Bytes {
    let hdr_len = tlv::PACKET_HDR_LEN + hop_tlvs.len();
    let total = hdr_len + tlv::TLV_HDR_LEN + msg_body.len();

    let mut buf = BytesMut::with_capacity(total);
    let mut hdr = PacketHdr::new(pkt_type);
    hdr.pkt_len = total as u16;
    hdr.hop_limit = hop_limit;
    hdr.reserved = reserved;
    hdr.hdr_len = hdr_len as u8;
    hdr.encode(&mut buf);
    buf.extend_from_slice(hop_tlvs);
    tlv::encode_tlv(msg_type, msg_body, &mut buf);
    buf.freeze()
}

/// Builds a control packet (request or reply) carrying an opaque payload.
pub fn encode_control(pkt_type: u8, body: &[u8]) -> Bytes {
    let mut msg = BytesMut::new();
    Name::new().encode(&mut msg);
    tlv::encode_tlv(tlv::TLV_PAYLOAD, body, &mut msg);
    encode_packet(pkt_type, tlv::DEFAULT_HOP_LIMIT, 0, &[], tlv::MSG_TYPE_CONTENT, &msg)
}

/// Extracts the payload TLV of a control packet.
pub fn decode_control(pkt: &Bytes) -> Result<Bytes> {
    if pkt.len() < tlv::PACKET_HDR_LEN {
        return Err(Error::InvalidPacket("short control packet".into()));
    }
    let mut cursor = pkt.clone();
    let hdr = PacketHdr::decode(&mut cursor)?;
    if hdr.pkt_type != tlv::PKT_TYPE_CONTROL_REQUEST && hdr.pkt_type != tlv::PKT_TYPE_CONTROL_REPLY
    {
        return Err(Error::InvalidPacket("not a control packet".into()));
    }
    let mut msg = tlv::TlvElement::decode(&mut cursor)?.value;
    while msg.has_remaining() {
        let e = tlv::TlvElement::decode(&mut msg)?;
        if e.tlv_type == tlv::TLV_PAYLOAD {
            return Ok(e.value);
        }
    }
    Err(Error::InvalidPacket("control packet without payload".into()))
}
