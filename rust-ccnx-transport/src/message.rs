//! Framing for the portal <-> local-forwarder socket.
//!
//! Messages are whole packets: the eight-byte fixed header doubles as the
//! frame header, with `total_length` bounding the body that follows. The
//! reader takes the header first, validates it, then reads exactly
//! `total_length - 8` more bytes.

use bytes::{Bytes, BytesMut};
use rust_ccnx_common::error::{Error, Result};
use rust_ccnx_common::tlv::{PACKET_HDR_LEN, PROTO_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_LENGTH: usize = PACKET_HDR_LEN;
pub const MAX_PACKET_LENGTH: usize = u16::MAX as usize;

/// Validates a frame header and returns the total message length.
pub fn decode_header(hdr: &[u8; HEADER_LENGTH]) -> Result<usize> {
    if hdr[0] != PROTO_VERSION {
        return Err(Error::InvalidPacket(format!(
            "framing version {} unsupported",
            hdr[0]
        )));
    }
    let total = usize::from(u16::from_be_bytes([hdr[2], hdr[3]]));
    if total < HEADER_LENGTH {
        return Err(Error::InvalidPacket(format!(
            "frame length {} below header size",
            total
        )));
    }
    Ok(total)
}

/// Reads one framed message, header first, then the body.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let mut hdr = [0u8; HEADER_LENGTH];
    reader.read_exact(&mut hdr).await?;
    let total = decode_header(&hdr)?;

    let mut buf = BytesMut::with_capacity(total);
    buf.extend_from_slice(&hdr);
    buf.resize(total, 0);
    reader.read_exact(&mut buf[HEADER_LENGTH..]).await?;
    Ok(buf.freeze())
}
