//! Wire format encoding and decoding.
//!
//! Every frame is a single write:
//! ```text
//! ┌──────────┬──────────────────────┬──────────────┐
//! │ Kind     │ Payload              │ Padding      │
//! │ 1 byte   │ UTF-8 JSON, N bytes  │ 0 or 1 byte  │
//! │ 0=req    │                      │ 0x00         │
//! │ 1=resp   │                      │              │
//! └──────────┴──────────────────────┴──────────────┘
//! ```
//!
//! There is no length prefix. The receiver reads fixed-size chunks and treats
//! a short read as the end of the frame. A frame whose length is an exact
//! multiple of the chunk size would never produce a short read, so the sender
//! appends one padding byte in that case. JSON text never ends in a raw NUL,
//! which lets the receiver strip the padding unambiguously.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProcwireError, Result};

/// Size of the discriminator prefix in bytes.
pub const KIND_SIZE: usize = 1;

/// Default read chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Smallest usable chunk size. A chunk of 1 would make every frame look padded.
pub const MIN_CHUNK_SIZE: usize = 2;

/// Default maximum accumulated frame size (1 GB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_073_741_824;

/// Byte appended when a frame would otherwise end on a chunk boundary.
pub const PADDING_BYTE: u8 = 0x00;

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// A call request.
    Request = 0,
    /// A call response.
    Response = 1,
}

impl FrameKind {
    /// Parse a discriminator byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(FrameKind::Request),
            1 => Ok(FrameKind::Response),
            other => Err(ProcwireError::Protocol(format!(
                "Unknown frame kind {other:#04x}"
            ))),
        }
    }

    /// The discriminator byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Whether a payload of `payload_len` bytes needs a padding byte.
#[inline]
pub fn needs_padding(payload_len: usize, chunk_size: usize) -> bool {
    (payload_len + KIND_SIZE) % chunk_size == 0
}

/// An encoded frame ready to be written in one go.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub kind: FrameKind,
    pub bytes: Bytes,
    pub padded: bool,
}

impl EncodedFrame {
    /// Total bytes on the wire, padding included.
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Prefix the kind byte and pad if the frame would end on a chunk boundary.
///
/// # Example
///
/// ```
/// use procwire_rpc::protocol::{encode_wire, FrameKind};
///
/// let frame = encode_wire(FrameKind::Request, b"{}", 3);
/// assert!(frame.padded);
/// assert_eq!(&frame.bytes[..], &[0, b'{', b'}', 0]);
/// ```
pub fn encode_wire(kind: FrameKind, payload: &[u8], chunk_size: usize) -> EncodedFrame {
    let padded = needs_padding(payload.len(), chunk_size);
    let mut buf = BytesMut::with_capacity(KIND_SIZE + payload.len() + usize::from(padded));
    buf.put_u8(kind.as_byte());
    buf.put_slice(payload);
    if padded {
        buf.put_u8(PADDING_BYTE);
    }
    EncodedFrame {
        kind,
        bytes: buf.freeze(),
        padded,
    }
}

/// Split a received frame into its kind and payload, dropping any padding.
///
/// Returns the payload and whether a padding byte was stripped.
pub fn split_wire(frame: &[u8]) -> Result<(FrameKind, &[u8], bool)> {
    let (&first, rest) = frame
        .split_first()
        .ok_or_else(|| ProcwireError::Protocol("Empty frame".to_string()))?;
    let kind = FrameKind::from_byte(first)?;
    match rest.split_last() {
        Some((&PADDING_BYTE, payload)) => Ok((kind, payload, true)),
        _ => Ok((kind, rest, false)),
    }
}
