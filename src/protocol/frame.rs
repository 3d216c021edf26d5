//! Decoded frames.
//!
//! A [`Frame`] is one message on the wire: either a [`CallRequest`] or a
//! [`CallResponse`].
//!
//! # Example
//!
//! ```
//! use procwire_rpc::protocol::{CallResponse, Frame, FrameKind};
//!
//! let frame = Frame::Response(CallResponse::success("1", serde_json::json!(7)));
//! let encoded = frame.encode(2048).unwrap();
//! assert_eq!(encoded.kind, FrameKind::Response);
//!
//! let decoded = Frame::decode(&encoded.bytes).unwrap();
//! assert_eq!(decoded, frame);
//! ```

use crate::codec::JsonCodec;
use crate::error::Result;

use super::message::{CallRequest, CallResponse};
use super::wire_format::{encode_wire, split_wire, EncodedFrame, FrameKind};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(CallRequest),
    Response(CallResponse),
}

impl Frame {
    /// The discriminator of this frame.
    #[inline]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request(_) => FrameKind::Request,
            Frame::Response(_) => FrameKind::Response,
        }
    }

    /// The call id carried by this frame.
    #[inline]
    pub fn id(&self) -> &str {
        match self {
            Frame::Request(r) => &r.id,
            Frame::Response(r) => &r.id,
        }
    }

    /// Encode to wire bytes for the given chunk size.
    pub fn encode(&self, chunk_size: usize) -> Result<EncodedFrame> {
        let payload = match self {
            Frame::Request(r) => JsonCodec::encode(r)?,
            Frame::Response(r) => JsonCodec::encode(r)?,
        };
        Ok(encode_wire(self.kind(), &payload, chunk_size))
    }

    /// Decode from wire bytes, stripping padding.
    pub fn decode(wire: &[u8]) -> Result<Self> {
        let (kind, payload, _) = split_wire(wire)?;
        Self::decode_payload(kind, payload)
    }

    /// Decode a payload whose kind byte and padding were already removed.
    pub fn decode_payload(kind: FrameKind, payload: &[u8]) -> Result<Self> {
        Ok(match kind {
            FrameKind::Request => Frame::Request(JsonCodec::decode(payload)?),
            FrameKind::Response => Frame::Response(JsonCodec::decode(payload)?),
        })
    }
}

impl From<CallRequest> for Frame {
    fn from(request: CallRequest) -> Self {
        Frame::Request(request)
    }
}

impl From<CallResponse> for Frame {
    fn from(response: CallResponse) -> Self {
        Frame::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcwireError;
    use crate::protocol::{Parameter, PADDING_BYTE};
    use serde_json::json;

    #[test]
    fn test_request_frame_bytes() {
        let frame = Frame::Request(CallRequest::new("1", "Ping", vec![]));
        let encoded = frame.encode(2048).unwrap();

        assert_eq!(encoded.bytes[0], 0);
        assert_eq!(
            &encoded.bytes[1..],
            br#"{"id":"1","methodName":"Ping","parameters":[]}"#
        );
    }

    #[test]
    fn test_decode_request() {
        let frame = Frame::Request(CallRequest::new(
            "9",
            "Echo",
            vec![Parameter::new(json!("hi"))],
        ));
        let encoded = frame.encode(2048).unwrap();
        let decoded = Frame::decode(&encoded.bytes).unwrap();
        assert_eq!(decoded.kind(), FrameKind::Request);
        assert_eq!(decoded.id(), "9");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_padded_frame_decodes() {
        let frame = Frame::Response(CallResponse::success("1", json!(1)));
        let unpadded_len = frame.encode(2048).unwrap().wire_len();

        // Pick a chunk size that puts the frame exactly on a boundary.
        let encoded = frame.encode(unpadded_len).unwrap();
        assert!(encoded.padded);
        assert_eq!(encoded.bytes.last(), Some(&PADDING_BYTE));
        assert_eq!(Frame::decode(&encoded.bytes).unwrap(), frame);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = Frame::decode(b"\x05{}").unwrap_err();
        assert!(matches!(err, ProcwireError::Protocol(_)));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = Frame::decode(b"\x01{\"id\":").unwrap_err();
        assert!(matches!(err, ProcwireError::Json(_)));
    }

    #[test]
    fn test_from_messages() {
        let frame: Frame = CallResponse::failure("2", "nope").into();
        assert_eq!(frame.kind(), FrameKind::Response);
        assert_eq!(frame.id(), "2");
    }
}
