//! Protocol module - wire format, messages, and frame types.
//!
//! This module implements the protocol carried over the pipe:
//! - 1-byte kind prefix with chunk-boundary padding
//! - Call request/response messages (camelCase JSON)
//! - Frame enum tying the two together

mod frame;
mod message;
mod wire_format;

pub use frame::Frame;
pub use message::{CallRequest, CallResponse, Parameter};
pub use wire_format::{
    encode_wire, needs_padding, split_wire, EncodedFrame, FrameKind, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_FRAME_SIZE, KIND_SIZE, MIN_CHUNK_SIZE, PADDING_BYTE,
};
