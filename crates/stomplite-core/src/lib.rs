//! stomplite-core - STOMP frame types and codec.
//!
//! This crate provides the `Frame` value type, the command and header
//! containers, and the NUL-delimited codec shared by the client crate.

pub mod codec;
pub mod decoder;
pub mod error;
pub mod frame;

pub use codec::{decode, decode_frame, encode, encode_frame, ContentLength, Decoded, NUL};
pub use decoder::{DecodedFrames, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
pub use error::{ProtocolError, Result};
pub use frame::{header, Command, Frame, Headers};
