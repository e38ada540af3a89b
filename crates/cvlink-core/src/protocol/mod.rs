//! Protocol module containing the frame types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_feedback, decode_request, encode_feedback, encode_request, encode_status_request,
    encode_verify, encode_write, DecodeError,
};
pub use messages::*;
