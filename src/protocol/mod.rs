//! WebSocket protocol core (RFC 6455): frames, masking, handshake and
//! message reassembly.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use frame::{Frame, FrameHeader, encode_frame};
pub use handshake::{ClientHandshake, HandshakeResponse, WS_GUID, compute_accept_key, generate_key};
pub use mask::{apply_mask, apply_mask_fast, random_mask};
pub use opcode::OpCode;
