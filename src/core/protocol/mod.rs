// src/core/protocol/mod.rs

pub mod line_frame;
pub use line_frame::{LineFrame, LineFrameCodec, Reply, decode_reply};
