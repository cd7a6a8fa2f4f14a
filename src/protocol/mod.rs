//! Wire protocol: inbound command decoding and outbound frame shapes.

pub mod command;
pub mod frames;

pub use command::{decode_frame, Command};
