//! OpenTick wire protocol implementation.
//!
//! This module contains the sans-IO encoding and decoding.
//!
//! # Structure
//!
//! - `frame`: Length prefix and frame classification
//! - `command`: Client → Server command records
//! - `codec`: BSON documents for commands and replies
//! - `types`: Common protocol types (Ticket, CommandKind, U32LE)

pub mod codec;
pub mod command;
pub mod frame;
pub mod types;

// Re-export commonly used types
pub use codec::{Reply, decode_reply, encode_command};
pub use command::{Command, MetaCommand, Statement};
pub use frame::FrameKind;
pub use types::{CommandKind, PreparedHandle, Ticket};
