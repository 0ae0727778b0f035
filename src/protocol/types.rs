//! Common OpenTick wire protocol types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Correlation id carried by every command and its reply.
pub type Ticket = i64;

/// Server-assigned id of a prepared statement.
pub type PreparedHandle = i64;

/// Command kind, the `"1"` field of a command document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Execute SQL text or a prepared statement
    Run,
    /// Prepare SQL text and return a handle
    Prepare,
    /// Execute a prepared insert for many argument rows
    Batch,
    /// Select a database
    Use,
    /// Authenticate, optionally selecting a database
    Login,
    /// Administrative sub-command
    Meta,
}

impl CommandKind {
    /// Wire name of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Run => "run",
            CommandKind::Prepare => "prepare",
            CommandKind::Batch => "batch",
            CommandKind::Use => "use",
            CommandKind::Login => "login",
            CommandKind::Meta => "meta",
        }
    }
}

/// Little-endian 32-bit unsigned integer for zerocopy.
///
/// Frame length prefixes are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U32LE([u8; 4]);

impl U32LE {
    /// Create a new U32LE from a native u32.
    pub const fn new(value: u32) -> Self {
        Self(value.to_le_bytes())
    }

    /// Get the native u32 value.
    pub const fn get(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl From<u32> for U32LE {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<U32LE> for u32 {
    fn from(value: U32LE) -> Self {
        value.get()
    }
}
