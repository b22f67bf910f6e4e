use thiserror::Error;

use crate::addr::Address;
use crate::winapi::WinapiError;

/// Error types for patching operations.
///
/// Every variant is fatal to the current run: a mismatch or a denied
/// protection change will not resolve itself on retry, so the plan
/// executor aborts on the first one it sees.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Invalid size parameter")]
    InvalidSize,

    #[error("Byte count {got} does not match region length {expected}")]
    SizeMismatch { expected: usize, got: usize },

    #[error("Region {addr} + {len} is outside the mapped image")]
    OutOfBounds { addr: Address, len: usize },

    #[error("Memory protection change failed at {addr}: {source}")]
    ProtectionChangeFailed {
        addr: Address,
        #[source]
        source: WinapiError,
    },

    #[error("Live bytes at {addr} do not match the expected encoding (expected {expected:02x?}, found {found:02x?})")]
    VerificationMismatch {
        addr: Address,
        expected: Vec<u8>,
        found: Vec<u8>,
    },

    #[error("Trampoline slot at {addr} does not contain the expected padding")]
    SlotNotEmpty { addr: Address },

    #[error("Stub at {stub} is outside rel32 range of call site {call_site}")]
    DisplacementOutOfRange { call_site: Address, stub: Address },

    #[error("WinAPI error: {0}")]
    Winapi(#[from] WinapiError),
}
