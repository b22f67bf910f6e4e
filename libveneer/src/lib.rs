//! libveneer
//! Verified in-process code patching for already-loaded executable images.
//!
//! The engine redirects a relative call site to a handler that may live
//! anywhere in the address space, bridging the rel32 range limit with a
//! small absolute-jump stub ("veneer") written into nearby padding. Every
//! write is checked against an expected byte snapshot first, so a binary
//! that drifted from the one the patch was authored against turns into a
//! clean failure instead of silent corruption.
//!
//! Target addresses, expected encodings and the handler itself are
//! configuration supplied by the embedding plugin; the engine only moves
//! verified bytes.

pub mod addr;
pub mod errors;
pub mod func;
pub mod memory;
pub mod patcher;
pub mod plan;
pub mod trampoline;
pub mod winapi;

pub use addr::Address;
pub use errors::PatchError;
pub use func::FnPtr;
pub use memory::{BufferMemory, PatchMemory, ProcessMemory, Region};
pub use patcher::PatchDescriptor;
pub use plan::{PatchPlan, PatchStep, StepError, apply_all};
pub use trampoline::{Register, STUB_SIZE, build_stub};

pub type Result<T> = core::result::Result<T, errors::PatchError>;
