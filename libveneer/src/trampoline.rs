//! Absolute-jump stub synthesis and rel32 call-site rewriting.
//!
//! A near call can only reach targets within a signed 32-bit
//! displacement. To route such a call to a handler loaded anywhere in
//! the address space, a 12-byte stub is written into padding near the
//! call site and the call's displacement is rewritten to point at it:
//!
//! ```text
//!   48 B8 xx xx xx xx xx xx xx xx    mov <reg>, handler
//!   FF E0                            jmp <reg>
//! ```
//!
//! The stub tail-transfers: it pushes no return address, so the call
//! instruction, the stub and the handler together behave as one call
//! with the handler's body substituted for the original callee.

use crate::addr::Address;
use crate::errors::PatchError;
use crate::memory::PatchMemory;
use crate::patcher::PatchDescriptor;
use crate::Result;

/// Encodes a x86-64 +rq register index.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
}

/// Size of the synthesized stub: mov reg, imm64 (10) + jmp reg (2).
pub const STUB_SIZE: usize = 12;

/// Width of the rel32 displacement field in a near call/jump.
pub const DISP_SIZE: usize = 4;

/// Assembles the absolute-jump stub for `handler`.
///
/// The chosen register is clobbered; that is the stub's only side
/// effect beyond the transfer itself.
pub fn build_stub(handler: Address, clobber: Register) -> [u8; STUB_SIZE] {
    let mut stub = [0u8; STUB_SIZE];

    stub[0] = 0x48;
    stub[1] = 0xb8 + clobber as u8;
    stub[2..10].copy_from_slice(&(handler.as_usize() as u64).to_le_bytes());
    stub[10] = 0xff;
    stub[11] = 0xe0 + clobber as u8;

    stub
}

/// Builds the slot-write descriptor: `STUB_SIZE` bytes of `fill`
/// padding expected, stub bytes installed.
///
/// The emptiness check covers exactly the stub's own length; any
/// trailing padding in the slot is left untouched. That policy is held
/// across the whole engine so slot sizing and verification always
/// agree.
pub fn stub_descriptor(
    slot: Address,
    fill: u8,
    handler: Address,
    clobber: Register,
) -> PatchDescriptor {
    let expected = vec![fill; STUB_SIZE];
    let replacement = build_stub(handler, clobber).to_vec();

    // Both sides are STUB_SIZE by construction.
    PatchDescriptor::new(slot, expected, replacement)
        .unwrap_or_else(|_| unreachable!("stub descriptor sides are fixed-size"))
}

/// Writes the stub into `slot` after verifying the slot still holds its
/// padding bytes. Pre-existing non-padding content means the slot
/// overlaps something live and surfaces as [`PatchError::SlotNotEmpty`].
pub fn install_stub<M: PatchMemory>(
    mem: &mut M,
    slot: Address,
    fill: u8,
    handler: Address,
    clobber: Register,
) -> Result<()> {
    log::debug!(
        "[stub] installing {STUB_SIZE}-byte stub at {slot} -> handler {handler} (clobbers {clobber:?})"
    );

    stub_descriptor(slot, fill, handler, clobber)
        .apply(mem)
        .map_err(|err| match err {
            PatchError::VerificationMismatch { addr, .. } => PatchError::SlotNotEmpty { addr },
            other => other,
        })
}

/// Computes the rel32 displacement from the call site to `stub`.
///
/// The displacement is relative to the address immediately following
/// the displacement field (which ends the call instruction). A stub
/// outside signed 32-bit range is a hard failure; the displacement is
/// never wrapped or truncated.
fn displacement_to(call_site: Address, disp_offset: usize, stub: Address) -> Result<i32> {
    let next = call_site.as_usize() + disp_offset + DISP_SIZE;
    let disp = stub.as_usize() as i64 - next as i64;

    i32::try_from(disp).map_err(|_| PatchError::DisplacementOutOfRange { call_site, stub })
}

/// Builds the call-site rewrite descriptor.
///
/// `expected` is the original instruction encoding as shipped,
/// including the original displacement bytes actually observed in the
/// binary; only the `DISP_SIZE` bytes at `disp_offset` differ in the
/// replacement. Expecting the real original displacement (not a
/// wildcard) means an unexpected original target is caught rather than
/// silently overwritten.
pub fn redirect_descriptor(
    call_site: Address,
    expected: &[u8],
    disp_offset: usize,
    stub: Address,
) -> Result<PatchDescriptor> {
    if disp_offset + DISP_SIZE > expected.len() {
        return Err(PatchError::InvalidSize);
    }

    let disp = displacement_to(call_site, disp_offset, stub)?;

    let mut replacement = expected.to_vec();
    replacement[disp_offset..disp_offset + DISP_SIZE].copy_from_slice(&disp.to_le_bytes());

    PatchDescriptor::new(call_site, expected.to_vec(), replacement)
}

/// Rewrites the call site to target `stub` instead of its original
/// callee, after verifying the site matches its shipped encoding.
pub fn redirect_call_site<M: PatchMemory>(
    mem: &mut M,
    call_site: Address,
    expected: &[u8],
    disp_offset: usize,
    stub: Address,
) -> Result<()> {
    log::debug!("[redirect] pointing call site {call_site} at stub {stub}");

    redirect_descriptor(call_site, expected, disp_offset, stub)?.apply(mem)
}
