//! Offsets, expected encodings and resolved entry points for the one
//! game build this plugin targets.
//!
//! Everything in this module is configuration data, not mechanism: a
//! different game build means a different table here and no changes
//! anywhere else. The expected byte patterns below are what actually
//! ships in the binary, original call displacement included, so a
//! drifted build fails verification instead of getting corrupted.

use std::ffi::c_void;
use std::sync::OnceLock;

use anyhow::Context;

use libveneer::{Address, FnPtr, PatchPlan, PatchStep, Register};

/// The build-settings parser's call to `parse_string_array` for the
/// `enabledVRDevices` field.
pub const CALL_SITE_OFFSET: usize = 0x4c4770;

/// Inter-function int3 padding large enough for the stub, within rel32
/// range of the call site.
pub const SLOT_OFFSET: usize = 0x4c40f3;

/// Padding byte the slot is expected to hold.
pub const SLOT_FILL: u8 = 0xcc;

/// `parse_string_array(parser, dest)`
pub const PARSE_STRING_ARRAY_OFFSET: usize = 0xab780;

/// `vector<string>::resize(dest, new_len)`
pub const RESIZE_STRING_VECTOR_OFFSET: usize = 0xa92c0;

/// `string::assign(dest, data, len)`
pub const STRING_ASSIGN_OFFSET: usize = 0x47030;

/// Size of one `std::string` in the target's vector layout.
pub const STRING_STRIDE: usize = 40;

/// The call site as shipped:
///
/// ```text
///   48 8d 97 90 00 00 00    lea rdx, [rdi+0x90]
///   45 33 c0                xor r8d, r8d
///   48 8b cd                mov rcx, rbp
///   e8 fe 6f be ff          call parse_string_array
/// ```
pub const EXPECTED_CALL_SITE: [u8; 18] = [
    0x48, 0x8d, 0x97, 0x90, 0x00, 0x00, 0x00,
    0x45, 0x33, 0xc0,
    0x48, 0x8b, 0xcd,
    0xe8, 0xfe, 0x6f, 0xbe, 0xff,
];

/// Offset of the call's rel32 displacement within the expected window.
pub const CALL_DISP_OFFSET: usize = 14;

pub type ParseStringArrayFn = unsafe extern "C" fn(parser: *mut c_void, dest: *mut *mut u8);
pub type ResizeStringVectorFn = unsafe extern "C" fn(dest: *mut *mut u8, new_len: usize);
pub type StringAssignFn = unsafe extern "C" fn(dest: *mut c_void, data: *const u8, len: usize);

/// Game entry points resolved against the module base.
#[derive(Copy, Clone)]
pub struct GameApi {
    pub parse_string_array: ParseStringArrayFn,
    pub resize_string_vector: ResizeStringVectorFn,
    pub string_assign: StringAssignFn,
}

static GAME_API: OnceLock<GameApi> = OnceLock::new();

impl GameApi {
    pub fn resolve(base: Address) -> anyhow::Result<Self> {
        let parse_string_array = FnPtr::<ParseStringArrayFn>::from_addr(
            base.offset(PARSE_STRING_ARRAY_OFFSET),
        )
        .context("resolving parse_string_array")?
        .as_fn();

        let resize_string_vector = FnPtr::<ResizeStringVectorFn>::from_addr(
            base.offset(RESIZE_STRING_VECTOR_OFFSET),
        )
        .context("resolving vector<string>::resize")?
        .as_fn();

        let string_assign =
            FnPtr::<StringAssignFn>::from_addr(base.offset(STRING_ASSIGN_OFFSET))
                .context("resolving string::assign")?
                .as_fn();

        Ok(Self {
            parse_string_array,
            resize_string_vector,
            string_assign,
        })
    }

    /// Publishes the resolved entry points for the handler. One-shot;
    /// done before the call site is redirected.
    pub fn publish(self) {
        let _ = GAME_API.set(self);
    }

    pub fn get() -> Option<&'static GameApi> {
        GAME_API.get()
    }
}

/// Builds the two-step plan for this build: stub first, then the
/// call-site redirect, against the base the module actually loaded at.
pub fn patch_plan(base: Address, handler: Address) -> PatchPlan {
    let slot = base.offset(SLOT_OFFSET);

    let mut plan = PatchPlan::new();

    plan.push(PatchStep::InstallStub {
        name: "vr-devices handler stub",
        slot,
        fill: SLOT_FILL,
        handler,
        clobber: Register::Rax,
    });
    plan.push(PatchStep::RedirectCall {
        name: "enabledVRDevices parse call",
        call_site: base.offset(CALL_SITE_OFFSET),
        expected: EXPECTED_CALL_SITE.to_vec(),
        disp_offset: CALL_DISP_OFFSET,
        stub: slot,
    });

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use libveneer::memory::Region;
    use libveneer::{BufferMemory, PatchError, PatchMemory, STUB_SIZE, apply_all, build_stub};

    const BASE: Address = Address::new(0x1_4000_0000);
    const HANDLER: Address = Address::new(0x7ffd_0bad_f00d);

    /// A window of the shipped image around the patched offsets.
    fn shipped_image() -> BufferMemory {
        let mut mem = BufferMemory::new(BASE, 0x4c5000);

        mem.write(
            Region::new(BASE.offset(SLOT_OFFSET), STUB_SIZE + 1).unwrap(),
            &[SLOT_FILL; STUB_SIZE + 1],
        )
        .unwrap();
        mem.write(
            Region::new(BASE.offset(CALL_SITE_OFFSET), EXPECTED_CALL_SITE.len()).unwrap(),
            &EXPECTED_CALL_SITE,
        )
        .unwrap();

        mem
    }

    #[test]
    fn plan_installs_the_stub_before_the_redirect() {
        // The handler only becomes reachable once the redirect lands;
        // everything it depends on (the stub, the published API) must be
        // in place by then, so the redirect has to be the last step.
        let plan = patch_plan(BASE, HANDLER);

        assert!(matches!(plan.steps()[0], PatchStep::InstallStub { .. }));
        assert!(matches!(
            plan.steps()[plan.len() - 1],
            PatchStep::RedirectCall { .. }
        ));
    }

    #[test]
    fn shipped_call_targets_parse_string_array() {
        // The expected pattern must encode the original callee, or the
        // verification would pass on the wrong call.
        let disp = i32::from_le_bytes(EXPECTED_CALL_SITE[14..18].try_into().unwrap());
        let next = (CALL_SITE_OFFSET + CALL_DISP_OFFSET + 4) as i64;
        assert_eq!(next + disp as i64, PARSE_STRING_ARRAY_OFFSET as i64);
    }

    #[test]
    fn plan_rewrites_the_shipped_bytes() {
        let mut mem = shipped_image();

        apply_all(&mut mem, &patch_plan(BASE, HANDLER)).unwrap();

        let stub = mem
            .read(Region::new(BASE.offset(SLOT_OFFSET), STUB_SIZE).unwrap())
            .unwrap();
        assert_eq!(stub, build_stub(HANDLER, Register::Rax).to_vec());

        let site = mem
            .read(Region::new(BASE.offset(CALL_SITE_OFFSET), EXPECTED_CALL_SITE.len()).unwrap())
            .unwrap();
        // Preamble instructions are untouched; only the displacement
        // changed, and it now encodes slot - (call end).
        assert_eq!(&site[..CALL_DISP_OFFSET], &EXPECTED_CALL_SITE[..CALL_DISP_OFFSET]);
        assert_eq!(&site[CALL_DISP_OFFSET..], &[0x71, 0xf9, 0xff, 0xff]);
    }

    #[test]
    fn drifted_call_site_aborts_after_the_stub() {
        let mut mem = shipped_image();

        // Same padding, different parser code: simulate another build.
        mem.write(
            Region::new(BASE.offset(CALL_SITE_OFFSET + 1), 1).unwrap(),
            &[0x8c],
        )
        .unwrap();

        let err = apply_all(&mut mem, &patch_plan(BASE, HANDLER)).unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(err.source, PatchError::VerificationMismatch { .. }));

        // The stub step had already committed; the call site is still
        // exactly what this (hypothetical) build shipped.
        let stub = mem
            .read(Region::new(BASE.offset(SLOT_OFFSET), STUB_SIZE).unwrap())
            .unwrap();
        assert_eq!(stub, build_stub(HANDLER, Register::Rax).to_vec());
    }
}
