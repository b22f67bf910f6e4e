//! Patch plan orchestration.
//!
//! A plan is an ordered list of steps executed strictly in order. The
//! first failure aborts the run and reports which step and which error
//! caused it; previously committed steps are not rolled back. Every
//! step is size-preserving and self-consistent, so a partially applied
//! plan leaves the process in a valid, if incomplete, patched state.
//!
//! Plans that install a stub and then redirect a call site to it must
//! list the stub write first: until the redirect lands, the call site
//! still points at its original, safe target.

use thiserror::Error;

use crate::addr::Address;
use crate::errors::PatchError;
use crate::memory::PatchMemory;
use crate::trampoline::{self, Register};

/// One entry of a patch plan.
#[derive(Clone, Debug)]
pub enum PatchStep {
    /// Write an absolute-jump stub into a padding slot.
    InstallStub {
        name: &'static str,
        slot: Address,
        fill: u8,
        handler: Address,
        clobber: Register,
    },

    /// Rewrite a relative call site to target a stub.
    RedirectCall {
        name: &'static str,
        call_site: Address,
        expected: Vec<u8>,
        disp_offset: usize,
        stub: Address,
    },
}

impl PatchStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InstallStub { name, .. } => name,
            Self::RedirectCall { name, .. } => name,
        }
    }

    fn apply<M: PatchMemory>(&self, mem: &mut M) -> Result<(), PatchError> {
        match self {
            Self::InstallStub {
                slot,
                fill,
                handler,
                clobber,
                ..
            } => trampoline::install_stub(mem, *slot, *fill, *handler, *clobber),

            Self::RedirectCall {
                call_site,
                expected,
                disp_offset,
                stub,
                ..
            } => trampoline::redirect_call_site(mem, *call_site, expected, *disp_offset, *stub),
        }
    }
}

/// An ordered sequence of patch steps.
#[derive(Clone, Debug, Default)]
pub struct PatchPlan {
    steps: Vec<PatchStep>,
}

impl PatchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: PatchStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[PatchStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Identifies the step that aborted a plan run.
#[derive(Debug, Error)]
#[error("patch step {index} ({name}) failed: {source}")]
pub struct StepError {
    pub index: usize,
    pub name: &'static str,
    #[source]
    pub source: PatchError,
}

/// Executes every step of `plan` in order against `mem`.
///
/// Aborts on the first failure; no retries (a verification mismatch or
/// a denied protection change is not transient) and no rollback of the
/// steps already committed.
pub fn apply_all<M: PatchMemory>(mem: &mut M, plan: &PatchPlan) -> Result<(), StepError> {
    log::info!("[plan] applying {} patch step(s)", plan.len());

    for (index, step) in plan.steps().iter().enumerate() {
        match step.apply(mem) {
            Ok(()) => {
                log::info!("[plan] step {} ({}) applied", index, step.name());
            }
            Err(source) => {
                log::error!("[plan] step {} ({}) failed: {}", index, step.name(), source);

                return Err(StepError {
                    index,
                    name: step.name(),
                    source,
                });
            }
        }
    }

    log::info!("[plan] all steps applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BufferMemory, Region};
    use crate::trampoline::STUB_SIZE;

    const BASE: Address = Address::new(0x40_0000);

    fn padded_image() -> BufferMemory {
        let mut mem = BufferMemory::new(BASE, 0x100);

        // Two padding slots and one call site: E8 00 10 00 00.
        for slot in [0x20, 0x40] {
            mem.write(
                Region::new(BASE.offset(slot), STUB_SIZE).unwrap(),
                &[0xcc; STUB_SIZE],
            )
            .unwrap();
        }
        mem.write(
            Region::new(BASE.offset(0x80), 5).unwrap(),
            &[0xe8, 0x00, 0x10, 0x00, 0x00],
        )
        .unwrap();

        mem
    }

    fn stub_step(name: &'static str, slot: usize) -> PatchStep {
        PatchStep::InstallStub {
            name,
            slot: BASE.offset(slot),
            fill: 0xcc,
            handler: Address::new(0x7fff_0000_1000),
            clobber: Register::Rax,
        }
    }

    #[test]
    fn steps_run_in_order_and_stop_at_first_failure() {
        let mut mem = padded_image();

        let mut plan = PatchPlan::new();
        plan.push(stub_step("first stub", 0x20));
        // Wrong expected encoding: the live call site ends 00 10 00 00.
        plan.push(PatchStep::RedirectCall {
            name: "bad redirect",
            call_site: BASE.offset(0x80),
            expected: vec![0xe8, 0xff, 0xff, 0xff, 0xff],
            disp_offset: 1,
            stub: BASE.offset(0x20),
        });
        plan.push(stub_step("second stub", 0x40));

        let err = apply_all(&mut mem, &plan).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.name, "bad redirect");
        assert!(matches!(err.source, PatchError::VerificationMismatch { .. }));

        // Step 0 committed, steps 1 and 2 untouched.
        let first = mem
            .read(Region::new(BASE.offset(0x20), STUB_SIZE).unwrap())
            .unwrap();
        assert_ne!(first, vec![0xcc; STUB_SIZE]);

        let call_site = mem.read(Region::new(BASE.offset(0x80), 5).unwrap()).unwrap();
        assert_eq!(call_site, vec![0xe8, 0x00, 0x10, 0x00, 0x00]);

        let second = mem
            .read(Region::new(BASE.offset(0x40), STUB_SIZE).unwrap())
            .unwrap();
        assert_eq!(second, vec![0xcc; STUB_SIZE]);
    }

    #[test]
    fn successful_plan_applies_every_step() {
        let mut mem = padded_image();

        let mut plan = PatchPlan::new();
        plan.push(stub_step("stub", 0x20));
        plan.push(PatchStep::RedirectCall {
            name: "redirect",
            call_site: BASE.offset(0x80),
            expected: vec![0xe8, 0x00, 0x10, 0x00, 0x00],
            disp_offset: 1,
            stub: BASE.offset(0x20),
        });

        apply_all(&mut mem, &plan).unwrap();

        let call_site = mem.read(Region::new(BASE.offset(0x80), 5).unwrap()).unwrap();
        assert_eq!(call_site[0], 0xe8);

        let disp = i32::from_le_bytes(call_site[1..5].try_into().unwrap());
        let next = BASE.offset(0x80).as_usize() as i64 + 5;
        assert_eq!(next + disp as i64, BASE.offset(0x20).as_usize() as i64);
    }
}
