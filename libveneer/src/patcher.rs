use crate::addr::Address;
use crate::errors::PatchError;
use crate::memory::{PatchMemory, Region};
use crate::Result;

/// A single size-preserving patch: expected snapshot plus replacement
/// bytes for one target region.
///
/// The target binary's exact layout is a fragile external fact, so no
/// write is ever blind: the live bytes must match `expected` byte for
/// byte or the descriptor refuses to touch them. A mismatch means "this
/// build does not match the patch's assumptions" and is reported as a
/// clean failure instead of corrupting unknown code.
#[derive(Clone, Debug)]
pub struct PatchDescriptor {
    target: Address,
    expected: Vec<u8>,
    replacement: Vec<u8>,
}

impl PatchDescriptor {
    pub fn new(target: Address, expected: Vec<u8>, replacement: Vec<u8>) -> Result<Self> {
        if expected.is_empty() {
            return Err(PatchError::InvalidSize);
        }

        if expected.len() != replacement.len() {
            return Err(PatchError::SizeMismatch {
                expected: expected.len(),
                got: replacement.len(),
            });
        }

        Ok(Self {
            target,
            expected,
            replacement,
        })
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn len(&self) -> usize {
        self.expected.len()
    }

    pub fn expected(&self) -> &[u8] {
        &self.expected
    }

    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    /// Verifies the live bytes against `expected`, then overwrites them
    /// with the replacement.
    ///
    /// The comparison is always against current memory, never a cached
    /// snapshot, so applying the same descriptor twice fails the second
    /// time. On any error the region is left exactly as it was.
    pub fn apply<M: PatchMemory>(&self, mem: &mut M) -> Result<()> {
        let region = Region::new(self.target, self.expected.len())?;

        let found = mem.read(region)?;
        if found != self.expected {
            log::debug!(
                "[patch] mismatch at {}: expected {:02x?}, found {:02x?}",
                self.target,
                self.expected,
                found
            );

            return Err(PatchError::VerificationMismatch {
                addr: self.target,
                expected: self.expected.clone(),
                found,
            });
        }

        mem.write(region, &self.replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BufferMemory;

    const BASE: Address = Address::new(0x40_0000);

    fn image_with(offset: usize, bytes: &[u8]) -> BufferMemory {
        let mut mem = BufferMemory::new(BASE, 64);
        let region = Region::new(BASE.offset(offset), bytes.len()).unwrap();
        mem.write(region, bytes).unwrap();
        mem
    }

    #[test]
    fn descriptor_rejects_length_mismatch() {
        assert!(matches!(
            PatchDescriptor::new(BASE, vec![0x90, 0x90], vec![0x90]),
            Err(PatchError::SizeMismatch { .. })
        ));
        assert!(matches!(
            PatchDescriptor::new(BASE, vec![], vec![]),
            Err(PatchError::InvalidSize)
        ));
    }

    #[test]
    fn mismatch_leaves_region_unchanged() {
        let mut mem = image_with(4, &[0x48, 0x8b, 0xcd]);

        let patch = PatchDescriptor::new(
            BASE.offset(4),
            vec![0x48, 0x8b, 0xc8], // wrong last byte
            vec![0x90, 0x90, 0x90],
        )
        .unwrap();

        let err = patch.apply(&mut mem).unwrap_err();
        assert!(matches!(err, PatchError::VerificationMismatch { .. }));

        let region = Region::new(BASE.offset(4), 3).unwrap();
        assert_eq!(mem.read(region).unwrap(), vec![0x48, 0x8b, 0xcd]);
    }

    #[test]
    fn match_applies_and_second_apply_fails() {
        let mut mem = image_with(4, &[0x48, 0x8b, 0xcd]);

        let patch = PatchDescriptor::new(
            BASE.offset(4),
            vec![0x48, 0x8b, 0xcd],
            vec![0x90, 0x90, 0x90],
        )
        .unwrap();

        patch.apply(&mut mem).unwrap();

        let region = Region::new(BASE.offset(4), 3).unwrap();
        assert_eq!(mem.read(region).unwrap(), vec![0x90, 0x90, 0x90]);

        // The check runs against current bytes, which the first apply
        // just changed.
        assert!(matches!(
            patch.apply(&mut mem),
            Err(PatchError::VerificationMismatch { .. })
        ));
    }
}
