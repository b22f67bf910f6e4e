use std::ops::Range;

use crate::addr::Address;
use crate::errors::PatchError;
use crate::winapi;
use crate::Result;

/// A live byte range inside an already-mapped image.
///
/// The engine never allocates or frees the range, it only temporarily
/// reclassifies its access rights. The length always matches exactly the
/// byte count being compared or written; partial-region writes are not a
/// thing here.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    addr: Address,
    len: usize,
}

impl Region {
    pub fn new(addr: Address, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(PatchError::InvalidSize);
        }

        Ok(Self { addr, len })
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// The seam between patch logic and the memory being patched.
///
/// Production code goes through [`ProcessMemory`]; tests and dry runs go
/// through [`BufferMemory`]. Patch semantics (verification, stub layout,
/// plan ordering) are identical either way.
pub trait PatchMemory {
    /// Reads the current bytes of `region`.
    fn read(&self, region: Region) -> Result<Vec<u8>>;

    /// Overwrites `region` with `bytes`, whose length must equal the
    /// region length. On error nothing has been written.
    fn write(&mut self, region: Region, bytes: &[u8]) -> Result<()>;
}

/// Patchable memory of the running process.
///
/// Writes follow the protected-write contract: flip the page protection
/// to execute+read+write, copy, restore the previously-observed
/// protection, flush the instruction cache. If the protection change is
/// denied the copy never happens.
///
/// No serialization against other threads executing the target bytes is
/// attempted; callers patch before the hooked path is ever reached.
pub struct ProcessMemory;

impl PatchMemory for ProcessMemory {
    fn read(&self, region: Region) -> Result<Vec<u8>> {
        winapi::validate_committed(region.addr, region.len)?;

        let mut buffer = vec![0u8; region.len];

        unsafe {
            std::ptr::copy_nonoverlapping(
                region.addr.as_ptr() as *const u8,
                buffer.as_mut_ptr(),
                region.len,
            );
        }

        Ok(buffer)
    }

    fn write(&mut self, region: Region, bytes: &[u8]) -> Result<()> {
        if bytes.len() != region.len {
            return Err(PatchError::SizeMismatch {
                expected: region.len,
                got: bytes.len(),
            });
        }

        winapi::validate_committed(region.addr, region.len)?;

        let token = winapi::protect_execute_readwrite(region.addr, region.len).map_err(
            |source| PatchError::ProtectionChangeFailed {
                addr: region.addr,
                source,
            },
        )?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                region.addr.as_ptr() as *mut u8,
                region.len,
            );
        }

        winapi::protect_restore(region.addr, region.len, token)?;
        winapi::flush_instruction_cache(region.addr, region.len)?;

        Ok(())
    }
}

/// A synthetic image: an owned byte buffer mapped at a chosen base
/// address.
///
/// Lets the whole engine, including full patch plans with real module
/// offsets, run against plain memory with no page protection involved.
pub struct BufferMemory {
    base: Address,
    bytes: Vec<u8>,
}

impl BufferMemory {
    /// Creates a zero-filled image of `size` bytes mapped at `base`.
    pub fn new(base: Address, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0u8; size],
        }
    }

    /// Wraps an existing image snapshot mapped at `base`.
    pub fn from_image(base: Address, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn range(&self, region: Region) -> Result<Range<usize>> {
        let start = region
            .addr()
            .as_usize()
            .checked_sub(self.base.as_usize())
            .ok_or(PatchError::OutOfBounds {
                addr: region.addr(),
                len: region.len(),
            })?;
        let end = start
            .checked_add(region.len())
            .filter(|end| *end <= self.bytes.len())
            .ok_or(PatchError::OutOfBounds {
                addr: region.addr(),
                len: region.len(),
            })?;

        Ok(start..end)
    }
}

impl PatchMemory for BufferMemory {
    fn read(&self, region: Region) -> Result<Vec<u8>> {
        let range = self.range(region)?;
        Ok(self.bytes[range].to_vec())
    }

    fn write(&mut self, region: Region, bytes: &[u8]) -> Result<()> {
        if bytes.len() != region.len() {
            return Err(PatchError::SizeMismatch {
                expected: region.len(),
                got: bytes.len(),
            });
        }

        let range = self.range(region)?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(all(test, target_os = "windows"))]
mod windows_tests {
    use super::*;
    use windows::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE_READ,
        VirtualAlloc, VirtualFree, VirtualQuery,
    };

    #[test]
    fn protection_is_restored_after_a_process_write() {
        unsafe {
            let ptr = VirtualAlloc(None, 0x1000, MEM_RESERVE | MEM_COMMIT, PAGE_EXECUTE_READ);
            assert!(!ptr.is_null());
            let addr = Address::from_ptr(ptr);

            let region = Region::new(addr, 4).unwrap();
            ProcessMemory.write(region, &[0x90, 0x90, 0x90, 0xc3]).unwrap();

            assert_eq!(
                ProcessMemory.read(region).unwrap(),
                vec![0x90, 0x90, 0x90, 0xc3]
            );

            // The write went through an RWX window; afterwards the page
            // must report the protection it was allocated with.
            let mut info = MEMORY_BASIC_INFORMATION::default();
            let queried = VirtualQuery(
                Some(ptr),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            );
            assert_ne!(queried, 0);
            assert_eq!(info.Protect, PAGE_EXECUTE_READ);

            VirtualFree(ptr, 0, MEM_RELEASE).unwrap();
        }
    }
}
