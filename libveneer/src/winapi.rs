//! Safe wrappers for the WinAPI calls the patcher depends on.
//!
//! Bodies are gated to Windows targets; the rest of the engine stays
//! platform-neutral so it can be built and tested against synthetic
//! buffers anywhere.

#![allow(unused_variables, unreachable_code)]

use thiserror::Error;

use crate::addr::Address;

#[cfg(target_os = "windows")]
use windows::{
    Win32::System::{
        Diagnostics::Debug::FlushInstructionCache,
        LibraryLoader::GetModuleHandleA,
        Memory::{
            MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
            VirtualProtect, VirtualQuery,
        },
        Threading::GetCurrentProcess,
    },
    core::PCSTR,
};

pub type Result<T> = core::result::Result<T, WinapiError>;

/// Custom error type for Windows API operations.
#[derive(Debug, Error)]
pub enum WinapiError {
    #[cfg(target_os = "windows")]
    #[error("Windows API error: {0}")]
    WinAPIError(#[from] windows::core::Error),

    #[error("Memory query failed with error {0}")]
    MemoryQueryFailed(u32),

    #[error("Memory not committed at address {0:#x}")]
    MemoryNotCommitted(usize),

    #[error("Invalid memory range: base={0:#x}, size={1}")]
    InvalidMemoryRange(usize, usize),

    #[error("Module HANDLE is NULL")]
    ModuleHandleNullError,

    #[error("Nul bytes found error: {0}")]
    NulError(#[from] std::ffi::NulError),
}

/// The protection flags observed on a region before we flipped it to RWX.
///
/// Created at the start of a single protected write, consumed by
/// [`protect_restore`] at its end. Never persisted.
#[derive(Clone, Copy, Debug)]
pub struct ProtectionToken(u32);

/// Flips `len` bytes at `addr` to execute+read+write.
///
/// Returns the previously-observed protection so the caller can restore
/// it once the write is done. On failure the region is untouched.
pub fn protect_execute_readwrite(addr: Address, len: usize) -> Result<ProtectionToken> {
    #[cfg(target_os = "windows")]
    {
        let mut old_protect = PAGE_PROTECTION_FLAGS(0);

        unsafe {
            VirtualProtect(addr.as_ptr(), len, PAGE_EXECUTE_READWRITE, &mut old_protect)?;
        }

        return Ok(ProtectionToken(old_protect.0));
    }

    #[cfg(not(target_os = "windows"))]
    unimplemented!("protect_execute_readwrite supported only for Windows target")
}

/// Restores the protection captured by [`protect_execute_readwrite`].
pub fn protect_restore(addr: Address, len: usize, token: ProtectionToken) -> Result<()> {
    #[cfg(target_os = "windows")]
    {
        let mut old_protect = PAGE_PROTECTION_FLAGS(0);

        unsafe {
            VirtualProtect(addr.as_ptr(), len, PAGE_PROTECTION_FLAGS(token.0), &mut old_protect)?;
        }

        return Ok(());
    }

    #[cfg(not(target_os = "windows"))]
    unimplemented!("protect_restore supported only for Windows target")
}

/// Checks that `[addr, addr + len)` lies inside a single committed region.
///
/// Patching never allocates: the target range must already be mapped by
/// the image we are modifying.
pub fn validate_committed(addr: Address, len: usize) -> Result<()> {
    if len == 0 {
        return Err(WinapiError::InvalidMemoryRange(addr.as_usize(), len));
    }

    #[cfg(target_os = "windows")]
    {
        use windows::Win32::Foundation::GetLastError;

        let mut info = MEMORY_BASIC_INFORMATION::default();
        let info_size = std::mem::size_of::<MEMORY_BASIC_INFORMATION>();

        let result = unsafe { VirtualQuery(Some(addr.as_ptr()), &mut info, info_size) };
        if result == 0 {
            let last_error = unsafe { GetLastError().0 };
            return Err(WinapiError::MemoryQueryFailed(last_error));
        }

        if info.State != MEM_COMMIT {
            return Err(WinapiError::MemoryNotCommitted(addr.as_usize()));
        }

        let base = info.BaseAddress as usize;
        let region_end = base
            .checked_add(info.RegionSize)
            .ok_or(WinapiError::InvalidMemoryRange(base, info.RegionSize))?;
        let target_end = addr
            .as_usize()
            .checked_add(len)
            .ok_or(WinapiError::InvalidMemoryRange(addr.as_usize(), len))?;

        if target_end > region_end {
            return Err(WinapiError::InvalidMemoryRange(addr.as_usize(), len));
        }

        return Ok(());
    }

    #[cfg(not(target_os = "windows"))]
    unimplemented!("validate_committed supported only for Windows target")
}

/// Resolves a loaded module's base address. `None` means the process
/// executable itself.
pub fn get_module_handle_a(module_name: Option<&str>) -> Result<Address> {
    #[cfg(target_os = "windows")]
    {
        let handle = match module_name {
            Some(name) => {
                let c_name = std::ffi::CString::new(name)?;
                unsafe { GetModuleHandleA(PCSTR(c_name.as_ptr() as *const u8))? }
            }
            None => unsafe { GetModuleHandleA(None)? },
        };

        if handle.0.is_null() {
            return Err(WinapiError::ModuleHandleNullError);
        }

        return Ok(Address::from_ptr(handle.0));
    }

    #[cfg(not(target_os = "windows"))]
    unimplemented!("get_module_handle_a supported only for Windows target")
}

/// WinAPI: FlushInstructionCache over the freshly patched range.
pub fn flush_instruction_cache(addr: Address, len: usize) -> Result<()> {
    #[cfg(target_os = "windows")]
    {
        unsafe {
            FlushInstructionCache(GetCurrentProcess(), Some(addr.as_ptr()), len)?;
        }

        return Ok(());
    }

    #[cfg(not(target_os = "windows"))]
    unimplemented!("flush_instruction_cache supported only for Windows target")
}
