use std::{ffi::c_void, marker::PhantomData, ptr::NonNull};

use thiserror::Error;

use crate::addr::Address;

#[derive(Debug, Error)]
pub enum FnPtrError {
    #[error("Function pointer is NULL")]
    FunctionPtrIsNullError,

    #[error("Function pointer have wrong size (not match *mut c_void)")]
    FunctionPtrSizeError,
}

type Result<T> = core::result::Result<T, FnPtrError>;

/// Owned, fully-typed function pointer container.
///
/// The engine only ever needs a handler's absolute address, and the
/// driver needs to call original functions resolved from a module base.
/// `FnPtr` bridges both directions: a Rust fn item in, a raw address
/// out, or a raw address in, a correctly typed callable out. `T` must
/// be a function pointer type; only its size can be checked, so the
/// caller vouches for the rest.
#[derive(Copy, Clone, Debug)]
pub struct FnPtr<T: Copy + 'static> {
    raw_ptr: NonNull<c_void>,
    _phantom: PhantomData<T>,
}

impl<T: Copy + 'static> FnPtr<T> {
    fn check_size() -> Result<()> {
        // T must really be pointer-sized or the transmutes below are
        // unsound.
        if std::mem::size_of::<T>() != std::mem::size_of::<*mut c_void>() {
            return Err(FnPtrError::FunctionPtrSizeError);
        }

        Ok(())
    }

    pub fn from_addr(addr: Address) -> Result<Self> {
        Self::check_size()?;

        let ptr = NonNull::new(addr.as_ptr()).ok_or(FnPtrError::FunctionPtrIsNullError)?;

        Ok(Self {
            raw_ptr: ptr,
            _phantom: PhantomData,
        })
    }

    /// Takes a function pointer and returns it wrapped.
    pub fn from_fn(function: T) -> Result<Self> {
        Self::check_size()?;

        // SAFETY: size was checked above; a fn pointer is bit-compatible
        // with a thin raw pointer.
        let ptr: *mut c_void = unsafe { std::mem::transmute_copy(&function) };

        let ptr = NonNull::new(ptr).ok_or(FnPtrError::FunctionPtrIsNullError)?;

        Ok(Self {
            raw_ptr: ptr,
            _phantom: PhantomData,
        })
    }

    /// Returns the inner pointer transmuted back to its function type.
    pub fn as_fn(&self) -> T {
        let ptr_val = self.raw_ptr.as_ptr();

        // SAFETY: construction guaranteed the sizes match.
        unsafe { std::mem::transmute_copy(&ptr_val) }
    }

    /// The absolute address of the function.
    pub fn addr(&self) -> Address {
        Address::from_ptr(self.raw_ptr.as_ptr())
    }
}
