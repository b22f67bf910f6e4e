use std::ffi::c_void;
use std::fmt;

/// An address inside an already-mapped image.
///
/// Deliberately opaque: it can be moved, offset and compared, but never
/// dereferenced directly. All reads and writes go through a
/// [`PatchMemory`](crate::memory::PatchMemory) implementation, which is
/// what keeps the engine exercisable against synthetic buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub fn from_ptr(ptr: *const c_void) -> Self {
        Self(ptr as usize)
    }

    /// Returns the address `count` bytes past this one.
    pub const fn offset(self, count: usize) -> Self {
        Self(self.0 + count)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}
