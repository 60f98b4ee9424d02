//! Opaque pointers
//!
//! `PtrConst` is the only pointer the encoder needs: programs never write to
//! the value they encode. It carries no lifetime; the executor ties it to the
//! borrow of the root value for the duration of a single encode call.

use core::fmt;

/// A type-erased, thin, read-only pointer.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PtrConst(*const u8);

impl fmt::Debug for PtrConst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

impl PtrConst {
    /// Creates a pointer to the referenced value.
    #[inline]
    pub const fn new<T>(value: &T) -> Self {
        Self(value as *const T as *const u8)
    }

    /// Creates a pointer from a raw pointer to a sized value.
    #[inline]
    pub const fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as *const u8)
    }

    /// Returns the underlying byte pointer.
    #[inline]
    pub const fn as_byte_ptr(self) -> *const u8 {
        self.0
    }

    /// Returns a pointer `offset` bytes further into the same allocation.
    ///
    /// # Safety
    /// `offset` must stay within the allocation this pointer points into.
    #[inline]
    pub unsafe fn field(self, offset: usize) -> Self {
        Self(unsafe { self.0.add(offset) })
    }

    /// Borrows the pointee as a `T`.
    ///
    /// # Safety
    /// - `T` must be the actual type of the pointee
    /// - the memory must be initialized and outlive `'a`
    #[inline]
    pub unsafe fn get<'a, T>(self) -> &'a T {
        unsafe { &*(self.0 as *const T) }
    }

    /// Copies the pointee out as a `T`.
    ///
    /// # Safety
    /// Same requirements as [`PtrConst::get`].
    #[inline]
    pub unsafe fn read<T: Copy>(self) -> T {
        unsafe { *self.get::<T>() }
    }
}
