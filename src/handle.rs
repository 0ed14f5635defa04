//! Versioned handles to virtual resources.
//!
//! A handle names one resource slot at one point of its write history. Writing the
//! resource produces a new handle with a bumped version and the old one goes stale.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::resource::Resource;

/// Untyped handle: slot index plus the version it was issued at.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    pub(crate) index: u16,
    pub(crate) version: u16,
}

impl RawHandle {
    pub(crate) fn new(index: u16, version: u16) -> Self {
        Self { index, version }
    }

    #[inline]
    pub fn index(&self) -> u16 {
        self.index
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// The handle a write hands out: same slot, next version.
    pub(crate) fn next_version(self) -> Self {
        Self {
            index: self.index,
            version: self.version.wrapping_add(1),
        }
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.v{}", self.index, self.version)
    }
}

/// Typed handle to a virtual resource of kind `R`.
pub struct Handle<R: Resource> {
    pub(crate) raw: RawHandle,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Resource> Handle<R> {
    pub(crate) fn from_raw(raw: RawHandle) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    #[inline]
    pub fn index(&self) -> u16 {
        self.raw.index
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.raw.version
    }
}

impl<R: Resource> Clone for Handle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: Resource> Copy for Handle<R> {}

impl<R: Resource> PartialEq for Handle<R> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<R: Resource> Eq for Handle<R> {}

impl<R: Resource> Hash for Handle<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<R: Resource> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", R::KIND, self.raw)
    }
}

/// Indirection from a handle index to the resource it names and the node of its
/// current version. Writes move `node`; forwarding moves `resource` and poisons the slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceSlot {
    pub(crate) resource: u16,
    pub(crate) node: u16,
    pub(crate) forwarded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Texture;

    #[test]
    fn next_version_keeps_the_slot() {
        let handle = RawHandle::new(3, 7);
        let next = handle.next_version();
        assert_eq!(next.index(), 3);
        assert_eq!(next.version(), 8);
        assert_ne!(handle, next);
    }

    #[test]
    fn typed_handles_compare_by_raw_value() {
        let a = Handle::<Texture>::from_raw(RawHandle::new(1, 0));
        let b = a;
        assert_eq!(a, b);
        assert_ne!(a, Handle::<Texture>::from_raw(RawHandle::new(1, 1)));
        assert_eq!(format!("{a:?}"), "Texture#1.v0");
    }
}
