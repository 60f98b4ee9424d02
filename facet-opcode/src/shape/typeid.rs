//! Type identity for shapes.
//!
//! Shapes are built in `const` blocks, where a `TypeId` cannot be produced
//! yet, so a shape keeps the monomorphized `TypeId::of` and asks it when the
//! registry or the cache needs to compare two shapes.

use core::any::TypeId;
use core::fmt;
use core::hash::{Hash, Hasher};

/// The identity of the type a [`Shape`](crate::Shape) describes.
///
/// Two shapes are the same type exactly when their ids compare equal; this is
/// what the program cache keys roots on and what the registry's cycle guard
/// matches pending shapes against.
#[derive(Copy, Clone)]
pub struct ConstTypeId(fn() -> TypeId);

impl ConstTypeId {
    /// Identity of `T`.
    #[must_use]
    pub const fn of<T: ?Sized + 'static>() -> Self {
        Self(TypeId::of::<T>)
    }

    /// Resolves to the runtime [`TypeId`].
    pub fn get(self) -> TypeId {
        (self.0)()
    }
}

impl fmt::Debug for ConstTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.get().fmt(f)
    }
}

// Function pointers are compared through what they return: one generic
// instantiation can have several addresses across codegen units.
impl PartialEq for ConstTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Eq for ConstTypeId {}

impl Hash for ConstTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::Shaped;

    #[test]
    fn pointer_kinds_are_distinct_shapes() {
        assert_eq!(<Box<u8>>::SHAPE.id, <Box<u8>>::SHAPE.id);
        assert_ne!(<Box<u8>>::SHAPE.id, <Arc<u8>>::SHAPE.id);
        assert_ne!(<Option<u8>>::SHAPE.id, u8::SHAPE.id);
        assert_eq!(<Vec<String>>::SHAPE.id.get(), TypeId::of::<Vec<String>>());
    }

    #[test]
    fn roots_can_be_keyed_by_shape() {
        let mut roots = HashMap::new();
        roots.insert(<Option<Box<u8>>>::SHAPE.id, "boxed");
        roots.insert(<Option<u8>>::SHAPE.id, "inline");
        assert_eq!(roots.get(&ConstTypeId::of::<Option<Box<u8>>>()), Some(&"boxed"));
        assert_eq!(roots.get(&ConstTypeId::of::<Option<u8>>()), Some(&"inline"));
        assert_eq!(roots.get(&ConstTypeId::of::<Option<u16>>()), None);
    }
}
