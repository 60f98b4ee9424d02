//! Per-field encoding flags.

use core::fmt;
use core::ops::BitOr;

/// How a struct field is encoded, set through `#[json("key", FLAG, ...)]` in
/// [`shaped_struct!`](crate::shaped_struct).
///
/// The set operations are `const` so the macro can fold a field's flags into
/// its shape.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldFlags(u8);

impl FieldFlags {
    /// Leave the key out when the value is absent or its kind's zero value.
    pub const OMIT_EMPTY: Self = Self(1 << 0);
    /// Inline the fields of this by-value struct into the parent object.
    pub const FLATTEN: Self = Self(1 << 1);
    /// Never encode this field.
    pub const SKIP: Self = Self(1 << 2);

    const NAMES: [(Self, &'static str); 3] = [
        (Self::OMIT_EMPTY, "OMIT_EMPTY"),
        (Self::FLATTEN, "FLATTEN"),
        (Self::SKIP, "SKIP"),
    ];

    /// No flags: the field is always encoded under its key.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every flag of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `self` with the flags of `other` added.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for FieldFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for FieldFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .peekable();
        if set.peek().is_none() {
            return f.write_str("(none)");
        }
        for (i, name) in set.enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Def, Shaped, shaped_struct};

    shaped_struct! {
        struct Inner {
            #[json("x")]
            x: u8,
        }
    }

    shaped_struct! {
        struct Flagged {
            #[json("plain")]
            plain: u8,
            #[json("maybe", OMIT_EMPTY)]
            maybe: Option<u8>,
            #[json("inner", FLATTEN, OMIT_EMPTY)]
            inner: Inner,
            #[json("hidden", SKIP)]
            hidden: u8,
        }
    }

    fn flags_of<T: Shaped>() -> Vec<FieldFlags> {
        let Def::Struct(def) = T::SHAPE.def else {
            panic!("not a struct");
        };
        def.fields.iter().map(|field| field.flags).collect()
    }

    #[test]
    fn attribute_flags_land_on_the_field() {
        let flags = flags_of::<Flagged>();
        assert_eq!(flags[0], FieldFlags::empty());
        assert_eq!(flags[1], FieldFlags::OMIT_EMPTY);
        assert_eq!(flags[2], FieldFlags::FLATTEN | FieldFlags::OMIT_EMPTY);
        assert!(flags[2].contains(FieldFlags::FLATTEN));
        assert!(!flags[2].contains(FieldFlags::SKIP));
        assert!(flags[3].contains(FieldFlags::SKIP));
    }

    #[test]
    fn debug_lists_flag_names() {
        assert_eq!(format!("{:?}", FieldFlags::empty()), "(none)");
        assert_eq!(
            format!("{:?}", FieldFlags::SKIP | FieldFlags::OMIT_EMPTY),
            "OMIT_EMPTY | SKIP"
        );
    }
}
