//! Static shape declarations.
//!
//! Every encodable type implements [`Shaped`], exposing a `&'static Shape`
//! that says how its bytes are laid out and which vtable functions can look
//! through it (follow a `Box`, check an `Option`, walk a `Vec`). Shapes point
//! at each other through [`ShapeFn`] so that self-referential types can be
//! declared without const-evaluation cycles.
//!
//! Shapes are the raw input of the encoder. The descriptor turns them into
//! [`TypeShape`](crate::TypeShape)s, which is where flattening, key precedence
//! and support checks happen.

use core::alloc::Layout;
use core::fmt;

mod flags;
mod impls;
mod macros;
mod ptr;
mod typeid;

pub use flags::FieldFlags;
pub use impls::{list_as_ptr, list_len, pointer_borrow};
pub use ptr::PtrConst;
pub use typeid::ConstTypeId;

/// A type that can describe its own layout to the encoder.
///
/// Implemented for scalars, strings, `Option`, smart pointers, `&'static T`,
/// `Vec`, arrays, boxed slices and maps. Structs implement it through
/// [`shaped_struct!`](crate::shaped_struct); types the encoder must refuse go
/// through [`shaped_opaque!`](crate::shaped_opaque).
///
/// # Safety
///
/// The executor reads values through `SHAPE` without checking it against the
/// type. The layout must be `Layout::new::<Self>()`, every field offset must
/// lie inside `Self` and be aligned for the field's type, and every vtable
/// function must accept a pointer to the type its definition names. A shape
/// that says `u128` over a `u8` makes the encoder read past the value.
///
/// The macros and the built-in impls uphold this; a hand-written impl has to
/// opt in explicitly:
///
/// ```compile_fail,E0200
/// use facet_opcode::{ConstTypeId, Def, ScalarKind, Shape, Shaped};
///
/// struct Narrow(u8);
///
/// impl Shaped for Narrow {
///     const SHAPE: &'static Shape = &const {
///         Shape {
///             id: ConstTypeId::of::<Narrow>(),
///             type_identifier: "Narrow",
///             type_name: core::any::type_name::<Narrow>,
///             layout: core::alloc::Layout::new::<Narrow>(),
///             def: Def::Scalar(ScalarKind::U128),
///         }
///     };
/// }
/// ```
pub unsafe trait Shaped: 'static {
    /// The shape of this type.
    const SHAPE: &'static Shape;
}

/// Returns `T`'s shape; used as a [`ShapeFn`] in declarations.
pub fn shape_of<T: Shaped>() -> &'static Shape {
    T::SHAPE
}

/// Checks, at compile time, that a field of type `F` at `offset` inside a
/// struct aligned to `parent_align` can be read in place. Rejects fields of
/// `#[repr(packed)]` structs.
#[doc(hidden)]
pub const fn aligned_offset<F>(offset: usize, parent_align: usize) -> usize {
    let align = core::mem::align_of::<F>();
    assert!(
        parent_align >= align && offset % align == 0,
        "shaped_struct! fields must be aligned for their type"
    );
    offset
}

/// Lazily returns a shape. The indirection allows cyclic type definitions.
pub type ShapeFn = fn() -> &'static Shape;

/// Describes one type: identity, layout and definition.
#[derive(Clone, Copy)]
pub struct Shape {
    /// Unique identity of the type.
    pub id: ConstTypeId,

    /// Short name, without module path or generic arguments (`"Option"`).
    pub type_identifier: &'static str,

    /// Full type name, for diagnostics.
    pub type_name: fn() -> &'static str,

    /// Size and alignment.
    pub layout: Layout,

    /// What kind of value this is and how to look inside it.
    pub def: Def,
}

impl Shape {
    /// Full type name, e.g. `core::option::Option<alloc::string::String>`.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        (self.type_name)()
    }
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Shape {}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("type", &self.type_name())
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .field("def", &self.def)
            .finish()
    }
}

/// The definition of a shape.
#[derive(Clone, Copy, Debug)]
pub enum Def {
    /// A number, boolean, character or string.
    Scalar(ScalarKind),

    /// A struct with named fields.
    Struct(StructDef),

    /// A reference that is always present: `Box<T>`, `Arc<T>`, `Rc<T>`, `&'static T`.
    Pointer(PointerDef),

    /// `Option<T>`.
    Option(OptionDef),

    /// Contiguous elements: `Vec<T>`, `[T; N]`, `Box<[T]>`.
    List(ListDef),

    /// Key/value pairs: `BTreeMap<K, V>`, `HashMap<K, V>`.
    Map(MapDef),

    /// A type whose contents the encoder cannot model.
    Opaque,
}

/// Scalar kinds the encoder knows how to emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ScalarKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
    I8,
    I16,
    I32,
    I64,
    I128,
    Isize,
    F32,
    F64,
    Char,
    /// `String`
    String,
    /// `&'static str`
    Str,
}

impl ScalarKind {
    /// Encoded as a JSON string.
    pub const fn is_string(self) -> bool {
        matches!(self, ScalarKind::Char | ScalarKind::String | ScalarKind::Str)
    }

    /// Encoded as a JSON integer.
    pub const fn is_integer(self) -> bool {
        !self.is_string() && !self.is_float() && !matches!(self, ScalarKind::Bool)
    }

    /// Encoded as a JSON number with a fractional representation.
    pub const fn is_float(self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }
}

/// Fields of a struct, in declaration order.
#[derive(Clone, Copy, Debug)]
pub struct StructDef {
    /// The fields.
    pub fields: &'static [Field],
}

/// Describes a field in a struct.
#[derive(Clone, Copy, Debug)]
pub struct Field {
    /// Rust name of the field.
    pub name: &'static str,

    /// JSON key.
    pub key: &'static str,

    /// Shape of the field's type.
    pub shape: ShapeFn,

    /// Byte offset in the struct (obtained through `core::mem::offset_of`).
    pub offset: usize,

    /// Encoding flags.
    pub flags: FieldFlags,
}

impl Field {
    /// Returns the shape of the field's type.
    #[inline]
    pub fn shape(&self) -> &'static Shape {
        (self.shape)()
    }
}

/// Borrow the pointee of a smart pointer or reference.
///
/// # Safety
/// The pointer must point to an initialized value of the pointer type.
pub type BorrowFn = unsafe fn(pointer: PtrConst) -> PtrConst;

/// Describes a reference that is never absent.
#[derive(Clone, Copy, Debug)]
pub struct PointerDef {
    /// Shape of the pointee.
    pub pointee: ShapeFn,
    /// cf. [`BorrowFn`]
    pub borrow: BorrowFn,
}

/// Get the value contained in an option, if present.
///
/// # Safety
/// The `option` parameter must point to an initialized option of the right type.
pub type OptionGetValueFn = unsafe fn(option: PtrConst) -> Option<PtrConst>;

/// Describes an `Option`.
#[derive(Clone, Copy, Debug)]
pub struct OptionDef {
    /// Shape of the wrapped type.
    pub inner: ShapeFn,
    /// cf. [`OptionGetValueFn`]
    pub get_value: OptionGetValueFn,
}

/// Number of elements in a list.
///
/// # Safety
/// The `list` parameter must point to an initialized list of the right type.
pub type ListLenFn = unsafe fn(list: PtrConst) -> usize;

/// Pointer to the first element of a list.
///
/// # Safety
/// The `list` parameter must point to an initialized list of the right type.
pub type ListAsPtrFn = unsafe fn(list: PtrConst) -> PtrConst;

/// Describes a list whose elements are laid out contiguously.
#[derive(Clone, Copy, Debug)]
pub struct ListDef {
    /// Shape of one element; its size is the stride.
    pub item: ShapeFn,
    /// cf. [`ListLenFn`]
    pub len: ListLenFn,
    /// cf. [`ListAsPtrFn`]
    pub as_ptr: ListAsPtrFn,
}

/// Number of entries in a map.
///
/// # Safety
/// The `map` parameter must point to an initialized map of the right type.
pub type MapLenFn = unsafe fn(map: PtrConst) -> usize;

/// Calls `f(key, value)` for every entry of a map, in the map's own order.
///
/// # Safety
/// The `map` parameter must point to an initialized map of the right type.
pub type MapForEachFn = unsafe fn(map: PtrConst, f: &mut dyn FnMut(PtrConst, PtrConst));

/// Describes a map.
#[derive(Clone, Copy)]
pub struct MapDef {
    /// Shape of the keys.
    pub key: ShapeFn,
    /// Shape of the values.
    pub value: ShapeFn,
    /// cf. [`MapLenFn`]
    pub len: MapLenFn,
    /// cf. [`MapForEachFn`]
    pub for_each: MapForEachFn,
}

impl fmt::Debug for MapDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapDef")
            .field("key", &(self.key)().type_identifier)
            .field("value", &(self.value)().type_identifier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_fields_keep_their_offset() {
        assert_eq!(aligned_offset::<u32>(8, 8), 8);
        assert_eq!(aligned_offset::<u8>(3, 4), 3);
    }

    #[test]
    #[should_panic(expected = "aligned for their type")]
    fn packed_fields_are_refused() {
        aligned_offset::<u32>(1, 1);
    }
}
