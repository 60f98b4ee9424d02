//! `Shaped` implementations for standard library types.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::ops::Deref;
use std::collections::HashMap;

use super::{
    ConstTypeId, Def, ListDef, MapDef, OptionDef, PointerDef, PtrConst, ScalarKind, Shape, Shaped,
    shape_of,
};

/// Builds the shape of `T` around a definition.
pub(crate) const fn shape_for<T: 'static>(type_identifier: &'static str, def: Def) -> Shape {
    Shape {
        id: ConstTypeId::of::<T>(),
        type_identifier,
        type_name: core::any::type_name::<T>,
        layout: Layout::new::<T>(),
        def,
    }
}

macro_rules! impl_scalar {
    ($($ty:ty => $kind:ident, $ident:literal;)*) => {
        $(
            unsafe impl Shaped for $ty {
                const SHAPE: &'static Shape =
                    &const { shape_for::<$ty>($ident, Def::Scalar(ScalarKind::$kind)) };
            }
        )*
    };
}

impl_scalar! {
    bool => Bool, "bool";
    u8 => U8, "u8";
    u16 => U16, "u16";
    u32 => U32, "u32";
    u64 => U64, "u64";
    u128 => U128, "u128";
    usize => Usize, "usize";
    i8 => I8, "i8";
    i16 => I16, "i16";
    i32 => I32, "i32";
    i64 => I64, "i64";
    i128 => I128, "i128";
    isize => Isize, "isize";
    f32 => F32, "f32";
    f64 => F64, "f64";
    char => Char, "char";
    String => String, "String";
    &'static str => Str, "str";
}

/// Borrows the target of any `Deref` pointer.
///
/// # Safety
/// `pointer` must point to an initialized `P`.
pub unsafe fn pointer_borrow<P: Deref>(pointer: PtrConst) -> PtrConst
where
    P::Target: Sized,
{
    let p = unsafe { pointer.get::<P>() };
    PtrConst::new(&**p)
}

macro_rules! impl_pointer {
    ($($ptr:ident => $ident:literal;)*) => {
        $(
            unsafe impl<T: Shaped> Shaped for $ptr<T> {
                const SHAPE: &'static Shape = &const {
                    shape_for::<$ptr<T>>(
                        $ident,
                        Def::Pointer(PointerDef {
                            pointee: shape_of::<T>,
                            borrow: pointer_borrow::<$ptr<T>>,
                        }),
                    )
                };
            }
        )*
    };
}

impl_pointer! {
    Box => "Box";
    Arc => "Arc";
    Rc => "Rc";
}

unsafe impl<T: Shaped> Shaped for &'static T {
    const SHAPE: &'static Shape = &const {
        shape_for::<&'static T>(
            "&",
            Def::Pointer(PointerDef {
                pointee: shape_of::<T>,
                borrow: pointer_borrow::<&'static T>,
            }),
        )
    };
}

unsafe fn option_get_value<T>(option: PtrConst) -> Option<PtrConst> {
    unsafe { option.get::<Option<T>>() }.as_ref().map(PtrConst::new)
}

unsafe impl<T: Shaped> Shaped for Option<T> {
    const SHAPE: &'static Shape = &const {
        shape_for::<Option<T>>(
            "Option",
            Def::Option(OptionDef {
                inner: shape_of::<T>,
                get_value: option_get_value::<T>,
            }),
        )
    };
}

/// Number of elements of any contiguous container.
///
/// # Safety
/// `list` must point to an initialized `C`.
pub unsafe fn list_len<C: AsRef<[T]>, T>(list: PtrConst) -> usize {
    unsafe { list.get::<C>() }.as_ref().len()
}

/// First element of any contiguous container.
///
/// # Safety
/// `list` must point to an initialized `C`.
pub unsafe fn list_as_ptr<C: AsRef<[T]>, T>(list: PtrConst) -> PtrConst {
    PtrConst::from_ptr(unsafe { list.get::<C>() }.as_ref().as_ptr())
}

const fn list_def<C: AsRef<[T]>, T: Shaped>() -> Def {
    Def::List(ListDef {
        item: shape_of::<T>,
        len: list_len::<C, T>,
        as_ptr: list_as_ptr::<C, T>,
    })
}

unsafe impl<T: Shaped> Shaped for Vec<T> {
    const SHAPE: &'static Shape = &const { shape_for::<Vec<T>>("Vec", list_def::<Vec<T>, T>()) };
}

unsafe impl<T: Shaped, const N: usize> Shaped for [T; N] {
    const SHAPE: &'static Shape = &const { shape_for::<[T; N]>("[_]", list_def::<[T; N], T>()) };
}

unsafe impl<T: Shaped> Shaped for Box<[T]> {
    const SHAPE: &'static Shape =
        &const { shape_for::<Box<[T]>>("Box<[_]>", list_def::<Box<[T]>, T>()) };
}

unsafe fn btree_len<K, V>(map: PtrConst) -> usize {
    unsafe { map.get::<BTreeMap<K, V>>() }.len()
}

unsafe fn btree_for_each<K, V>(map: PtrConst, f: &mut dyn FnMut(PtrConst, PtrConst)) {
    for (k, v) in unsafe { map.get::<BTreeMap<K, V>>() } {
        f(PtrConst::new(k), PtrConst::new(v));
    }
}

unsafe impl<K: Shaped, V: Shaped> Shaped for BTreeMap<K, V> {
    const SHAPE: &'static Shape = &const {
        shape_for::<BTreeMap<K, V>>(
            "BTreeMap",
            Def::Map(MapDef {
                key: shape_of::<K>,
                value: shape_of::<V>,
                len: btree_len::<K, V>,
                for_each: btree_for_each::<K, V>,
            }),
        )
    };
}

unsafe fn hash_len<K, V, S>(map: PtrConst) -> usize {
    unsafe { map.get::<HashMap<K, V, S>>() }.len()
}

unsafe fn hash_for_each<K, V, S>(map: PtrConst, f: &mut dyn FnMut(PtrConst, PtrConst)) {
    for (k, v) in unsafe { map.get::<HashMap<K, V, S>>() } {
        f(PtrConst::new(k), PtrConst::new(v));
    }
}

unsafe impl<K: Shaped, V: Shaped, S: 'static> Shaped for HashMap<K, V, S> {
    const SHAPE: &'static Shape = &const {
        shape_for::<HashMap<K, V, S>>(
            "HashMap",
            Def::Map(MapDef {
                key: shape_of::<K>,
                value: shape_of::<V>,
                len: hash_len::<K, V, S>,
                for_each: hash_for_each::<K, V, S>,
            }),
        )
    };
}
