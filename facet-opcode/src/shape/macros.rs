/// Declares a struct and implements [`Shaped`](crate::Shaped) for it.
///
/// Every field starts with a `#[json("key", FLAGS...)]` attribute naming its
/// JSON key and any [`FieldFlags`](crate::FieldFlags). Other attributes may
/// follow it.
///
/// ```
/// use facet_opcode::shaped_struct;
///
/// shaped_struct! {
///     #[derive(Debug, Default)]
///     pub struct Point {
///         #[json("x")]
///         pub x: i32,
///         #[json("label", OMIT_EMPTY)]
///         pub label: Option<String>,
///     }
/// }
///
/// assert_eq!(facet_opcode::to_string(&Point::default()).unwrap(), r#"{"x":0}"#);
/// ```
#[macro_export]
macro_rules! shaped_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident {
            $(
                #[json($key:literal $(, $flag:ident)* $(,)?)]
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $field_ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $Name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $field_ty,
            )*
        }

        unsafe impl $crate::Shaped for $Name {
            const SHAPE: &'static $crate::Shape = &const {
                $crate::Shape {
                    id: $crate::ConstTypeId::of::<$Name>(),
                    type_identifier: ::core::stringify!($Name),
                    type_name: ::core::any::type_name::<$Name>,
                    layout: ::core::alloc::Layout::new::<$Name>(),
                    def: $crate::Def::Struct($crate::StructDef {
                        fields: &[
                            $(
                                $crate::Field {
                                    name: ::core::stringify!($field),
                                    key: $key,
                                    shape: $crate::shape_of::<$field_ty>,
                                    offset: $crate::aligned_offset::<$field_ty>(
                                        ::core::mem::offset_of!($Name, $field),
                                        ::core::mem::align_of::<$Name>(),
                                    ),
                                    flags: $crate::FieldFlags::empty()
                                        $(.union($crate::FieldFlags::$flag))*,
                                },
                            )*
                        ],
                    }),
                }
            };
        }
    };
}

/// Implements [`Shaped`](crate::Shaped) for a type the encoder must refuse.
///
/// Compiling a program for a value that reaches an opaque shape fails with an
/// unsupported-shape error instead of guessing at its bytes.
#[macro_export]
macro_rules! shaped_opaque {
    ($($ty:ty),+ $(,)?) => {
        $(
            unsafe impl $crate::Shaped for $ty {
                const SHAPE: &'static $crate::Shape = &const {
                    $crate::Shape {
                        id: $crate::ConstTypeId::of::<$ty>(),
                        type_identifier: ::core::stringify!($ty),
                        type_name: ::core::any::type_name::<$ty>,
                        layout: ::core::alloc::Layout::new::<$ty>(),
                        def: $crate::Def::Opaque,
                    }
                };
            }
        )+
    };
}
