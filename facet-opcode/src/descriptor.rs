//! Type shape descriptors.
//!
//! A [`ShapeRegistry`] turns static [`Shape`]s into [`TypeShape`]s: the
//! encoder's view of a type, with flattened fields expanded in place, key
//! collisions settled and unsupported constructs rejected. Each concrete type
//! is described once per registry. Shapes refer to one another through
//! [`ShapeHandle`]s, so a type that contains itself is simply a handle that
//! points back up the graph.

use core::alloc::Layout;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{InvariantError, UnsupportedShapeError};
use crate::guard::ConstructionStack;
use crate::{
    BorrowFn, ConstTypeId, Def, FieldFlags, ListAsPtrFn, ListLenFn, MapForEachFn, MapLenFn,
    OptionGetValueFn, ScalarKind, Shape,
};

/// Index of a [`TypeShape`] in its [`ShapeRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeHandle(u32);

impl ShapeHandle {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position in the registry.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The encoder's description of one type.
#[derive(Debug)]
pub struct TypeShape {
    /// Where this shape lives in its registry.
    pub handle: ShapeHandle,
    /// Identity of the described type.
    pub id: ConstTypeId,
    /// Full type name.
    pub type_name: &'static str,
    /// Short type name.
    pub identifier: &'static str,
    /// Size and alignment.
    pub layout: Layout,
    /// How values of this type are encoded.
    pub kind: ShapeKind,
}

impl TypeShape {
    /// Fields of a struct shape; empty for every other kind.
    pub fn fields(&self) -> &[FieldShape] {
        match &self.kind {
            ShapeKind::Struct(s) => &s.fields,
            _ => &[],
        }
    }

    /// The shape behind a reference or inside a nullable wrapper.
    pub fn referenced(&self) -> Option<ShapeHandle> {
        match &self.kind {
            ShapeKind::Reference(r) => Some(r.pointee),
            ShapeKind::Nullable(n) => Some(n.inner),
            _ => None,
        }
    }
}

/// Kind of a [`TypeShape`].
#[derive(Debug, Clone)]
pub enum ShapeKind {
    /// A number or a character-free scalar.
    Scalar(ScalarKind),
    /// `String`, `&str` or `char`.
    String(ScalarKind),
    /// `bool`
    Boolean,
    /// A struct with named fields.
    Struct(StructShape),
    /// A pointer that is always present.
    Reference(ReferenceShape),
    /// Contiguous elements.
    Sequence(SequenceShape),
    /// Key/value pairs.
    Mapping(MappingShape),
    /// An optional value.
    Nullable(NullableShape),
}

impl ShapeKind {
    /// Name of the kind, for diagnostics and disassembly.
    pub fn category(&self) -> &'static str {
        match self {
            ShapeKind::Scalar(_) => "scalar",
            ShapeKind::String(_) => "string",
            ShapeKind::Boolean => "boolean",
            ShapeKind::Struct(_) => "struct",
            ShapeKind::Reference(_) => "reference",
            ShapeKind::Sequence(_) => "sequence",
            ShapeKind::Mapping(_) => "mapping",
            ShapeKind::Nullable(_) => "nullable",
        }
    }
}

/// Fields of a struct, flattened and deduplicated.
#[derive(Debug, Clone)]
pub struct StructShape {
    /// Fields in output order.
    pub fields: Vec<FieldShape>,
}

/// One encodable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldShape {
    /// Rust field name.
    pub name: &'static str,
    /// JSON key.
    pub key: &'static str,
    /// Shape of the field's type.
    pub shape: ShapeHandle,
    /// Offset from the start of the struct that owns this shape.
    pub offset: usize,
    /// Omit the key when the value is absent or empty.
    pub omit_empty: bool,
    /// How many flattened structs this field was hoisted through.
    pub depth: u32,
}

/// A pointer that is always present.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceShape {
    /// Shape of the pointee.
    pub pointee: ShapeHandle,
    /// Follows the pointer.
    pub borrow: BorrowFn,
}

/// An optional value.
#[derive(Debug, Clone, Copy)]
pub struct NullableShape {
    /// Shape of the wrapped value.
    pub inner: ShapeHandle,
    /// Returns the wrapped value if present.
    pub get_value: OptionGetValueFn,
}

/// Contiguous elements.
#[derive(Debug, Clone, Copy)]
pub struct SequenceShape {
    /// Shape of one element.
    pub element: ShapeHandle,
    /// Distance between two elements.
    pub stride: usize,
    /// Number of elements.
    pub len: ListLenFn,
    /// First element.
    pub as_ptr: ListAsPtrFn,
}

/// Key/value pairs whose keys are strings or integers.
#[derive(Debug, Clone, Copy)]
pub struct MappingShape {
    /// Kind of the keys.
    pub key: ScalarKind,
    /// Shape of the values.
    pub value: ShapeHandle,
    /// Number of entries.
    pub len: MapLenFn,
    /// Visits every entry.
    pub for_each: MapForEachFn,
}

#[derive(Debug)]
enum Slot {
    Pending { type_name: &'static str },
    Ready(Arc<TypeShape>),
}

/// Memoized store of [`TypeShape`]s.
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    slots: Vec<Slot>,
    by_type: HashMap<ConstTypeId, ShapeHandle>,
}

impl ShapeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of described shapes.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns `true` if nothing has been described yet.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Handle of an already-described type.
    pub fn lookup(&self, id: ConstTypeId) -> Option<ShapeHandle> {
        self.by_type.get(&id).copied()
    }

    /// The finished shape behind `handle`, if any.
    pub fn get(&self, handle: ShapeHandle) -> Option<&Arc<TypeShape>> {
        match self.slots.get(handle.index()) {
            Some(Slot::Ready(shape)) => Some(shape),
            _ => None,
        }
    }

    /// Like [`ShapeRegistry::get`], reporting a missing shape as an invariant
    /// violation attributed to `context`.
    pub(crate) fn ready(
        &self,
        handle: ShapeHandle,
        context: &'static str,
    ) -> Result<&Arc<TypeShape>, InvariantError> {
        match self.slots.get(handle.index()) {
            Some(Slot::Ready(shape)) => Ok(shape),
            Some(Slot::Pending { type_name }) => Err(InvariantError::new(
                context,
                format!("shape {handle} ({type_name}) is still under construction"),
            )),
            None => Err(InvariantError::new(
                context,
                format!("shape {handle} is not registered"),
            )),
        }
    }

    /// Describes `shape` and everything it reaches.
    ///
    /// On failure every slot reserved by this call is released, leaving the
    /// registry as it was.
    pub fn describe(&mut self, shape: &'static Shape) -> Result<ShapeHandle, UnsupportedShapeError> {
        let mark = self.slots.len();
        let mut stack = ConstructionStack::default();
        let result = self.build(shape, &mut stack);
        if result.is_err() {
            self.slots.truncate(mark);
            self.by_type.retain(|_, handle| handle.index() < mark);
        }
        result
    }

    fn build(
        &mut self,
        shape: &'static Shape,
        stack: &mut ConstructionStack,
    ) -> Result<ShapeHandle, UnsupportedShapeError> {
        if let Some(handle) = self.lookup(shape.id) {
            return Ok(handle);
        }
        if let Some(handle) = stack.pending(shape.id) {
            trace!("{} refers to itself, deferring to {handle}", shape.type_name());
            return Ok(handle);
        }

        let handle = ShapeHandle::from_index(self.slots.len());
        self.slots.push(Slot::Pending {
            type_name: shape.type_name(),
        });
        let depth = stack.depth();
        stack.push(shape.id, handle);

        let kind = self.build_kind(shape, stack);
        let kind = match kind {
            Ok(kind) => kind,
            Err(e) => {
                stack.truncate(depth);
                return Err(e);
            }
        };
        stack.pop(handle);

        trace!("described {} as {handle} ({})", shape.type_name(), kind.category());
        self.slots[handle.index()] = Slot::Ready(Arc::new(TypeShape {
            handle,
            id: shape.id,
            type_name: shape.type_name(),
            identifier: shape.type_identifier,
            layout: shape.layout,
            kind,
        }));
        self.by_type.insert(shape.id, handle);
        Ok(handle)
    }

    fn build_kind(
        &mut self,
        shape: &'static Shape,
        stack: &mut ConstructionStack,
    ) -> Result<ShapeKind, UnsupportedShapeError> {
        let kind = match shape.def {
            Def::Scalar(ScalarKind::Bool) => ShapeKind::Boolean,
            Def::Scalar(kind) if kind.is_string() => ShapeKind::String(kind),
            Def::Scalar(kind) => ShapeKind::Scalar(kind),
            Def::Struct(def) => ShapeKind::Struct(StructShape {
                fields: self.build_fields(shape, def.fields, stack)?,
            }),
            Def::Pointer(def) => ShapeKind::Reference(ReferenceShape {
                pointee: self.build((def.pointee)(), stack)?,
                borrow: def.borrow,
            }),
            Def::Option(def) => ShapeKind::Nullable(NullableShape {
                inner: self.build((def.inner)(), stack)?,
                get_value: def.get_value,
            }),
            Def::List(def) => {
                let item = (def.item)();
                ShapeKind::Sequence(SequenceShape {
                    element: self.build(item, stack)?,
                    stride: item.layout.size(),
                    len: def.len,
                    as_ptr: def.as_ptr,
                })
            }
            Def::Map(def) => {
                let key = match (def.key)().def {
                    Def::Scalar(kind) if kind.is_string() || kind.is_integer() => kind,
                    _ => {
                        return Err(UnsupportedShapeError {
                            type_name: shape.type_name(),
                            reason: "map keys must be strings or integers",
                        });
                    }
                };
                ShapeKind::Mapping(MappingShape {
                    key,
                    value: self.build((def.value)(), stack)?,
                    len: def.len,
                    for_each: def.for_each,
                })
            }
            Def::Opaque => {
                return Err(UnsupportedShapeError {
                    type_name: shape.type_name(),
                    reason: "type is opaque to the encoder",
                });
            }
        };
        Ok(kind)
    }

    fn build_fields(
        &mut self,
        owner: &'static Shape,
        fields: &'static [crate::Field],
        stack: &mut ConstructionStack,
    ) -> Result<Vec<FieldShape>, UnsupportedShapeError> {
        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            if field.flags.contains(FieldFlags::SKIP) {
                continue;
            }
            let field_shape = field.shape();

            if field.flags.contains(FieldFlags::FLATTEN) {
                if !matches!(field_shape.def, Def::Struct(_)) {
                    return Err(UnsupportedShapeError {
                        type_name: owner.type_name(),
                        reason: "only by-value structs can be flattened",
                    });
                }
                let handle = self.build(field_shape, stack)?;
                let Some(inner) = self.get(handle) else {
                    return Err(UnsupportedShapeError {
                        type_name: owner.type_name(),
                        reason: "a flattened struct cannot contain itself",
                    });
                };
                out.extend(inner.fields().iter().map(|f| FieldShape {
                    offset: field.offset + f.offset,
                    depth: f.depth + 1,
                    ..f.clone()
                }));
                continue;
            }

            out.push(FieldShape {
                name: field.name,
                key: field.key,
                shape: self.build(field_shape, stack)?,
                offset: field.offset,
                omit_empty: field.flags.contains(FieldFlags::OMIT_EMPTY),
                depth: 0,
            });
        }
        Ok(dominant_fields(out))
    }
}

/// Settles key collisions: the shallowest field wins, and several fields
/// sharing the shallowest depth drop each other.
fn dominant_fields(fields: Vec<FieldShape>) -> Vec<FieldShape> {
    let mut best: HashMap<&'static str, (u32, usize)> = HashMap::new();
    for f in &fields {
        best.entry(f.key)
            .and_modify(|(depth, count)| {
                if f.depth < *depth {
                    *depth = f.depth;
                    *count = 1;
                } else if f.depth == *depth {
                    *count += 1;
                }
            })
            .or_insert((f.depth, 1));
    }
    fields
        .into_iter()
        .filter(|f| matches!(best.get(f.key), Some(&(depth, 1)) if depth == f.depth))
        .collect()
}
