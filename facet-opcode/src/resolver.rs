//! Indirection resolution.
//!
//! Before any instruction is emitted, the resolver works out which program
//! units a root type needs and, for every field of every struct unit, how many
//! reference hops separate the unit's entry pointer from the struct's storage.
//!
//! A struct is keyed by the hops it was reached through (its *reach*), not
//! just by its type: a by-value struct embedded in a parent that sits behind a
//! `Box` is loaded through that same `Box`, so it inherits the parent's reach.
//! A struct behind a reference field is different: the parent follows the
//! reference itself, and the struct starts over at reach zero.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::trace;

use crate::descriptor::{ShapeHandle, ShapeKind, ShapeRegistry};
use crate::error::InvariantError;
use crate::{BorrowFn, OptionGetValueFn, PtrConst};

/// Identity of a compiled program.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKey {
    /// A struct reached through `reach`, the shapes of the hops between the
    /// program's entry pointer and the struct.
    Object {
        /// The struct.
        shape: ShapeHandle,
        /// Reference and nullable shapes, outermost first.
        reach: Vec<ShapeHandle>,
    },
    /// Any value located exactly at the entry pointer.
    Value {
        /// Its shape.
        shape: ShapeHandle,
    },
}

impl ProgramKey {
    /// Key of the program that encodes a value of `shape` at the entry pointer.
    pub(crate) fn entry(registry: &ShapeRegistry, shape: ShapeHandle) -> Self {
        match registry.get(shape).map(|s| &s.kind) {
            Some(ShapeKind::Struct(_)) => ProgramKey::Object {
                shape,
                reach: Vec::new(),
            },
            _ => ProgramKey::Value { shape },
        }
    }

    /// The shape this program encodes.
    pub fn shape(&self) -> ShapeHandle {
        match self {
            ProgramKey::Object { shape, .. } | ProgramKey::Value { shape } => *shape,
        }
    }

    /// Number of hops between the entry pointer and the encoded storage.
    pub fn level(&self) -> usize {
        match self {
            ProgramKey::Object { reach, .. } => reach.len(),
            ProgramKey::Value { .. } => 0,
        }
    }
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramKey::Object { shape, reach } => {
                write!(f, "object {shape}")?;
                if !reach.is_empty() {
                    write!(f, " via")?;
                    for hop in reach {
                        write!(f, " {hop}")?;
                    }
                }
                Ok(())
            }
            ProgramKey::Value { shape } => write!(f, "value {shape}"),
        }
    }
}

/// One reference hop: following a pointer or unwrapping an option.
#[derive(Clone, Copy, Debug)]
pub struct Hop {
    /// Shape of the reference or nullable wrapper being followed.
    pub shape: ShapeHandle,
    /// How to follow it.
    pub step: HopStep,
}

/// How a [`Hop`] is followed.
#[derive(Clone, Copy, Debug)]
pub enum HopStep {
    /// `Option<T>`: may be absent.
    Nullable(OptionGetValueFn),
    /// `Box<T>`, `Arc<T>`, `&T`...: always present.
    Reference(BorrowFn),
}

impl Hop {
    /// Follows the hop from `ptr`, returning `None` if the value is absent.
    ///
    /// # Safety
    /// `ptr` must point to an initialized value of the hop's shape.
    #[inline]
    pub unsafe fn follow(&self, ptr: PtrConst) -> Option<PtrConst> {
        match self.step {
            HopStep::Nullable(get_value) => unsafe { get_value(ptr) },
            HopStep::Reference(borrow) => Some(unsafe { borrow(ptr) }),
        }
    }

    /// Short label for disassembly.
    pub fn mnemonic(&self) -> &'static str {
        match self.step {
            HopStep::Nullable(_) => "some",
            HopStep::Reference(_) => "ref",
        }
    }
}

/// Peels reference and nullable wrappers off `shape`, returning the hops and
/// the shape finally reached.
pub(crate) fn peel(
    registry: &ShapeRegistry,
    mut shape: ShapeHandle,
    context: &'static str,
) -> Result<(Vec<Hop>, ShapeHandle), InvariantError> {
    let mut hops = Vec::new();
    loop {
        let step = match &registry.ready(shape, context)?.kind {
            ShapeKind::Reference(r) => (HopStep::Reference(r.borrow), r.pointee),
            ShapeKind::Nullable(n) => (HopStep::Nullable(n.get_value), n.inner),
            _ => return Ok((hops, shape)),
        };
        hops.push(Hop {
            shape,
            step: step.0,
        });
        shape = step.1;
    }
}

/// A program unit to compile.
#[derive(Clone, Debug)]
pub struct Unit {
    /// What the unit encodes.
    pub key: ProgramKey,
    /// The hops named by the key's reach.
    pub hops: Vec<Hop>,
}

/// A field of a resolved unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Index into [`Resolution::units`].
    pub unit: usize,
    /// Index into the unit's struct fields.
    pub field: usize,
}

/// Indirection level of every field of every struct unit.
#[derive(Clone, Debug, Default)]
pub struct IndirectionMap {
    levels: HashMap<FieldRef, usize>,
}

impl IndirectionMap {
    /// Level recorded for a field, if any.
    pub fn get(&self, field: FieldRef) -> Option<usize> {
        self.levels.get(&field).copied()
    }

    pub(crate) fn insert(&mut self, field: FieldRef, level: usize) {
        self.levels.insert(field, level);
    }

    /// Number of fields with a recorded level.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns `true` if no level is recorded.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Everything the compiler needs to build a root type's programs.
#[derive(Clone, Debug)]
pub struct Resolution {
    /// The root's program.
    pub root: ProgramKey,
    /// Hops the executor starts the root program with.
    pub root_hops: Vec<Hop>,
    /// Units not compiled yet, in discovery order.
    pub units: Vec<Unit>,
    /// Indirection level of every field of `units`.
    pub levels: IndirectionMap,
}

/// Resolves the program units reachable from `root`.
///
/// Units for which `known` returns `true` are already compiled; they are
/// neither returned nor explored.
pub fn resolve(
    registry: &ShapeRegistry,
    root: ShapeHandle,
    known: &dyn Fn(&ProgramKey) -> bool,
) -> Result<Resolution, InvariantError> {
    let context = registry.ready(root, "<unknown root>")?.type_name;

    let (root_hops, target) = peel(registry, root, context)?;
    let (root_key, root_hops) = match registry.ready(target, context)?.kind {
        ShapeKind::Struct(_) => (
            ProgramKey::Object {
                shape: target,
                reach: root_hops.iter().map(|h| h.shape).collect(),
            },
            root_hops,
        ),
        _ => (ProgramKey::Value { shape: root }, Vec::new()),
    };

    let mut resolution = Resolution {
        root: root_key.clone(),
        root_hops: root_hops.clone(),
        units: Vec::new(),
        levels: IndirectionMap::default(),
    };

    let mut seen: HashSet<ProgramKey> = HashSet::new();
    let mut queue: VecDeque<Unit> = VecDeque::new();
    let mut enqueue = |unit: Unit, queue: &mut VecDeque<Unit>| {
        if !known(&unit.key) && seen.insert(unit.key.clone()) {
            queue.push_back(unit);
        }
    };
    enqueue(
        Unit {
            key: root_key,
            hops: root_hops,
        },
        &mut queue,
    );

    while let Some(unit) = queue.pop_front() {
        let index = resolution.units.len();
        trace!("resolving unit {index}: {}", unit.key);

        match &unit.key {
            ProgramKey::Object { shape, reach } => {
                let owner = registry.ready(*shape, context)?;
                for (field_index, field) in owner.fields().iter().enumerate() {
                    resolution.levels.insert(
                        FieldRef {
                            unit: index,
                            field: field_index,
                        },
                        reach.len(),
                    );

                    let field_shape = registry.ready(field.shape, context)?;
                    if let ShapeKind::Struct(_) = field_shape.kind {
                        // Embedded: same storage, same hops.
                        enqueue(
                            Unit {
                                key: ProgramKey::Object {
                                    shape: field.shape,
                                    reach: reach.clone(),
                                },
                                hops: unit.hops.clone(),
                            },
                            &mut queue,
                        );
                        continue;
                    }

                    let (_, target) = peel(registry, field.shape, context)?;
                    if let Some(child) = encoded_child(registry, target, context)? {
                        enqueue(child, &mut queue);
                    }
                }
            }
            ProgramKey::Value { shape } => {
                let (_, target) = peel(registry, *shape, context)?;
                if let Some(child) = encoded_child(registry, target, context)? {
                    enqueue(child, &mut queue);
                }
            }
        }

        resolution.units.push(unit);
    }

    Ok(resolution)
}

/// The unit an encode of `target` (already peeled) calls into, if any.
fn encoded_child(
    registry: &ShapeRegistry,
    target: ShapeHandle,
    context: &'static str,
) -> Result<Option<Unit>, InvariantError> {
    let shape = registry.ready(target, context)?;
    let child = match &shape.kind {
        ShapeKind::Struct(_) => target,
        ShapeKind::Sequence(s) => s.element,
        ShapeKind::Mapping(m) => m.value,
        _ => return Ok(None),
    };
    Ok(Some(Unit {
        key: ProgramKey::entry(registry, child),
        hops: Vec::new(),
    }))
}
