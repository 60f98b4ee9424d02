//! Lowers resolved program units to instruction sequences.

use std::collections::HashMap;

use tracing::trace;

use crate::descriptor::{ShapeHandle, ShapeKind, ShapeRegistry, TypeShape};
use crate::error::InvariantError;
use crate::program::{EmptyTest, Emitter, Entry, Instruction, Label, Program, ProgramId};
use crate::resolver::{FieldRef, ProgramKey, Resolution, peel};
use crate::{ScalarKind, escape};

/// Where compiled programs find the ids of the programs they call.
struct Linker<'a> {
    fresh: HashMap<&'a ProgramKey, ProgramId>,
    existing: &'a HashMap<ProgramKey, ProgramId>,
}

impl Linker<'_> {
    fn id(&self, key: &ProgramKey, context: &'static str) -> Result<ProgramId, InvariantError> {
        self.fresh
            .get(key)
            .or_else(|| self.existing.get(key))
            .copied()
            .ok_or_else(|| InvariantError::new(context, format!("no program for unit {key}")))
    }
}

/// Compiles every unit of `resolution`.
///
/// Units get consecutive ids starting at `base`; calls into units compiled
/// earlier are linked through `existing`.
pub fn compile(
    registry: &ShapeRegistry,
    resolution: &Resolution,
    existing: &HashMap<ProgramKey, ProgramId>,
    base: usize,
) -> Result<Vec<Program>, InvariantError> {
    let linker = Linker {
        fresh: resolution
            .units
            .iter()
            .enumerate()
            .map(|(i, unit)| (&unit.key, ProgramId::from_index(base + i)))
            .collect(),
        existing,
    };

    let mut programs = Vec::with_capacity(resolution.units.len());
    for (index, unit) in resolution.units.iter().enumerate() {
        let shape = registry.ready(unit.key.shape(), "<unresolved unit>")?;
        let mut compiler = UnitCompiler {
            registry,
            linker: &linker,
            context: shape.type_name,
            emitter: Emitter::new(),
        };
        match &unit.key {
            ProgramKey::Object { reach, .. } => {
                compiler.object(shape, reach, index, resolution)?
            }
            ProgramKey::Value { shape } => compiler.value(*shape)?,
        }
        let instructions = compiler.emitter.finish(shape.type_name)?;

        let id = ProgramId::from_index(base + index);
        trace!("{id}: {} in {} instructions", unit.key, instructions.len());
        programs.push(Program {
            id,
            key: unit.key.clone(),
            type_name: shape.type_name,
            identifier: shape.identifier,
            instructions,
        });
    }
    Ok(programs)
}

struct UnitCompiler<'a> {
    registry: &'a ShapeRegistry,
    linker: &'a Linker<'a>,
    context: &'static str,
    emitter: Emitter,
}

impl UnitCompiler<'_> {
    fn object(
        &mut self,
        owner: &TypeShape,
        reach: &[ShapeHandle],
        unit: usize,
        resolution: &Resolution,
    ) -> Result<(), InvariantError> {
        let end = self.emitter.label();
        if !reach.is_empty() {
            self.emitter.guard_base(end);
        }
        self.emitter.emit(Instruction::BeginObject);

        for (index, field) in owner.fields().iter().enumerate() {
            let level = resolution
                .levels
                .get(FieldRef { unit, field: index })
                .ok_or_else(|| {
                    InvariantError::new(
                        self.context,
                        format!("field `{}` has no resolved indirection level", field.name),
                    )
                })?;
            if level != reach.len() {
                return Err(InvariantError::new(
                    self.context,
                    format!(
                        "field `{}` resolved at level {level} inside a unit reached at level {}",
                        field.name,
                        reach.len()
                    ),
                ));
            }

            let field_shape = self.registry.ready(field.shape, self.context)?;
            if let ShapeKind::Struct(_) = field_shape.kind {
                let program = self.linker.id(
                    &ProgramKey::Object {
                        shape: field.shape,
                        reach: reach.to_vec(),
                    },
                    self.context,
                )?;
                self.emit_key(field.key);
                self.emitter.emit(Instruction::EnterNested {
                    program,
                    entry: Entry::Embedded {
                        offset: field.offset,
                    },
                });
                continue;
            }

            let next = self.emitter.label();
            self.emitter.emit(Instruction::LoadField {
                offset: field.offset,
                level,
            });
            let (hops, target) = peel(self.registry, field.shape, self.context)?;
            if field.omit_empty {
                for hop in &hops {
                    self.emitter.deref_if_present(*hop, false, next);
                }
                if hops.is_empty() {
                    if let Some(test) = self.empty_test(target)? {
                        self.emitter.skip_if_empty(test, next);
                    }
                }
                self.emit_key(field.key);
                self.encode(target)?;
            } else {
                self.emit_key(field.key);
                for hop in &hops {
                    self.emitter.deref_if_present(*hop, true, next);
                }
                self.encode(target)?;
            }
            self.emitter.bind(next);
        }

        self.emitter.emit(Instruction::EndObject);
        self.finish(end);
        Ok(())
    }

    fn value(&mut self, shape: ShapeHandle) -> Result<(), InvariantError> {
        let end = self.emitter.label();
        self.emitter.emit(Instruction::LoadField {
            offset: 0,
            level: 0,
        });
        let (hops, target) = peel(self.registry, shape, self.context)?;
        for hop in hops {
            self.emitter.deref_if_present(hop, true, end);
        }
        self.encode(target)?;
        self.finish(end);
        Ok(())
    }

    fn finish(&mut self, end: Label) {
        self.emitter.bind(end);
        self.emitter.emit(Instruction::ExitNested);
    }

    fn emit_key(&mut self, key: &str) {
        let mut quoted = Vec::with_capacity(key.len() + 2);
        escape::write_json_string(&mut quoted, key, false);
        self.emitter.emit(Instruction::EmitKey {
            key: quoted.into_boxed_slice(),
        });
    }

    fn empty_test(&self, target: ShapeHandle) -> Result<Option<EmptyTest>, InvariantError> {
        let test = match &self.registry.ready(target, self.context)?.kind {
            ShapeKind::Scalar(kind) | ShapeKind::String(kind) => EmptyTest::Scalar(*kind),
            ShapeKind::Boolean => EmptyTest::Scalar(ScalarKind::Bool),
            ShapeKind::Sequence(s) => EmptyTest::Sequence(s.len),
            ShapeKind::Mapping(m) => EmptyTest::Mapping(m.len),
            ShapeKind::Struct(_) | ShapeKind::Reference(_) | ShapeKind::Nullable(_) => {
                return Ok(None);
            }
        };
        Ok(Some(test))
    }

    /// Encodes the value `current` points at, already stripped of hops.
    fn encode(&mut self, target: ShapeHandle) -> Result<(), InvariantError> {
        let shape = self.registry.ready(target, self.context)?;
        let op = match &shape.kind {
            ShapeKind::Scalar(kind) | ShapeKind::String(kind) => Instruction::EncodeScalar(*kind),
            ShapeKind::Boolean => Instruction::EncodeScalar(ScalarKind::Bool),
            ShapeKind::Struct(_) => Instruction::EnterNested {
                program: self.linker.id(&ProgramKey::entry(self.registry, target), self.context)?,
                entry: Entry::Current,
            },
            ShapeKind::Sequence(s) => Instruction::EncodeSequence {
                element: self
                    .linker
                    .id(&ProgramKey::entry(self.registry, s.element), self.context)?,
                stride: s.stride,
                len: s.len,
                as_ptr: s.as_ptr,
            },
            ShapeKind::Mapping(m) => Instruction::EncodeMapping {
                value: self
                    .linker
                    .id(&ProgramKey::entry(self.registry, m.value), self.context)?,
                key: m.key,
                len: m.len,
                for_each: m.for_each,
            },
            ShapeKind::Reference(_) | ShapeKind::Nullable(_) => {
                return Err(InvariantError::new(
                    self.context,
                    format!("{} reached the encoder without being dereferenced", shape.type_name),
                ));
            }
        };
        self.emitter.emit(op);
        Ok(())
    }
}
