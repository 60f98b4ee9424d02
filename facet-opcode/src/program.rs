//! Encoding programs: instructions, programs and the table that holds them.

use std::fmt;
use std::sync::Arc;

use crate::error::InvariantError;
use crate::resolver::{Hop, ProgramKey};
use crate::{ListAsPtrFn, ListLenFn, MapForEachFn, MapLenFn, ScalarKind};

/// Index of a [`Program`] in a [`ProgramTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u32);

impl ProgramId {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position in the table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// What an omit-empty field compares against.
#[derive(Clone, Copy, Debug)]
pub enum EmptyTest {
    /// Zero, `false`, `'\0'` or the empty string.
    Scalar(ScalarKind),
    /// No elements.
    Sequence(ListLenFn),
    /// No entries.
    Mapping(MapLenFn),
}

/// What a failed [`Instruction::DerefIfPresent`] does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Absent {
    /// Where to continue.
    pub target: usize,
    /// Write `null` before jumping (the key has already been written).
    pub write_null: bool,
}

/// Where a nested program starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entry {
    /// At the frame's current pointer, with no pending hops.
    Current,
    /// In the caller's storage: same base and pending hops, `offset` further in.
    Embedded {
        /// Offset of the embedded struct in its parent.
        offset: usize,
    },
}

/// One step of an encoding program.
#[derive(Clone, Debug)]
pub enum Instruction {
    /// Walk the cursor's pending hops once. If any is absent, write `null`
    /// and jump.
    GuardBase {
        /// Jump target when a hop is absent.
        on_absent: usize,
    },
    /// Write `{`.
    BeginObject,
    /// Write `}`.
    EndObject,
    /// Point `current` at a field of the struct the cursor designates.
    LoadField {
        /// Offset of the field in its struct.
        offset: usize,
        /// Hops between the cursor base and the struct; must match the cursor.
        level: usize,
    },
    /// Jump if `current` holds its kind's zero value.
    SkipIfEmpty {
        /// The comparison.
        test: EmptyTest,
        /// Jump target.
        target: usize,
    },
    /// Write a separator if needed, then the key and `:`.
    EmitKey {
        /// The key, quoted and escaped.
        key: Box<[u8]>,
    },
    /// Follow one hop from `current`.
    DerefIfPresent {
        /// The hop.
        hop: Hop,
        /// What to do if it is absent.
        on_absent: Absent,
    },
    /// Write `current` as a JSON scalar.
    EncodeScalar(ScalarKind),
    /// Write `current` as an array, running `element` on every item.
    EncodeSequence {
        /// Program for one element.
        element: ProgramId,
        /// Distance between elements.
        stride: usize,
        /// Number of elements.
        len: ListLenFn,
        /// First element.
        as_ptr: ListAsPtrFn,
    },
    /// Write `current` as an object with sorted keys, running `value` on
    /// every entry.
    EncodeMapping {
        /// Program for one value.
        value: ProgramId,
        /// Kind of the keys.
        key: ScalarKind,
        /// Number of entries.
        len: MapLenFn,
        /// Visits every entry.
        for_each: MapForEachFn,
    },
    /// Run another program.
    EnterNested {
        /// The program.
        program: ProgramId,
        /// Where it starts reading.
        entry: Entry,
    },
    /// Return to the caller.
    ExitNested,
}

const UNPATCHED: usize = usize::MAX;

impl Instruction {
    fn jump_target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Instruction::GuardBase { on_absent } => Some(on_absent),
            Instruction::SkipIfEmpty { target, .. } => Some(target),
            Instruction::DerefIfPresent { on_absent, .. } => Some(&mut on_absent.target),
            _ => None,
        }
    }

    /// Jump target, for instructions that have one.
    pub fn jump_target(&self) -> Option<usize> {
        match *self {
            Instruction::GuardBase { on_absent } => Some(on_absent),
            Instruction::SkipIfEmpty { target, .. } => Some(target),
            Instruction::DerefIfPresent { on_absent, .. } => Some(on_absent.target),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::GuardBase { on_absent } => {
                write!(f, "{:<18}null -> {on_absent:04}", "guard_base")
            }
            Instruction::BeginObject => f.write_str("begin_object"),
            Instruction::EndObject => f.write_str("end_object"),
            Instruction::LoadField { offset, level } => {
                write!(f, "{:<18}+{offset} level={level}", "load_field")
            }
            Instruction::SkipIfEmpty { test, target } => {
                let test = match test {
                    EmptyTest::Scalar(kind) => format!("{kind:?}"),
                    EmptyTest::Sequence(_) => "sequence".to_string(),
                    EmptyTest::Mapping(_) => "mapping".to_string(),
                };
                write!(f, "{:<18}{test} -> {target:04}", "skip_if_empty")
            }
            Instruction::EmitKey { key } => {
                write!(f, "{:<18}{}", "emit_key", String::from_utf8_lossy(key))
            }
            Instruction::DerefIfPresent { hop, on_absent } => {
                let action = if on_absent.write_null { "null" } else { "omit" };
                write!(
                    f,
                    "{:<18}{} {} -> {:04} ({action})",
                    "deref_if_present",
                    hop.mnemonic(),
                    hop.shape,
                    on_absent.target
                )
            }
            Instruction::EncodeScalar(kind) => write!(f, "{:<18}{kind:?}", "encode_scalar"),
            Instruction::EncodeSequence {
                element, stride, ..
            } => {
                write!(f, "{:<18}{element} stride={stride}", "encode_sequence")
            }
            Instruction::EncodeMapping { value, key, .. } => {
                write!(f, "{:<18}{value} key={key:?}", "encode_mapping")
            }
            Instruction::EnterNested { program, entry } => match entry {
                Entry::Current => write!(f, "{:<18}{program} current", "enter_nested"),
                Entry::Embedded { offset } => {
                    write!(f, "{:<18}{program} embedded +{offset}", "enter_nested")
                }
            },
            Instruction::ExitNested => f.write_str("exit_nested"),
        }
    }
}

/// A compiled, immutable instruction sequence for one program unit.
#[derive(Debug)]
pub struct Program {
    /// Position in the table.
    pub id: ProgramId,
    /// The unit this program encodes.
    pub key: ProgramKey,
    /// Full name of the encoded type.
    pub type_name: &'static str,
    /// Short name of the encoded type.
    pub identifier: &'static str,
    /// The instructions; the last one is always [`Instruction::ExitNested`].
    pub instructions: Vec<Instruction>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} ({}):", self.id, self.key, self.identifier)?;
        for (pc, op) in self.instructions.iter().enumerate() {
            writeln!(f, "  {pc:04}  {op}")?;
        }
        Ok(())
    }
}

/// Append-only set of programs, published as immutable snapshots.
#[derive(Debug, Default, Clone)]
pub struct ProgramTable {
    programs: Vec<Arc<Program>>,
}

impl ProgramTable {
    /// Looks up a program.
    #[inline]
    pub fn get(&self, id: ProgramId) -> Option<&Arc<Program>> {
        self.programs.get(id.index())
    }

    /// Number of programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Returns `true` if the table holds no program.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Programs in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Program>> {
        self.programs.iter()
    }

    /// A new table holding these programs followed by `more`, whose ids must
    /// continue the sequence.
    pub(crate) fn extended(&self, more: Vec<Program>) -> Result<Self, InvariantError> {
        let mut programs = self.programs.clone();
        for program in more {
            if program.id.index() != programs.len() {
                return Err(InvariantError::new(
                    program.type_name,
                    format!(
                        "program {} published at position {}",
                        program.id,
                        programs.len()
                    ),
                ));
            }
            programs.push(Arc::new(program));
        }
        Ok(Self { programs })
    }
}

/// A forward reference to an instruction index.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Label(usize);

/// Builds an instruction sequence, patching jump targets once labels are bound.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
    ops: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A fresh, unbound label.
    pub(crate) fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next instruction.
    pub(crate) fn bind(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.ops.len());
        }
    }

    pub(crate) fn emit(&mut self, op: Instruction) {
        self.ops.push(op);
    }

    pub(crate) fn guard_base(&mut self, to: Label) {
        self.jump(
            Instruction::GuardBase {
                on_absent: UNPATCHED,
            },
            to,
        );
    }

    pub(crate) fn skip_if_empty(&mut self, test: EmptyTest, to: Label) {
        self.jump(
            Instruction::SkipIfEmpty {
                test,
                target: UNPATCHED,
            },
            to,
        );
    }

    pub(crate) fn deref_if_present(&mut self, hop: Hop, write_null: bool, to: Label) {
        self.jump(
            Instruction::DerefIfPresent {
                hop,
                on_absent: Absent {
                    target: UNPATCHED,
                    write_null,
                },
            },
            to,
        );
    }

    fn jump(&mut self, op: Instruction, to: Label) {
        self.fixups.push((self.ops.len(), to));
        self.ops.push(op);
    }

    /// Resolves every jump and returns the instructions.
    pub(crate) fn finish(
        mut self,
        type_name: &'static str,
    ) -> Result<Vec<Instruction>, InvariantError> {
        for (pc, label) in core::mem::take(&mut self.fixups) {
            let Some(Some(target)) = self.labels.get(label.0).copied() else {
                return Err(InvariantError::new(
                    type_name,
                    format!("jump at {pc:04} targets a label that was never bound"),
                ));
            };
            match self.ops.get_mut(pc).and_then(Instruction::jump_target_mut) {
                Some(slot) => *slot = target,
                None => {
                    return Err(InvariantError::new(
                        type_name,
                        format!("fixup at {pc:04} does not name a jump"),
                    ));
                }
            }
        }
        if let Some(pc) = self
            .ops
            .iter()
            .position(|op| op.jump_target().is_some_and(|t| t >= self.ops.len()))
        {
            return Err(InvariantError::new(
                type_name,
                format!("jump at {pc:04} leaves the program"),
            ));
        }
        if !matches!(self.ops.last(), Some(Instruction::ExitNested)) {
            return Err(InvariantError::new(
                type_name,
                "program does not end with exit_nested",
            ));
        }
        Ok(self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_backpatched() {
        let mut emitter = Emitter::new();
        let end = emitter.label();
        emitter.guard_base(end);
        emitter.emit(Instruction::BeginObject);
        emitter.skip_if_empty(EmptyTest::Scalar(ScalarKind::U8), end);
        emitter.emit(Instruction::EndObject);
        emitter.bind(end);
        emitter.emit(Instruction::ExitNested);

        let ops = emitter.finish("demo").unwrap();
        assert_eq!(ops[0].jump_target(), Some(4));
        assert_eq!(ops[2].jump_target(), Some(4));
        assert_eq!(ops[2].to_string(), "skip_if_empty     U8 -> 0004");
    }

    #[test]
    fn unbound_labels_are_invariant_errors() {
        let mut emitter = Emitter::new();
        let dangling = emitter.label();
        emitter.skip_if_empty(EmptyTest::Scalar(ScalarKind::Bool), dangling);
        emitter.emit(Instruction::ExitNested);

        let err = emitter.finish("demo::Dangling").unwrap_err();
        assert_eq!(err.type_name, "demo::Dangling");
        assert!(err.message.contains("never bound"), "{err}");
    }

    #[test]
    fn programs_must_end_with_exit() {
        let mut emitter = Emitter::new();
        emitter.emit(Instruction::BeginObject);
        assert!(emitter.finish("demo").is_err());
    }
}
