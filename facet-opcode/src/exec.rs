//! Program interpreter.
//!
//! The executor walks a program's instructions against a value, writing JSON
//! into an in-memory buffer. Nested programs, sequences and mappings are
//! frames on a heap stack rather than native calls, so nesting depth is
//! bounded by `max_depth` alone. Every program frame has a cursor: the pointer the
//! program was entered with, the reference hops still pending between that
//! pointer and the struct being encoded, and the byte displacement of an
//! embedded struct inside its parent. Loads always go through the cursor, so
//! a field is dereferenced exactly as many times as its compiled level says,
//! and a mismatch is an error rather than a wild read.

use tracing::trace;

use crate::cache::CompiledRoot;
use crate::encode::EncodeOptions;
use crate::error::{EncodeError, InvariantError};
use crate::escape::write_json_string;
use crate::program::{EmptyTest, Entry, Instruction, Program, ProgramId, ProgramTable};
use crate::resolver::Hop;
use crate::{PtrConst, ScalarKind};

/// Where a program reads from.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cursor<'h> {
    base: PtrConst,
    hops: &'h [Hop],
    displacement: usize,
}

impl<'h> Cursor<'h> {
    pub(crate) fn new(base: PtrConst, hops: &'h [Hop]) -> Self {
        Self {
            base,
            hops,
            displacement: 0,
        }
    }

    /// Follows the pending hops from the base, stopping at the first absent one.
    unsafe fn walk(&self) -> Option<PtrConst> {
        let mut ptr = self.base;
        for hop in self.hops {
            ptr = unsafe { hop.follow(ptr) }?;
        }
        Some(ptr)
    }

    /// Address of the field at `offset` in the struct this cursor designates.
    unsafe fn locate(
        &self,
        offset: usize,
        level: usize,
        type_name: &'static str,
    ) -> Result<PtrConst, InvariantError> {
        if level != self.hops.len() {
            return Err(InvariantError::new(
                type_name,
                format!(
                    "field load at level {level} through a cursor with {} pending hop(s)",
                    self.hops.len()
                ),
            ));
        }
        let Some(storage) = (unsafe { self.walk() }) else {
            return Err(InvariantError::new(
                type_name,
                "reference hop absent after the base was guarded",
            ));
        };
        Ok(unsafe { storage.field(self.displacement + offset) })
    }
}

/// A program that is part way through its instructions.
struct ProgramFrame<'a, 'h> {
    program: &'a Program,
    pc: usize,
    cursor: Cursor<'h>,
    current: PtrConst,
    first: bool,
}

/// A sequence whose elements are being encoded one by one.
struct SequenceFrame {
    element: ProgramId,
    start: PtrConst,
    stride: usize,
    count: usize,
    next: usize,
}

/// A mapping whose entries were collected and sorted when it was opened.
struct MappingFrame {
    value: ProgramId,
    entries: Vec<(String, PtrConst)>,
    next: usize,
}

enum Frame<'a, 'h> {
    Program(ProgramFrame<'a, 'h>),
    Sequence(SequenceFrame),
    Mapping(MappingFrame),
}

/// What the top frame wants done to the stack once it yields.
enum Step<'a, 'h> {
    Push(Frame<'a, 'h>),
    Pop,
}

/// Runs compiled programs and collects their output.
pub(crate) struct Executor<'a> {
    table: &'a ProgramTable,
    options: &'a EncodeOptions,
    out: Vec<u8>,
    depth: usize,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(table: &'a ProgramTable, options: &'a EncodeOptions) -> Self {
        Self {
            table,
            options,
            out: Vec::with_capacity(128),
            depth: 0,
        }
    }

    /// Encodes the value at `value` with `root`'s program.
    ///
    /// # Safety
    /// `value` must point to an initialized value of the type `root` was
    /// compiled for, and stay valid for the duration of the call.
    pub(crate) unsafe fn run(
        mut self,
        root: &CompiledRoot,
        value: PtrConst,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut stack = vec![self.enter(root.program, Cursor::new(value, &root.hops))?];
        while let Some(top) = stack.last_mut() {
            let step = match top {
                Frame::Program(frame) => unsafe { self.step(frame)? },
                Frame::Sequence(seq) => unsafe { self.next_element(seq)? },
                Frame::Mapping(map) => self.next_entry(map)?,
            };
            match step {
                Step::Push(frame) => stack.push(frame),
                Step::Pop => {
                    stack.pop();
                }
            }
        }
        Ok(self.out)
    }

    fn program(&self, id: ProgramId) -> Result<&'a Program, InvariantError> {
        self.table
            .get(id)
            .map(|p| &**p)
            .ok_or_else(|| InvariantError::new("<program table>", format!("{id} is not in the table")))
    }

    fn enter<'h>(&self, id: ProgramId, cursor: Cursor<'h>) -> Result<Frame<'a, 'h>, EncodeError> {
        let program = self.program(id)?;
        trace!("enter {id} ({})", program.identifier);
        Ok(Frame::Program(ProgramFrame {
            program,
            pc: 0,
            cursor,
            current: cursor.base,
            first: true,
        }))
    }

    /// Runs `frame` until it needs a nested frame or reaches `ExitNested`.
    unsafe fn step<'h>(
        &mut self,
        frame: &mut ProgramFrame<'a, 'h>,
    ) -> Result<Step<'a, 'h>, EncodeError> {
        let program = frame.program;
        let type_name = program.type_name;

        loop {
            let Some(op) = program.instructions.get(frame.pc) else {
                return Err(
                    InvariantError::new(type_name, format!("fell off the end at {:04}", frame.pc))
                        .into(),
                );
            };
            frame.pc += 1;

            match op {
                Instruction::GuardBase { on_absent } => {
                    if unsafe { frame.cursor.walk() }.is_none() {
                        self.out.extend_from_slice(b"null");
                        frame.pc = *on_absent;
                    }
                }
                Instruction::BeginObject => {
                    self.open(b'{', type_name)?;
                    frame.first = true;
                }
                Instruction::EndObject => self.close(b'}', !frame.first),
                Instruction::LoadField { offset, level } => {
                    frame.current = unsafe { frame.cursor.locate(*offset, *level, type_name) }?;
                }
                Instruction::SkipIfEmpty { test, target } => {
                    if unsafe { is_empty(*test, frame.current) } {
                        frame.pc = *target;
                    }
                }
                Instruction::EmitKey { key } => {
                    if !frame.first {
                        self.out.push(b',');
                    }
                    frame.first = false;
                    self.newline();
                    self.out.extend_from_slice(key);
                    self.colon();
                }
                Instruction::DerefIfPresent { hop, on_absent } => {
                    match unsafe { hop.follow(frame.current) } {
                        Some(next) => frame.current = next,
                        None => {
                            if on_absent.write_null {
                                self.out.extend_from_slice(b"null");
                            }
                            frame.pc = on_absent.target;
                        }
                    }
                }
                Instruction::EncodeScalar(kind) => unsafe {
                    self.scalar(*kind, frame.current, type_name)?
                },
                Instruction::EncodeSequence {
                    element,
                    stride,
                    len,
                    as_ptr,
                } => {
                    let count = unsafe { (*len)(frame.current) };
                    let start = unsafe { (*as_ptr)(frame.current) };
                    self.open(b'[', type_name)?;
                    return Ok(Step::Push(Frame::Sequence(SequenceFrame {
                        element: *element,
                        start,
                        stride: *stride,
                        count,
                        next: 0,
                    })));
                }
                Instruction::EncodeMapping {
                    value,
                    key,
                    len,
                    for_each,
                } => {
                    let mut entries = Vec::with_capacity(unsafe { (*len)(frame.current) });
                    unsafe {
                        (*for_each)(frame.current, &mut |k, v| entries.push((k, v)));
                    }
                    let mut entries: Vec<(String, PtrConst)> = entries
                        .into_iter()
                        .map(|(k, v)| (unsafe { map_key(*key, k) }, v))
                        .collect();
                    entries.sort_by(|a, b| a.0.cmp(&b.0));

                    self.open(b'{', type_name)?;
                    return Ok(Step::Push(Frame::Mapping(MappingFrame {
                        value: *value,
                        entries,
                        next: 0,
                    })));
                }
                Instruction::EnterNested { program, entry } => {
                    let nested = match entry {
                        Entry::Current => Cursor::new(frame.current, &[]),
                        Entry::Embedded { offset } => Cursor {
                            displacement: frame.cursor.displacement + offset,
                            ..frame.cursor
                        },
                    };
                    return Ok(Step::Push(self.enter(*program, nested)?));
                }
                Instruction::ExitNested => return Ok(Step::Pop),
            }
        }
    }

    unsafe fn next_element<'h>(
        &mut self,
        seq: &mut SequenceFrame,
    ) -> Result<Step<'a, 'h>, EncodeError> {
        if seq.next == seq.count {
            self.close(b']', seq.count > 0);
            return Ok(Step::Pop);
        }
        if seq.next > 0 {
            self.out.push(b',');
        }
        self.newline();
        let item = unsafe { seq.start.field(seq.next * seq.stride) };
        seq.next += 1;
        Ok(Step::Push(self.enter(seq.element, Cursor::new(item, &[]))?))
    }

    fn next_entry<'h>(&mut self, map: &mut MappingFrame) -> Result<Step<'a, 'h>, EncodeError> {
        let Some((key, value)) = map.entries.get(map.next) else {
            self.close(b'}', !map.entries.is_empty());
            return Ok(Step::Pop);
        };
        if map.next > 0 {
            self.out.push(b',');
        }
        self.newline();
        write_json_string(&mut self.out, key, self.options.escape_html);
        self.colon();
        let value = *value;
        map.next += 1;
        Ok(Step::Push(self.enter(map.value, Cursor::new(value, &[]))?))
    }

    fn open(&mut self, bracket: u8, type_name: &'static str) -> Result<(), EncodeError> {
        if self.depth >= self.options.max_depth {
            return Err(EncodeError::UnsupportedValue {
                type_name,
                reason: "value nests deeper than the configured maximum depth",
            });
        }
        self.depth += 1;
        self.out.push(bracket);
        Ok(())
    }

    fn close(&mut self, bracket: u8, had_items: bool) {
        self.depth -= 1;
        if had_items {
            self.newline();
        }
        self.out.push(bracket);
    }

    fn newline(&mut self) {
        if self.options.pretty {
            self.out.push(b'\n');
            for _ in 0..self.depth {
                self.out.extend_from_slice(self.options.indent.as_bytes());
            }
        }
    }

    fn colon(&mut self) {
        if self.options.pretty {
            self.out.extend_from_slice(b": ");
        } else {
            self.out.push(b':');
        }
    }

    unsafe fn scalar(
        &mut self,
        kind: ScalarKind,
        ptr: PtrConst,
        type_name: &'static str,
    ) -> Result<(), EncodeError> {
        match kind {
            ScalarKind::Bool => {
                let text: &[u8] = if unsafe { ptr.read::<bool>() } {
                    b"true"
                } else {
                    b"false"
                };
                self.out.extend_from_slice(text);
            }
            ScalarKind::U8 => write_int(&mut self.out, unsafe { ptr.read::<u8>() }),
            ScalarKind::U16 => write_int(&mut self.out, unsafe { ptr.read::<u16>() }),
            ScalarKind::U32 => write_int(&mut self.out, unsafe { ptr.read::<u32>() }),
            ScalarKind::U64 => write_int(&mut self.out, unsafe { ptr.read::<u64>() }),
            ScalarKind::U128 => write_int(&mut self.out, unsafe { ptr.read::<u128>() }),
            ScalarKind::Usize => write_int(&mut self.out, unsafe { ptr.read::<usize>() }),
            ScalarKind::I8 => write_int(&mut self.out, unsafe { ptr.read::<i8>() }),
            ScalarKind::I16 => write_int(&mut self.out, unsafe { ptr.read::<i16>() }),
            ScalarKind::I32 => write_int(&mut self.out, unsafe { ptr.read::<i32>() }),
            ScalarKind::I64 => write_int(&mut self.out, unsafe { ptr.read::<i64>() }),
            ScalarKind::I128 => write_int(&mut self.out, unsafe { ptr.read::<i128>() }),
            ScalarKind::Isize => write_int(&mut self.out, unsafe { ptr.read::<isize>() }),
            ScalarKind::F32 => {
                let value = unsafe { ptr.read::<f32>() };
                if !value.is_finite() {
                    return Err(non_finite(type_name));
                }
                let mut buf = ryu::Buffer::new();
                self.out.extend_from_slice(buf.format_finite(value).as_bytes());
            }
            ScalarKind::F64 => {
                let value = unsafe { ptr.read::<f64>() };
                if !value.is_finite() {
                    return Err(non_finite(type_name));
                }
                let mut buf = ryu::Buffer::new();
                self.out.extend_from_slice(buf.format_finite(value).as_bytes());
            }
            ScalarKind::Char => {
                let mut buf = [0; 4];
                let c = unsafe { ptr.read::<char>() };
                write_json_string(&mut self.out, c.encode_utf8(&mut buf), self.options.escape_html);
            }
            ScalarKind::String => {
                let s = unsafe { ptr.get::<String>() };
                write_json_string(&mut self.out, s, self.options.escape_html);
            }
            ScalarKind::Str => {
                let s = unsafe { ptr.read::<&'static str>() };
                write_json_string(&mut self.out, s, self.options.escape_html);
            }
        }
        Ok(())
    }
}

fn write_int<I: itoa::Integer>(out: &mut Vec<u8>, value: I) {
    let mut buf = itoa::Buffer::new();
    out.extend_from_slice(buf.format(value).as_bytes());
}

fn int_key<I: itoa::Integer>(value: I) -> String {
    itoa::Buffer::new().format(value).to_owned()
}

fn non_finite(type_name: &'static str) -> EncodeError {
    EncodeError::UnsupportedValue {
        type_name,
        reason: "NaN and infinite floats have no JSON representation",
    }
}

/// Whether the value at `ptr` is its kind's zero value.
unsafe fn is_empty(test: EmptyTest, ptr: PtrConst) -> bool {
    unsafe {
        match test {
            EmptyTest::Scalar(kind) => match kind {
                ScalarKind::Bool => !ptr.read::<bool>(),
                ScalarKind::U8 => ptr.read::<u8>() == 0,
                ScalarKind::U16 => ptr.read::<u16>() == 0,
                ScalarKind::U32 => ptr.read::<u32>() == 0,
                ScalarKind::U64 => ptr.read::<u64>() == 0,
                ScalarKind::U128 => ptr.read::<u128>() == 0,
                ScalarKind::Usize => ptr.read::<usize>() == 0,
                ScalarKind::I8 => ptr.read::<i8>() == 0,
                ScalarKind::I16 => ptr.read::<i16>() == 0,
                ScalarKind::I32 => ptr.read::<i32>() == 0,
                ScalarKind::I64 => ptr.read::<i64>() == 0,
                ScalarKind::I128 => ptr.read::<i128>() == 0,
                ScalarKind::Isize => ptr.read::<isize>() == 0,
                ScalarKind::F32 => ptr.read::<f32>() == 0.0,
                ScalarKind::F64 => ptr.read::<f64>() == 0.0,
                ScalarKind::Char => ptr.read::<char>() == '\0',
                ScalarKind::String => ptr.get::<String>().is_empty(),
                ScalarKind::Str => ptr.read::<&'static str>().is_empty(),
            },
            EmptyTest::Sequence(len) => len(ptr) == 0,
            EmptyTest::Mapping(len) => len(ptr) == 0,
        }
    }
}

/// The string form of a map key, used both for output and for ordering.
unsafe fn map_key(kind: ScalarKind, ptr: PtrConst) -> String {
    match kind {
        ScalarKind::String => unsafe { ptr.get::<String>() }.clone(),
        ScalarKind::Str => unsafe { ptr.read::<&'static str>() }.to_owned(),
        ScalarKind::Char => unsafe { ptr.read::<char>() }.to_string(),
        ScalarKind::U8 => int_key(unsafe { ptr.read::<u8>() }),
        ScalarKind::U16 => int_key(unsafe { ptr.read::<u16>() }),
        ScalarKind::U32 => int_key(unsafe { ptr.read::<u32>() }),
        ScalarKind::U64 => int_key(unsafe { ptr.read::<u64>() }),
        ScalarKind::U128 => int_key(unsafe { ptr.read::<u128>() }),
        ScalarKind::Usize => int_key(unsafe { ptr.read::<usize>() }),
        ScalarKind::I8 => int_key(unsafe { ptr.read::<i8>() }),
        ScalarKind::I16 => int_key(unsafe { ptr.read::<i16>() }),
        ScalarKind::I32 => int_key(unsafe { ptr.read::<i32>() }),
        ScalarKind::I64 => int_key(unsafe { ptr.read::<i64>() }),
        ScalarKind::I128 => int_key(unsafe { ptr.read::<i128>() }),
        ScalarKind::Isize => int_key(unsafe { ptr.read::<isize>() }),
        // rejected by the descriptor
        ScalarKind::Bool | ScalarKind::F32 | ScalarKind::F64 => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ShapeRegistry;
    use crate::resolver::resolve;
    use crate::{Shaped, shaped_struct};

    shaped_struct! {
        struct Flat {
            #[json("n")]
            n: u8,
        }
    }

    fn hop_for<T: Shaped>() -> Hop {
        let mut registry = ShapeRegistry::new();
        let root = registry.describe(T::SHAPE).unwrap();
        resolve(&registry, root, &|_| false).unwrap().root_hops[0]
    }

    #[test]
    fn cursor_rejects_mismatched_levels() {
        let value = Flat { n: 3 };
        let cursor = Cursor::new(PtrConst::new(&value), &[]);
        let err = unsafe { cursor.locate(0, 1, "demo::Flat") }.unwrap_err();
        assert!(err.message.contains("level 1"), "{err}");

        let ptr = unsafe { cursor.locate(0, 0, "demo::Flat") }.unwrap();
        assert_eq!(unsafe { ptr.read::<u8>() }, 3);
    }

    #[test]
    fn cursor_reports_absent_hops_instead_of_reading() {
        let hop = hop_for::<Option<Flat>>();
        let absent: Option<Flat> = None;
        let cursor = Cursor::new(PtrConst::new(&absent), core::slice::from_ref(&hop));
        let err = unsafe { cursor.locate(0, 1, "demo::Flat") }.unwrap_err();
        assert!(err.message.contains("absent"), "{err}");

        let present = Some(Flat { n: 9 });
        let cursor = Cursor::new(PtrConst::new(&present), core::slice::from_ref(&hop));
        let ptr = unsafe { cursor.locate(0, 1, "demo::Flat") }.unwrap();
        assert_eq!(unsafe { ptr.read::<u8>() }, 9);
    }

    #[test]
    fn zero_values_are_empty() {
        unsafe {
            assert!(is_empty(EmptyTest::Scalar(ScalarKind::F64), PtrConst::new(&0.0f64)));
            assert!(!is_empty(EmptyTest::Scalar(ScalarKind::I32), PtrConst::new(&-1i32)));
            assert!(is_empty(
                EmptyTest::Scalar(ScalarKind::String),
                PtrConst::new(&String::new())
            ));
            assert!(!is_empty(EmptyTest::Scalar(ScalarKind::Str), PtrConst::new(&"x")));
            assert!(is_empty(EmptyTest::Scalar(ScalarKind::Bool), PtrConst::new(&false)));
        }
    }

    #[test]
    fn integer_map_keys_are_stringified() {
        unsafe {
            assert_eq!(map_key(ScalarKind::I64, PtrConst::new(&-42i64)), "-42");
            assert_eq!(map_key(ScalarKind::Char, PtrConst::new(&'k')), "k");
        }
    }
}
