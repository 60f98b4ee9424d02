#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

extern crate alloc;

mod shape;
pub use shape::*;

mod error;
pub use error::*;

mod guard;

mod descriptor;
pub use descriptor::{
    FieldShape, MappingShape, NullableShape, ReferenceShape, SequenceShape, ShapeHandle,
    ShapeKind, ShapeRegistry, StructShape, TypeShape,
};

mod resolver;
pub use resolver::{
    FieldRef, Hop, HopStep, IndirectionMap, ProgramKey, Resolution, Unit, resolve,
};

mod program;
pub use program::{Absent, EmptyTest, Entry, Instruction, Program, ProgramId, ProgramTable};

mod compiler;
pub use compiler::compile;

mod cache;
pub use cache::{CompiledRoot, ProgramCache};

pub mod escape;

mod exec;

mod encode;
pub use encode::*;
