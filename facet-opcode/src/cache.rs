//! Cache of compiled programs.
//!
//! A [`ProgramCache`] owns a shape registry and an append-only program table.
//! Lookups by root type take the read lock only. A miss takes the write lock,
//! checks again (another thread may have compiled the type meanwhile), then
//! describes, resolves and compiles whatever the root needs and publishes the
//! new programs as a fresh immutable table snapshot. Encodes already running
//! keep the snapshot they started with.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::compiler::compile;
use crate::descriptor::ShapeRegistry;
use crate::error::{CompileError, InvariantError};
use crate::program::{Instruction, ProgramId, ProgramTable};
use crate::resolver::{Hop, ProgramKey, resolve};
use crate::{ConstTypeId, Shape};

/// Everything needed to encode one root type.
#[derive(Clone, Debug)]
pub struct CompiledRoot {
    /// Table snapshot holding the root program and everything it calls.
    pub table: Arc<ProgramTable>,
    /// The root program.
    pub program: ProgramId,
    /// Hops the root program's cursor starts with.
    pub hops: Arc<[Hop]>,
}

#[derive(Debug)]
struct RootEntry {
    program: ProgramId,
    hops: Arc<[Hop]>,
}

#[derive(Debug, Default)]
struct CacheState {
    registry: ShapeRegistry,
    table: Arc<ProgramTable>,
    keys: HashMap<ProgramKey, ProgramId>,
    roots: HashMap<ConstTypeId, RootEntry>,
}

impl CacheState {
    fn lookup(&self, id: ConstTypeId) -> Option<CompiledRoot> {
        self.roots.get(&id).map(|entry| CompiledRoot {
            table: Arc::clone(&self.table),
            program: entry.program,
            hops: Arc::clone(&entry.hops),
        })
    }
}

/// Compiled programs, keyed by root type.
#[derive(Debug, Default)]
pub struct ProgramCache {
    state: RwLock<CacheState>,
    compiled: AtomicUsize,
}

static GLOBAL: OnceLock<ProgramCache> = OnceLock::new();

impl ProgramCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by [`to_vec`](crate::to_vec) and friends.
    pub fn global() -> &'static ProgramCache {
        GLOBAL.get_or_init(ProgramCache::new)
    }

    /// Returns the program for `shape`, compiling it on first use.
    pub fn get_or_compile(&self, shape: &'static Shape) -> Result<CompiledRoot, CompileError> {
        if let Some(found) = self.state.read().lookup(shape.id) {
            return Ok(found);
        }

        let mut state = self.state.write();
        if let Some(found) = state.lookup(shape.id) {
            return Ok(found);
        }

        let CacheState {
            registry,
            table,
            keys,
            roots,
        } = &mut *state;

        let root = registry.describe(shape)?;
        let resolution = resolve(registry, root, &|key| keys.contains_key(key))?;
        let base = table.len();
        let programs = compile(registry, &resolution, keys, base)?;
        let count = programs.len();
        let next = table.extended(programs)?;

        for (i, unit) in resolution.units.iter().enumerate() {
            keys.insert(unit.key.clone(), ProgramId::from_index(base + i));
        }
        let program = keys.get(&resolution.root).copied().ok_or_else(|| {
            InvariantError::new(shape.type_name(), "root unit was neither compiled nor known")
        })?;
        let hops: Arc<[Hop]> = resolution.root_hops.into();
        roots.insert(
            shape.id,
            RootEntry {
                program,
                hops: Arc::clone(&hops),
            },
        );
        *table = Arc::new(next);
        self.compiled.fetch_add(count, Ordering::Relaxed);

        debug!(
            "compiled {count} program(s) for {}, root {program}, {} in table",
            shape.type_name(),
            table.len()
        );

        Ok(CompiledRoot {
            table: Arc::clone(table),
            program,
            hops,
        })
    }

    /// Number of program units compiled by this cache so far.
    pub fn compile_count(&self) -> usize {
        self.compiled.load(Ordering::Relaxed)
    }

    /// Number of programs in the current table.
    pub fn program_count(&self) -> usize {
        self.state.read().table.len()
    }

    /// Number of described types.
    pub fn shape_count(&self) -> usize {
        self.state.read().registry.len()
    }

    /// Disassembles the program for `shape` and every program it calls, in
    /// id order.
    pub fn disassemble(&self, shape: &'static Shape) -> Result<String, CompileError> {
        let root = self.get_or_compile(shape)?;

        let mut reachable = BTreeSet::new();
        let mut pending = vec![root.program];
        while let Some(id) = pending.pop() {
            if !reachable.insert(id) {
                continue;
            }
            let program = root.table.get(id).ok_or_else(|| {
                InvariantError::new(shape.type_name(), format!("{id} is not in the table"))
            })?;
            for op in &program.instructions {
                match op {
                    Instruction::EnterNested { program, .. } => pending.push(*program),
                    Instruction::EncodeSequence { element, .. } => pending.push(*element),
                    Instruction::EncodeMapping { value, .. } => pending.push(*value),
                    _ => {}
                }
            }
        }

        let mut out = String::new();
        for id in reachable {
            if let Some(program) = root.table.get(id) {
                let _ = write!(out, "{program}");
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Shaped, shaped_opaque, shaped_struct};

    shaped_struct! {
        struct Leaf {
            #[json("v")]
            v: u32,
        }
    }

    shaped_struct! {
        struct Pair {
            #[json("left")]
            left: Leaf,
            #[json("right")]
            right: Option<Box<Leaf>>,
        }
    }

    struct Socket;
    shaped_opaque!(Socket);

    shaped_struct! {
        struct Broken {
            #[json("leaf")]
            leaf: Leaf,
            #[json("socket")]
            socket: Socket,
        }
    }

    #[test]
    fn second_lookup_compiles_nothing() {
        let cache = ProgramCache::new();
        let first = cache.get_or_compile(Pair::SHAPE).unwrap();
        let compiled = cache.compile_count();
        assert_eq!(compiled, 2);

        let second = cache.get_or_compile(Pair::SHAPE).unwrap();
        assert_eq!(cache.compile_count(), compiled);
        assert_eq!(first.program, second.program);
        assert!(Arc::ptr_eq(&first.table, &second.table));
    }

    #[test]
    fn roots_share_units_already_compiled() {
        let cache = ProgramCache::new();
        cache.get_or_compile(Pair::SHAPE).unwrap();
        let before = cache.compile_count();

        // The Leaf object unit exists; only the Vec value unit is new.
        let list = cache.get_or_compile(<Vec<Leaf> as Shaped>::SHAPE).unwrap();
        assert_eq!(cache.compile_count(), before + 1);
        assert_eq!(list.program.index(), before);
        assert!(list.hops.is_empty());

        // A root that is an existing object unit compiles nothing at all.
        cache.get_or_compile(Leaf::SHAPE).unwrap();
        assert_eq!(cache.compile_count(), before + 1);
        assert_eq!(cache.program_count(), before + 1);
    }

    #[test]
    fn failures_publish_nothing() {
        let cache = ProgramCache::new();
        let err = cache.get_or_compile(Broken::SHAPE).unwrap_err();
        let CompileError::UnsupportedShape(err) = err else {
            panic!("expected an unsupported shape, got {err:?}");
        };
        assert!(err.type_name.ends_with("Socket"));
        assert_eq!(cache.compile_count(), 0);
        assert_eq!(cache.program_count(), 0);
        assert_eq!(cache.shape_count(), 0);
    }

    #[test]
    fn reference_roots_keep_their_hops() {
        let cache = ProgramCache::new();
        let root = cache.get_or_compile(<Box<Box<Leaf>> as Shaped>::SHAPE).unwrap();
        assert_eq!(root.hops.len(), 2);

        let listing = cache.disassemble(<Box<Box<Leaf>> as Shaped>::SHAPE).unwrap();
        assert!(listing.contains("load_field        +0 level=2"), "{listing}");
    }
}
