//! Recursion guard for shape construction.
//!
//! A struct is pushed while its fields are being described. Meeting it again
//! before it is popped means the type refers to itself (through a `Box`, an
//! `Option<Arc<_>>`, ...). The descriptor then hands out the slot it already
//! reserved for the struct instead of recursing; the slot is filled when the
//! outer build completes.

use crate::ConstTypeId;
use crate::descriptor::ShapeHandle;

/// Types currently under construction, innermost last.
#[derive(Debug, Default)]
pub(crate) struct ConstructionStack {
    entries: Vec<(ConstTypeId, ShapeHandle)>,
}

impl ConstructionStack {
    /// Returns the pending handle if `id` is being built further up the stack.
    pub(crate) fn pending(&self, id: ConstTypeId) -> Option<ShapeHandle> {
        self.entries
            .iter()
            .rev()
            .find(|(entry, _)| *entry == id)
            .map(|(_, handle)| *handle)
    }

    pub(crate) fn push(&mut self, id: ConstTypeId, handle: ShapeHandle) {
        self.entries.push((id, handle));
    }

    /// Pops the innermost entry, which must be `handle`.
    pub(crate) fn pop(&mut self, handle: ShapeHandle) -> bool {
        matches!(self.entries.pop(), Some((_, top)) if top == handle)
    }

    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Drops every entry above `depth`, after a failed build.
    pub(crate) fn truncate(&mut self, depth: usize) {
        self.entries.truncate(depth);
    }
}
