//! The fixpoint engine (§4.4): a queue of `(Kind, AstNode, Context)` work
//! items with prerequisite sets, completion memoization, and the cyclic
//! dependency tracker. Grounded in the original `WorkGraph`/`WorkItem`
//! design: `emplace`/`Execute`/`complete()` become `enqueue`/`execute`/
//! `complete` below, and the per-scheduler identifier stack becomes
//! [`CyclicDependencyTracker`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use icarus_ast::NodeId;
use icarus_diagnostics::{Diagnostic, DiagnosticConsumer};

use crate::context::Context;

/// Granularity of deferrable work (§4.3, §4.4). More fine-grained than the
/// minimum list in §4.4 lets a dependent pointer type block on
/// `VerifyStructBody` without also waiting on layout (§4.3's "a dependent
/// reference must block on `VerifyStructBody` only").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    VerifyType,
    VerifyEnumBody,
    VerifyFunctionBody,
    VerifyStructBody,
    CompleteStructData,
    CompleteStruct,
    CompleteEnum,
    EmitScopeBody,
    EmitFunctionBody,
    EmitShortFunctionBody,
    EmitJumpBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub kind: Kind,
    pub node: NodeId,
    /// Identifies which `Context` this item runs under; contexts don't
    /// implement `Hash`/`Eq` themselves (identity types), so the item
    /// keys on the context's address instead.
    pub context: usize,
}

impl WorkItem {
    pub fn new(kind: Kind, node: NodeId, context: &Arc<Context>) -> Self {
        WorkItem { kind, node, context: Arc::as_ptr(context) as usize }
    }
}

/// RAII guard for the cyclic-dependency tracker's stack. Pushed on
/// `push_dependency`, popped on drop — including on early returns from a
/// diagnostic-emitting verification path (§5 "Scoped acquisitions").
pub struct DependencyToken<'a> {
    tracker: &'a CyclicDependencyTracker,
    name: String,
}

impl Drop for DependencyToken<'_> {
    fn drop(&mut self) {
        let mut stack = self.tracker.stack.borrow_mut();
        if stack.last().map(|(n, _)| n.as_str()) == Some(self.name.as_str()) {
            stack.pop();
        }
    }
}

/// Per-scheduler stack of identifiers currently being verified (§4.4).
#[derive(Default)]
pub struct CyclicDependencyTracker {
    stack: RefCell<Vec<(String, NodeId)>>,
}

impl CyclicDependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `name` onto the stack and returns a guard that pops it on
    /// drop. If `name` is already on the stack, returns the cycle instead
    /// (every identifier from the first occurrence to the current top, in
    /// encounter order) so the caller can emit `CyclicDependency` and
    /// poison those declarations.
    pub fn push_dependency<'a>(&'a self, name: &str, node: NodeId) -> Result<DependencyToken<'a>, Vec<(String, NodeId)>> {
        {
            let stack = self.stack.borrow();
            if let Some(pos) = stack.iter().position(|(n, _)| n == name) {
                let mut cycle: Vec<_> = stack[pos..].to_vec();
                cycle.push((name.to_string(), node));
                return Err(cycle);
            }
        }
        self.stack.borrow_mut().push((name.to_string(), node));
        Ok(DependencyToken { tracker: self, name: name.to_string() })
    }
}

/// The fixpoint engine. Holds the memo set of completed items, each
/// item's prerequisite set, and the cyclic-dependency tracker shared by
/// every verification path that runs through `execute`.
pub struct WorkGraph<D: DiagnosticConsumer> {
    dependencies: RefCell<HashMap<WorkItem, HashSet<WorkItem>>>,
    /// `true` once the item's handler has run to completion.
    done: RefCell<HashMap<WorkItem, bool>>,
    pub cyclic_tracker: CyclicDependencyTracker,
    pub diagnostics: RefCell<D>,
}

impl<D: DiagnosticConsumer> WorkGraph<D> {
    pub fn new(diagnostics: D) -> Self {
        WorkGraph {
            dependencies: RefCell::new(HashMap::new()),
            done: RefCell::new(HashMap::new()),
            cyclic_tracker: CyclicDependencyTracker::new(),
            diagnostics: RefCell::new(diagnostics),
        }
    }

    /// `enqueue(item, prerequisites)`.
    pub fn enqueue(&self, item: WorkItem, prerequisites: impl IntoIterator<Item = WorkItem>) {
        self.dependencies.borrow_mut().entry(item).or_default().extend(prerequisites);
        self.done.borrow_mut().entry(item).or_insert(false);
    }

    pub fn is_done(&self, item: &WorkItem) -> bool {
        self.done.borrow().get(item).copied().unwrap_or(false)
    }

    fn mark_done(&self, item: WorkItem) {
        self.done.borrow_mut().insert(item, true);
    }

    /// Runs every prerequisite of `item` (transitively; already-memoized
    /// prerequisites are no-ops), then `handler` once, then marks `item`
    /// done. Re-running an already-done item is itself a no-op — this is
    /// the memoization §8 calls out ("calling `VerifyType` twice is a
    /// no-op on the second call").
    pub fn execute(&self, item: WorkItem, mut handler: impl FnMut(&Self, WorkItem)) {
        if self.is_done(&item) {
            return;
        }
        let prereqs: Vec<WorkItem> = self.dependencies.borrow().get(&item).cloned().unwrap_or_default().into_iter().collect();
        for prereq in prereqs {
            self.execute(prereq, &mut handler);
        }
        if self.is_done(&item) {
            return;
        }
        log::trace!("running {:?} on {:?}", item.kind, item.node);
        handler(self, item);
        self.mark_done(item);
    }

    /// `complete()`: drains every enqueued item via repeated `execute`.
    pub fn complete(&self, mut handler: impl FnMut(&Self, WorkItem)) {
        let mut rounds = 0;
        loop {
            let pending: Vec<WorkItem> = self
                .done
                .borrow()
                .iter()
                .filter(|(_, done)| !**done)
                .map(|(item, _)| item.clone())
                .collect();
            if pending.is_empty() {
                break;
            }
            rounds += 1;
            for item in pending {
                self.execute(item, &mut handler);
            }
        }
        log::debug!("work graph reached fixpoint after {rounds} round(s)");
    }

    pub fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().consume(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.borrow().has_errors()
    }
}
