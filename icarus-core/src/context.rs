//! The context tree (§4.2): per-instantiation compilation state. Reads walk
//! toward the root; writes are always local to the `Context` performing
//! them. This gives every generic instantiation its own view of bound
//! constants and resolved declarations without copying anything the
//! instantiation didn't change.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use icarus_ast::NodeId;

use crate::types::{ModuleId, QualType, TypeHandle};

/// Cache key for one generic instantiation (§4.6): the bound-constant
/// tuple, in parameter declaration order. Two calls with equal keys reuse
/// the same child `Context`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundParameters(pub Vec<(String, Vec<u8>)>);

/// Resolved callee for a `Call` node: either a single declaration or,
/// once dispatch-table expansion has run, a set of per-combination
/// bindings (§4.5). Verification only ever records one of these per call.
#[derive(Debug, Clone)]
pub enum CalleeLocator {
    Single(NodeId),
    Dispatch(Vec<(NodeId, /* combination tag */ String)>),
}

/// Backing identity object for a struct/enum/flags literal, plus the
/// reverse direction (type handle back to the literal that produced it).
#[derive(Debug, Clone)]
pub struct TypeBinding {
    pub literal: NodeId,
    pub ty: TypeHandle,
}

#[derive(Default)]
struct ContextData {
    qual_types: HashMap<NodeId, QualType>,
    decls: HashMap<NodeId, Vec<NodeId>>,
    constants: HashMap<NodeId, ConstantSlot>,
    structs: HashMap<NodeId, TypeBinding>,
    enums: HashMap<NodeId, TypeBinding>,
    flags: HashMap<NodeId, TypeBinding>,
    imported_modules: HashMap<NodeId, ModuleId>,
    call_metadata: HashMap<NodeId, CalleeLocator>,
    children: HashMap<NodeId, HashMap<BoundParameters, Arc<Context>>>,
    generic_types: HashMap<String, TypeHandle>,
}

#[derive(Debug, Clone)]
struct ConstantSlot {
    buffer: Vec<u8>,
    complete: bool,
}

/// One node in the context tree. The root context belongs to the module
/// being compiled; every generic instantiation gets a child.
pub struct Context {
    parent: Option<Arc<Context>>,
    data: RefCell<ContextData>,
}

impl Context {
    pub fn root() -> Arc<Context> {
        Arc::new(Context { parent: None, data: RefCell::new(ContextData::default()) })
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn child(self: &Arc<Self>) -> Arc<Context> {
        Arc::new(Context { parent: Some(self.clone()), data: RefCell::new(ContextData::default()) })
    }

    /// A child context not yet wired into `children` (§4.2 "Scratchpad
    /// contexts"): used for speculative verification during overload and
    /// generic-parameter matching. Discard it on failure; promote it via
    /// [`Context::insert_subcontext`] on success.
    pub fn scratchpad(self: &Arc<Self>) -> Arc<Context> {
        self.child()
    }

    /// Promotes a (possibly scratchpad) child into `children[param_expr]`
    /// under `key`, returning the context that ends up registered — if a
    /// concurrent instantiation already won the race, that one is kept and
    /// returned instead (memoization is "first writer wins").
    pub fn insert_subcontext(
        self: &Arc<Self>,
        param_expr: NodeId,
        key: BoundParameters,
        child: Arc<Context>,
    ) -> Arc<Context> {
        let mut data = self.data.borrow_mut();
        let slot = data.children.entry(param_expr).or_default();
        slot.entry(key).or_insert(child).clone()
    }

    pub fn find_subcontext(&self, param_expr: NodeId, key: &BoundParameters) -> Option<Arc<Context>> {
        self.data.borrow().children.get(&param_expr)?.get(key).cloned()
    }

    // ---- qual_types: read walks to root, write is local ------------------

    pub fn qual_type(&self, node: NodeId) -> Option<QualType> {
        if let Some(qt) = self.data.borrow().qual_types.get(&node) {
            return Some(qt.clone());
        }
        self.parent.as_ref().and_then(|p| p.qual_type(node))
    }

    pub fn set_qual_type(&self, node: NodeId, qual_type: QualType) {
        self.data.borrow_mut().qual_types.insert(node, qual_type);
    }

    // ---- decls -------------------------------------------------------------

    pub fn resolved_decls(&self, identifier: NodeId) -> Option<Vec<NodeId>> {
        if let Some(d) = self.data.borrow().decls.get(&identifier) {
            return Some(d.clone());
        }
        self.parent.as_ref().and_then(|p| p.resolved_decls(identifier))
    }

    pub fn set_resolved_decls(&self, identifier: NodeId, decls: Vec<NodeId>) {
        self.data.borrow_mut().decls.insert(identifier, decls);
    }

    // ---- constants (§4.7.1) -------------------------------------------------

    /// `LoadConstant`: deserializes from the bound buffer. Only ever
    /// called once `complete` is true for that declaration.
    pub fn load_constant(&self, decl: NodeId) -> Option<Vec<u8>> {
        if let Some(slot) = self.data.borrow().constants.get(&decl) {
            return Some(slot.buffer.clone());
        }
        self.parent.as_ref().and_then(|p| p.load_constant(decl))
    }

    pub fn constant_complete(&self, decl: NodeId) -> bool {
        self.data
            .borrow()
            .constants
            .get(&decl)
            .map(|s| s.complete)
            .or_else(|| self.parent.as_ref().map(|p| p.constant_complete(decl)))
            .unwrap_or(false)
    }

    /// `SetConstant(decl_id, buffer, complete)`. Re-entry on the same
    /// declaration while it is mid-evaluation (`complete=false` already
    /// present) signals a cyclic dependency to the caller.
    pub fn set_constant(&self, decl: NodeId, buffer: Vec<u8>, complete: bool) -> Result<(), ()> {
        let mut data = self.data.borrow_mut();
        if let Some(existing) = data.constants.get(&decl) {
            if !existing.complete && !complete {
                return Err(());
            }
        }
        data.constants.insert(decl, ConstantSlot { buffer, complete });
        Ok(())
    }

    // ---- structs/enums/flags -------------------------------------------------

    pub fn struct_binding(&self, literal: NodeId) -> Option<TypeBinding> {
        if let Some(b) = self.data.borrow().structs.get(&literal) {
            return Some(b.clone());
        }
        self.parent.as_ref().and_then(|p| p.struct_binding(literal))
    }

    pub fn set_struct_binding(&self, literal: NodeId, ty: TypeHandle) {
        self.data.borrow_mut().structs.insert(literal, TypeBinding { literal, ty });
    }

    pub fn enum_binding(&self, literal: NodeId) -> Option<TypeBinding> {
        if let Some(b) = self.data.borrow().enums.get(&literal) {
            return Some(b.clone());
        }
        self.parent.as_ref().and_then(|p| p.enum_binding(literal))
    }

    pub fn set_enum_binding(&self, literal: NodeId, ty: TypeHandle) {
        self.data.borrow_mut().enums.insert(literal, TypeBinding { literal, ty });
    }

    // ---- imports -------------------------------------------------------------

    pub fn imported_module(&self, import_node: NodeId) -> Option<ModuleId> {
        if let Some(m) = self.data.borrow().imported_modules.get(&import_node) {
            return Some(*m);
        }
        self.parent.as_ref().and_then(|p| p.imported_module(import_node))
    }

    pub fn set_imported_module(&self, import_node: NodeId, module: ModuleId) {
        self.data.borrow_mut().imported_modules.insert(import_node, module);
    }

    // ---- generic type parameters (§4.6) ---------------------------------------

    /// A `Const` generic parameter's bound type, keyed by parameter name
    /// rather than `NodeId`: the parameter's own declaration never appears
    /// in the instantiation's lexical scope (it lives only in its
    /// `ParameterizedExpression`), so field types referencing it (`T`,
    /// `U`) are resolved against this table instead of scope lookup.
    pub fn generic_type(&self, name: &str) -> Option<TypeHandle> {
        if let Some(t) = self.data.borrow().generic_types.get(name) {
            return Some(t.clone());
        }
        self.parent.as_ref().and_then(|p| p.generic_type(name))
    }

    pub fn set_generic_type(&self, name: String, ty: TypeHandle) {
        self.data.borrow_mut().generic_types.insert(name, ty);
    }

    // ---- call metadata ---------------------------------------------------------

    pub fn call_metadata(&self, call: NodeId) -> Option<CalleeLocator> {
        if let Some(m) = self.data.borrow().call_metadata.get(&call) {
            return Some(m.clone());
        }
        self.parent.as_ref().and_then(|p| p.call_metadata(call))
    }

    pub fn set_call_metadata(&self, call: NodeId, locator: CalleeLocator) {
        self.data.borrow_mut().call_metadata.insert(call, locator);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("is_root", &self.is_root()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Qualifiers, TypeInterner};
    use icarus_ast::arena::AstArena;
    use icarus_ast::{Node, SourceRange};

    fn fresh_node_id(arena: &AstArena<'_>) -> NodeId {
        arena.alloc(Node::Hole { range: SourceRange::unknown() }).id()
    }

    #[test]
    fn child_reads_fall_through_to_parent_but_writes_stay_local() {
        let arena = AstArena::new();
        let interner = TypeInterner::new();
        let root = Context::root();
        let child = root.scratchpad();

        let n = fresh_node_id(&arena);
        root.set_qual_type(n, QualType::rvalue(interner.i64_()));
        assert!(child.qual_type(n).is_some());

        let m = fresh_node_id(&arena);
        child.set_qual_type(m, QualType::rvalue(interner.bool_()));
        assert!(root.qual_type(m).is_none());
    }

    #[test]
    fn subcontext_insertion_is_memoized_per_key() {
        let arena = AstArena::new();
        let root = Context::root();
        let param_expr = fresh_node_id(&arena);
        let key = BoundParameters(vec![("T".into(), vec![1, 2, 3])]);

        let a = root.scratchpad();
        let registered_a = root.insert_subcontext(param_expr, key.clone(), a);
        let b = root.scratchpad();
        let registered_b = root.insert_subcontext(param_expr, key.clone(), b);

        assert!(Arc::ptr_eq(&registered_a, &registered_b));
        assert!(Arc::ptr_eq(&root.find_subcontext(param_expr, &key).unwrap(), &registered_a));
    }

    #[test]
    fn reentrant_constant_write_before_completion_is_reported() {
        let arena = AstArena::new();
        let root = Context::root();
        let decl = fresh_node_id(&arena);
        assert!(root.set_constant(decl, vec![], false).is_ok());
        assert!(root.set_constant(decl, vec![], false).is_err());
        assert!(root.set_constant(decl, vec![7], true).is_ok());
    }

    #[test]
    fn qual_type_error_bit_round_trips() {
        let arena = AstArena::new();
        let interner = TypeInterner::new();
        let root = Context::root();
        let n = fresh_node_id(&arena);
        root.set_qual_type(n, QualType::new(interner.i64_(), Qualifiers::ERROR));
        assert!(root.qual_type(n).unwrap().is_error());
    }
}
