//! Name lookup over lexical scopes and embedded modules, and overload-set
//! construction for callable identifiers (§4.5 "Overload set
//! construction").

use icarus_ast::{Node, NodeId, Scope};

use crate::types::{ModuleId, QualType};

/// A symbol published by some other module (§6.4 "module export
/// layout"). Declarations local to the module being compiled are
/// referenced directly by `NodeId` instead; this type only carries the
/// data the *caller's* verifier actually needs to type-check a use site.
#[derive(Debug, Clone)]
pub struct ExportedSymbol {
    pub name: String,
    pub qual_type: QualType,
    pub constant: Option<Vec<u8>>,
}

/// One member of an overload set: either a declaration visible in this
/// compilation unit, or a symbol pulled in from another module by
/// argument-dependent lookup.
#[derive(Debug, Clone)]
pub enum Candidate {
    Local(NodeId),
    Imported(ExportedSymbol),
}

/// Abstraction the resolver uses to query a module's exports without
/// depending on how modules are stored (that's the `Importer`'s job,
/// §6.1). `icarus-core`'s driver wires a concrete implementation of this
/// over its module table.
pub trait ModuleExports {
    fn exports_named(&self, module: ModuleId, name: &str) -> Vec<ExportedSymbol>;
}

/// Ordinary lexical lookup: walk from `scope` toward the root, returning
/// the first scope's declarations for `name`. Declarations in the same
/// scope with the same name are all returned together (they form one
/// overload set); an outer scope's declarations are never merged in once
/// an inner one shadows them.
pub fn lookup_lexical<'ast>(scope: &'ast Scope<'ast>, name: &str) -> Vec<NodeId> {
    lookup_lexical_nodes(scope, name).into_iter().map(|d| d.id()).collect()
}

/// Same lookup as [`lookup_lexical`], but returns the declaration nodes
/// themselves rather than their `NodeId`s. Call-site overload resolution
/// needs the live node to read a callable's formal parameter list; ordinary
/// identifier verification only needs the `NodeId` to key `Context` by.
pub fn lookup_lexical_nodes<'ast>(scope: &'ast Scope<'ast>, name: &str) -> Vec<&'ast Node<'ast>> {
    let mut current = Some(scope);
    while let Some(s) = current {
        if let Some(decls) = s.declarations.borrow().get(name) {
            return decls.clone();
        }
        current = s.parent.get();
    }
    Vec::new()
}

/// §4.5: "collect every `Declaration` with that name visible from the
/// call-site scope *and* any name found by argument-dependent lookup: for
/// each argument whose type's provenance module is `M`, union in `M`'s
/// exports of that name."
pub fn build_overload_set<'ast>(
    scope: &'ast Scope<'ast>,
    name: &str,
    argument_provenance_modules: &[ModuleId],
    exports: &dyn ModuleExports,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = lookup_lexical(scope, name).into_iter().map(Candidate::Local).collect();

    for module in argument_provenance_modules {
        for symbol in exports.exports_named(*module, name) {
            candidates.push(Candidate::Imported(symbol));
        }
    }
    candidates
}

/// `true` if `node` is itself something an overload set may legally
/// contain: a `Declaration` whose initializer is a callable literal, or
/// (transitively) anything a `FunctionLiteral`/`ShortFunctionLiteral`
/// resolves to. Used to diagnose
/// `type-error/non-callable-in-overload-set`.
pub fn is_callable(node: &Node<'_>) -> bool {
    match node {
        Node::Declaration { init_val: Some(init), .. } => is_callable(init),
        Node::FunctionLiteral { .. } | Node::ShortFunctionLiteral { .. } | Node::BuiltinFn { .. } => true,
        _ => false,
    }
}
