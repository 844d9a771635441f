//! Module compilation drivers (§6 "External interfaces"): the entry points
//! that turn an already-scoped AST into a [`CompiledModule`], in place of
//! the original `FileImporter`/`CompileLibrary`/`CompileExecutable` split
//! (`module/importer.h`, `misc/compile.cc`). This crate never resolves a
//! locator to a file itself — that part of `Importer` is the caller's to
//! implement — it only depends on the trait boundary.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use icarus_ast::{DeclFlags, Node, NodeId, Scope};
use icarus_diagnostics::DiagnosticConsumer;

use crate::context::Context;
use crate::error::CoreError;
use crate::ir::Module as IrModule;
use crate::resolver::{ExportedSymbol, ModuleExports};
use crate::types::{ModuleId, QualType, TypeInterner};
use crate::verify::TypeVerifier;
use crate::work::WorkGraph;

/// Resolves an `import "locator"` expression to a [`ModuleId`], compiling
/// and caching the target the first time it's seen. A concrete
/// implementation owns the module table and whatever source lookup
/// (filesystem, VFS, embedded) backs `locator`.
pub trait Importer {
    fn import(&mut self, locator: &str) -> Result<ModuleId, CoreError>;
}

/// Everything a compiled module publishes to its importers: its symbol
/// table, its foreign-function bindings, and its lowered subroutines
/// (§6.4 "module export layout").
#[derive(Debug, Default)]
pub struct CompiledModule {
    pub symbols: HashMap<String, ExportedSymbol>,
    pub foreign_functions: HashMap<String, QualType>,
    pub ir: IrModule,
}

/// The simplest [`ModuleExports`] a driver can hand to [`TypeVerifier`]: a
/// flat table of already-compiled modules, keyed by the `ModuleId` each one
/// was assigned on first compilation.
impl ModuleExports for HashMap<ModuleId, CompiledModule> {
    fn exports_named(&self, module: ModuleId, name: &str) -> Vec<ExportedSymbol> {
        self.get(&module).and_then(|m| m.symbols.get(name)).cloned().into_iter().collect()
    }
}

/// State guaranteed to outlive any single module's compilation: the
/// diagnostic sink (owned by `work`), the importer, the shared type
/// interner, and every module compiled so far.
pub struct PersistentResources<'a, D: DiagnosticConsumer> {
    pub work: &'a WorkGraph<D>,
    pub interner: &'a TypeInterner,
    pub importer: &'a mut dyn Importer,
    pub exports: &'a dyn ModuleExports,
}

/// Transient state scoped to one module's compilation, as opposed to
/// [`PersistentResources`] above: just the work graph that module drains to
/// a fixpoint on its own before its `CompiledModule` is packaged up.
pub struct WorkResources<'a, D: DiagnosticConsumer> {
    pub work: &'a WorkGraph<D>,
}

/// §6.4: a declaration is exported iff it carries the `export` hashtag.
fn collect_exports<'ast>(nodes: &[&'ast Node<'ast>], ctx: &Arc<Context>) -> HashMap<String, ExportedSymbol> {
    let mut exports = HashMap::new();
    for node in nodes {
        let Node::Declaration { id, hashtags, flags, .. } = node else {
            continue;
        };
        if !hashtags.iter().any(|h| h == "export") {
            continue;
        }
        let Some(qual_type) = ctx.qual_type(node.id()) else {
            continue;
        };
        let constant = if flags.contains(DeclFlags::CONST) { ctx.load_constant(node.id()) } else { None };
        exports.insert(id.clone(), ExportedSymbol { name: id.clone(), qual_type, constant });
    }
    exports
}

/// §6.4: a `foreign("name", T)` initializer publishes a foreign-function
/// binding rather than a locally emitted subroutine.
fn collect_foreign_functions<'ast>(nodes: &[&'ast Node<'ast>], ctx: &Arc<Context>) -> HashMap<String, QualType> {
    let mut foreign = HashMap::new();
    for node in nodes {
        let Node::Declaration { id, init_val: Some(Node::Call { callee, .. }), .. } = node else {
            continue;
        };
        let Node::BuiltinFn { name, .. } = callee else {
            continue;
        };
        if name.0 != "foreign" {
            continue;
        }
        if let Some(qt) = ctx.qual_type(node.id()) {
            foreign.insert(id.clone(), qt);
        }
    }
    foreign
}

/// Verifies every top-level declaration in `nodes` under `ctx`, drains the
/// work graph to a fixpoint, and packages the result. Compiling as a
/// library never looks for `main` (§6.1).
pub fn compile_library<'ast, D: DiagnosticConsumer>(
    ctx: &Arc<Context>,
    resources: &mut PersistentResources<'_, D>,
    scope: &'ast Scope<'ast>,
    nodes: &[&'ast Node<'ast>],
) -> CompiledModule {
    let module_id = resources.interner.fresh_module_id();
    log::info!("compiling module {module_id:?} ({} top-level declaration(s))", nodes.len());
    let importer_cell = RefCell::new(&mut *resources.importer);
    let verifier =
        TypeVerifier::new(resources.interner, resources.work, resources.exports, module_id).with_importer(&importer_cell);
    for node in nodes {
        verifier.verify_expr(node, scope, ctx);
    }
    resources.work.complete(|_, _| {});

    let module = CompiledModule {
        symbols: collect_exports(nodes, ctx),
        foreign_functions: collect_foreign_functions(nodes, ctx),
        ir: verifier.emit_module_ir(scope, ctx, nodes),
    };
    log::info!("module {module_id:?} exports {} symbol(s)", module.symbols.len());
    module
}

/// Like [`compile_library`], but additionally locates the top-level `main`
/// declaration, which the caller needs as the executable's entry point
/// (grounded in the original driver's "find the `main` declaration" step).
pub fn compile_executable<'ast, D: DiagnosticConsumer>(
    ctx: &Arc<Context>,
    resources: &mut PersistentResources<'_, D>,
    scope: &'ast Scope<'ast>,
    nodes: &[&'ast Node<'ast>],
) -> (CompiledModule, Option<NodeId>) {
    let module = compile_library(ctx, resources, scope, nodes);
    let main = nodes.iter().find_map(|node| match node {
        Node::Declaration { id, .. } if id == "main" => Some(node.id()),
        _ => None,
    });
    (module, main)
}
