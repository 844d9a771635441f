//! Type lattice, verifier, generic instantiation, and IR builder for the
//! Icarus compiler core.
//!
//! This crate never parses source text and never renders a diagnostic for
//! a terminal; it consumes an already-built AST (`icarus_ast`) plus a
//! caller-supplied [`DiagnosticConsumer`](icarus_diagnostics::DiagnosticConsumer)
//! and [`Importer`](compile::Importer), and hands back `QualType`s, an IR
//! module, and a compiled module's export table (§6.4).

pub mod compile;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod generics;
pub mod ir;
pub mod pattern;
pub mod resolver;
pub mod types;
pub mod verify;
pub mod work;

pub use icarus_diagnostics as diagnostics;

pub use compile::{compile_executable, compile_library, CompiledModule, Importer, PersistentResources, WorkResources};
pub use context::{BoundParameters, CalleeLocator, Context, TypeBinding};
pub use error::{CoreError, CoreResult};
pub use generics::GenericInstantiator;
pub use resolver::{build_overload_set, lookup_lexical, Candidate, ExportedSymbol, ModuleExports};
pub use types::{ModuleId, Primitive, QualType, Qualifiers, Type, TypeHandle, TypeInterner};
pub use verify::TypeVerifier;
pub use work::{CyclicDependencyTracker, Kind, WorkGraph, WorkItem};
