//! AST node shapes for Icarus source.
//!
//! This crate does not parse anything. It defines the shape of the tree an
//! external parser hands to the compiler core (`icarus-core`), per the
//! "parsed AST" contract: every node carries a [`SourceRange`]; nodes are
//! immutable once built; qualified types are *not* stored on the node (they
//! live in the verifier's `Context`, keyed by [`NodeId`]).

pub mod arena;

use bitflags::bitflags;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Opaque handle to a registered source file, issued by the `Importer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// A half-open byte range `[begin, end)` into the source named by `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceRange {
    pub source: SourceId,
    pub begin: u32,
    pub end: u32,
}

impl SourceRange {
    pub const fn unknown() -> Self {
        Self { source: SourceId(0), begin: 0, end: 0 }
    }
}

/// Stable identity for an AST node: the address of its arena allocation.
///
/// Context maps are keyed by this rather than by node content, since two
/// syntactically identical nodes at different source locations are distinct
/// work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl<'ast> From<&'ast Node<'ast>> for NodeId {
    fn from(node: &'ast Node<'ast>) -> Self {
        NodeId(node as *const Node<'ast> as usize)
    }
}

impl<'ast> From<&'ast ParameterizedExpression<'ast>> for NodeId {
    fn from(node: &'ast ParameterizedExpression<'ast>) -> Self {
        NodeId(node as *const ParameterizedExpression<'ast> as usize)
    }
}

/// Scalar literal carried by a `Terminal` node. Each variant corresponds to
/// one of the interner's primitive singletons (§3.1 of the spec).
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalValue {
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    StringLiteral(String),
    /// The `null` pointer constant; joins with any `Ptr(T)`/`BufPtr(T)`.
    NullPtr,
    /// A parser-produced `[]` with no inferable element type.
    EmptyArray,
    /// A literal naming a type, e.g. `i32` used as a value (`T: type = i32`).
    TypeLiteral(BuiltinTypeName),
}

/// The ~15 primitive leaves the interner hands out as singletons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTypeName {
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Type,
    Module,
    Void,
}

/// A compiler builtin referenced by name (`foreign`, `bytes`, `align_of`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuiltinFnName(pub String);

bitflags! {
    /// Flags attached to a `Declaration` node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeclFlags: u8 {
        /// This declaration is a function parameter.
        const FN_PARAM      = 1 << 0;
        /// This declaration is a function output (named return value).
        const OUTPUT        = 1 << 1;
        /// Declared with `::=` (compile-time constant) rather than `:=`.
        const CONST         = 1 << 2;
        /// The initializer is the `--` hole marker, i.e. explicitly absent.
        const INIT_IS_HOLE  = 1 << 3;
    }
}

/// Operators recognized by `Unop`/`Binop`/`ChainOp`. The lexer/parser is an
/// external collaborator; this enum only needs to be rich enough for the
/// core to dispatch on operator identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Not,
    Negate,
    /// `@expr` — pointer dereference.
    At,
    /// `&expr` — address-of, produces a `Ref`-qualified pointer value.
    AddressOf,
}

/// `Enum { ... }` vs `Flags { ... }` (§3.1: both are named-symbol-set types,
/// differing in whether values are discriminants or bitmasks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKind {
    Enum,
    Flags,
}

#[derive(Debug, Clone)]
pub struct Enumerator<'ast> {
    pub name: String,
    /// Explicit value, e.g. `X ::= 3`; `None` means "assign implicitly".
    pub value: Option<&'ast Node<'ast>>,
}

#[derive(Debug, Clone)]
pub struct FieldDecl<'ast> {
    pub name: String,
    pub type_expr: Option<&'ast Node<'ast>>,
    pub initial_value: Option<&'ast Node<'ast>>,
    pub hashtags: Vec<String>,
}

/// One argument at a call site: `f(3, name = 4)`.
#[derive(Debug, Clone)]
pub struct Argument<'ast> {
    pub name: Option<String>,
    pub value: &'ast Node<'ast>,
}

/// One branch of a `Jump`/`Goto`: a target block name plus the arguments
/// passed to it.
#[derive(Debug, Clone)]
pub struct JumpOption<'ast> {
    pub block: String,
    pub args: Vec<&'ast Node<'ast>>,
}

/// Common fields shared by every construct that takes compile-time
/// parameters: `FunctionLiteral`, `StructLiteral`-with-params, `ScopeLiteral`,
/// `Jump`, `BlockLiteral`. Modeled as a struct embedded by value (per the
/// redesign note: no base-class virtual dispatch), not a trait object.
#[derive(Debug)]
pub struct ParameterizedExpression<'ast> {
    pub range: SourceRange,
    /// Declaration nodes, in source order.
    pub params: Vec<&'ast Node<'ast>>,
    /// Filled by `build_param_dependency_graph`: a topological order over
    /// `params` respecting `$x`-style dependent-type references (§4.6.1).
    /// `None` until computed.
    pub dependency_order: RefCell<Option<Vec<usize>>>,
}

impl<'ast> ParameterizedExpression<'ast> {
    pub fn new(range: SourceRange, params: Vec<&'ast Node<'ast>>) -> Self {
        Self { range, params, dependency_order: RefCell::new(None) }
    }

    /// A `ParameterizedExpression` is generic iff some parameter is `Const`
    /// or its type expression is dependent (mentions `$`). Non-dependent,
    /// non-const parameter lists (an ordinary function's value parameters)
    /// make this expression monomorphic — it has exactly one instantiation.
    pub fn is_generic(&self) -> bool {
        self.params.iter().any(|p| match p {
            Node::Declaration { flags, type_expr, .. } => {
                flags.contains(DeclFlags::CONST) || type_expr.map_or(false, is_dependent_type_expr)
            }
            _ => false,
        })
    }
}

/// `$` or `$x` appearing anywhere in a type expression marks it dependent
/// (§4.6.1). This is a syntactic scan, not a type-level property, since it
/// runs before any verification has happened.
fn is_dependent_type_expr(expr: &Node<'_>) -> bool {
    match expr {
        Node::ArgumentType { .. } => true,
        Node::ArrayType { lengths, data_type, .. } => {
            lengths.iter().any(|l| is_dependent_type_expr(l)) || is_dependent_type_expr(data_type)
        }
        Node::SliceType { data_type, .. } => is_dependent_type_expr(data_type),
        Node::Unop { operand, .. } => is_dependent_type_expr(operand),
        Node::FunctionType { params, outputs, .. } => {
            params.iter().any(|p| is_dependent_type_expr(p))
                || outputs.iter().any(|o| is_dependent_type_expr(o))
        }
        _ => false,
    }
}

/// The kind of scope a `Scope` value represents; used when deciding which
/// embedded-module lookups are visible (§3.3 "Scope & ownership").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    ScopeLiteralBody,
    BlockBody,
    Executable,
}

/// A lexical scope node. Scopes form a tree rooted at a `Module` scope;
/// every AST node stores a *non-owning* pointer to its enclosing scope,
/// written once by `Initialize`.
#[derive(Debug)]
pub struct Scope<'ast> {
    pub kind: ScopeKind,
    pub parent: Cell<Option<&'ast Scope<'ast>>>,
    /// Multimap from identifier text to the declarations introducing it.
    pub declarations: RefCell<HashMap<String, Vec<&'ast Node<'ast>>>>,
    /// Modules whose exports are looked up transparently from this scope.
    pub embedded_modules: RefCell<Vec<ModuleHandle>>,
}

impl<'ast> Scope<'ast> {
    pub fn new(kind: ScopeKind, parent: Option<&'ast Scope<'ast>>) -> Self {
        Self {
            kind,
            parent: Cell::new(parent),
            declarations: RefCell::new(HashMap::new()),
            embedded_modules: RefCell::new(Vec::new()),
        }
    }

    pub fn declare(&self, name: String, decl: &'ast Node<'ast>) {
        self.declarations.borrow_mut().entry(name).or_default().push(decl);
    }
}

/// Opaque handle to a compiled module, as returned by the `Importer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u32);

/// The closed sum of AST node variants the core must handle. Deliberately
/// flat: a match arm per variant rather than a class hierarchy with virtual
/// `Accept(visitor)` dispatch (see design notes on dynamic dispatch).
#[derive(Debug)]
pub enum Node<'ast> {
    // ---- Leaves ---------------------------------------------------------
    Terminal { range: SourceRange, value: TerminalValue },
    Identifier { range: SourceRange, name: String, scope: Cell<Option<&'ast Scope<'ast>>> },
    BuiltinFn { range: SourceRange, name: BuiltinFnName },
    Label { range: SourceRange, name: String },
    /// The `--` uninitialized marker.
    Hole { range: SourceRange },
    /// `$` or `$x`: "infer this parameter's type from the argument"
    /// (§4.6.1). `reference` names the parameter whose inferred type this
    /// one must equal, if any (the `$x` form).
    ArgumentType { range: SourceRange, reference: Option<String> },

    // ---- Unary/binary/chain/cast -----------------------------------------
    Unop { range: SourceRange, op: Operator, operand: &'ast Node<'ast> },
    Binop { range: SourceRange, op: Operator, lhs: &'ast Node<'ast>, rhs: &'ast Node<'ast> },
    /// Same-precedence n-ary chain, e.g. `a < b < c`: `ops.len() + 1 == exprs.len()`.
    ChainOp { range: SourceRange, ops: Vec<Operator>, exprs: Vec<&'ast Node<'ast>> },
    Cast { range: SourceRange, expr: &'ast Node<'ast>, type_expr: &'ast Node<'ast> },
    Access { range: SourceRange, operand: &'ast Node<'ast>, member: String },

    // ---- Containers / type expressions ------------------------------------
    ArrayLiteral { range: SourceRange, elems: Vec<&'ast Node<'ast>> },
    ArrayType { range: SourceRange, lengths: Vec<&'ast Node<'ast>>, data_type: &'ast Node<'ast> },
    FunctionType { range: SourceRange, params: Vec<&'ast Node<'ast>>, outputs: Vec<&'ast Node<'ast>> },
    StructLiteral { range: SourceRange, fields: Vec<FieldDecl<'ast>>, hashtags: Vec<String> },
    ParameterizedStructLiteral {
        range: SourceRange,
        params: &'ast ParameterizedExpression<'ast>,
        fields: Vec<FieldDecl<'ast>>,
        hashtags: Vec<String>,
    },
    EnumLiteral { range: SourceRange, kind: EnumKind, enumerators: Vec<Enumerator<'ast>> },
    SliceType { range: SourceRange, data_type: &'ast Node<'ast> },
    Tuple { range: SourceRange, elems: Vec<&'ast Node<'ast>> },

    // ---- Declarations -----------------------------------------------------
    Declaration {
        range: SourceRange,
        id: String,
        type_expr: Option<&'ast Node<'ast>>,
        init_val: Option<&'ast Node<'ast>>,
        flags: DeclFlags,
        hashtags: Vec<String>,
    },

    // ---- Calls --------------------------------------------------------------
    Call { range: SourceRange, callee: &'ast Node<'ast>, args: Vec<Argument<'ast>> },

    // ---- Functions -----------------------------------------------------------
    FunctionLiteral {
        range: SourceRange,
        params: &'ast ParameterizedExpression<'ast>,
        stmts: Vec<&'ast Node<'ast>>,
        outputs: Option<Vec<&'ast Node<'ast>>>,
    },
    ShortFunctionLiteral {
        range: SourceRange,
        params: &'ast ParameterizedExpression<'ast>,
        body: &'ast Node<'ast>,
    },

    // ---- Scopes ----------------------------------------------------------------
    ScopeLiteral {
        range: SourceRange,
        params: &'ast ParameterizedExpression<'ast>,
        state_type: Option<&'ast Node<'ast>>,
        decls: Vec<&'ast Node<'ast>>,
    },
    ScopeNode {
        range: SourceRange,
        name: &'ast Node<'ast>,
        args: Vec<Argument<'ast>>,
        blocks: Vec<&'ast Node<'ast>>,
    },
    BlockLiteral {
        range: SourceRange,
        before: &'ast ParameterizedExpression<'ast>,
        after: &'ast ParameterizedExpression<'ast>,
    },
    BlockNode {
        range: SourceRange,
        name: String,
        /// `None` when the block reference in a scope-node has no argument
        /// list; callers must then pass `()` (§9 "scope block parameters").
        params: Option<&'ast ParameterizedExpression<'ast>>,
        stmts: Vec<&'ast Node<'ast>>,
    },
    Jump {
        range: SourceRange,
        params: &'ast ParameterizedExpression<'ast>,
        options: Vec<JumpOption<'ast>>,
    },
    Goto { range: SourceRange, options: Vec<JumpOption<'ast>> },

    // ---- Statements / flow -------------------------------------------------------
    Assignment { range: SourceRange, lhs: Vec<&'ast Node<'ast>>, rhs: Vec<&'ast Node<'ast>> },
    ReturnStmt { range: SourceRange, exprs: Vec<&'ast Node<'ast>> },
    YieldStmt { range: SourceRange, exprs: Vec<Argument<'ast>>, label: Option<&'ast Node<'ast>> },
    IfStmt {
        range: SourceRange,
        condition: &'ast Node<'ast>,
        then_block: Vec<&'ast Node<'ast>>,
        else_block: Option<Vec<&'ast Node<'ast>>>,
    },
    WhileStmt { range: SourceRange, condition: &'ast Node<'ast>, body: Vec<&'ast Node<'ast>> },
    Switch {
        range: SourceRange,
        expr: Option<&'ast Node<'ast>>,
        cases: Vec<(&'ast Node<'ast>, &'ast Node<'ast>)>,
        default: Option<&'ast Node<'ast>>,
    },
    Import { range: SourceRange, locator: &'ast Node<'ast> },
    DesignatedInitializer {
        range: SourceRange,
        type_expr: &'ast Node<'ast>,
        inits: Vec<(String, &'ast Node<'ast>)>,
    },

    // ---- Pattern matching ---------------------------------------------------------
    /// Binary `expr ~ pattern`, or unary (`expr` absent) used to bind
    /// constants directly, e.g. inside a `case` of a pattern-matching
    /// `Switch` (§4.8).
    PatternMatch { range: SourceRange, expr: Option<&'ast Node<'ast>>, pattern: &'ast Node<'ast> },
}

impl<'ast> Node<'ast> {
    pub fn range(&self) -> SourceRange {
        use Node::*;
        match self {
            Terminal { range, .. }
            | Identifier { range, .. }
            | BuiltinFn { range, .. }
            | Label { range, .. }
            | Hole { range, .. }
            | ArgumentType { range, .. }
            | Unop { range, .. }
            | Binop { range, .. }
            | ChainOp { range, .. }
            | Cast { range, .. }
            | Access { range, .. }
            | ArrayLiteral { range, .. }
            | ArrayType { range, .. }
            | FunctionType { range, .. }
            | StructLiteral { range, .. }
            | ParameterizedStructLiteral { range, .. }
            | EnumLiteral { range, .. }
            | SliceType { range, .. }
            | Tuple { range, .. }
            | Declaration { range, .. }
            | Call { range, .. }
            | FunctionLiteral { range, .. }
            | ShortFunctionLiteral { range, .. }
            | ScopeLiteral { range, .. }
            | ScopeNode { range, .. }
            | BlockLiteral { range, .. }
            | BlockNode { range, .. }
            | Jump { range, .. }
            | Goto { range, .. }
            | Assignment { range, .. }
            | ReturnStmt { range, .. }
            | YieldStmt { range, .. }
            | IfStmt { range, .. }
            | WhileStmt { range, .. }
            | Switch { range, .. }
            | Import { range, .. }
            | DesignatedInitializer { range, .. }
            | PatternMatch { range, .. } => *range,
        }
    }

    pub fn id(&'ast self) -> NodeId {
        NodeId::from(self)
    }

    /// `true` for forms that introduce a value at all (as opposed to pure
    /// statements); used by the verifier to decide whether a `QualType`
    /// entry is expected in `Context::qual_types`.
    pub fn is_expression(&self) -> bool {
        !matches!(
            self,
            Node::Assignment { .. }
                | Node::ReturnStmt { .. }
                | Node::IfStmt { .. }
                | Node::WhileStmt { .. }
                | Node::Switch { .. }
                | Node::Import { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena::AstArena;

    #[test]
    fn node_id_is_stable_per_allocation() {
        let arena = AstArena::new();
        let a = arena.alloc(Node::Hole { range: SourceRange::unknown() });
        let b = arena.alloc(Node::Hole { range: SourceRange::unknown() });
        assert_eq!(NodeId::from(a), NodeId::from(a));
        assert_ne!(NodeId::from(a), NodeId::from(b));
    }

    #[test]
    fn parameterized_expression_generic_iff_const_or_dependent() {
        let arena = AstArena::new();
        let plain = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "x".into(),
            type_expr: None,
            init_val: None,
            flags: DeclFlags::FN_PARAM,
            hashtags: vec![],
        });
        let konst = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "T".into(),
            type_expr: None,
            init_val: None,
            flags: DeclFlags::FN_PARAM | DeclFlags::CONST,
            hashtags: vec![],
        });

        let monomorphic = ParameterizedExpression::new(SourceRange::unknown(), vec![plain]);
        assert!(!monomorphic.is_generic());

        let generic = ParameterizedExpression::new(SourceRange::unknown(), vec![plain, konst]);
        assert!(generic.is_generic());
    }

    #[test]
    fn scope_declare_accumulates_multimap_entries() {
        let arena = AstArena::new();
        let scope = arena.alloc_scope(Scope::new(ScopeKind::Module, None));
        let d1 = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "f".into(),
            type_expr: None,
            init_val: None,
            flags: DeclFlags::empty(),
            hashtags: vec![],
        });
        let d2 = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "f".into(),
            type_expr: None,
            init_val: None,
            flags: DeclFlags::empty(),
            hashtags: vec![],
        });
        scope.declare("f".to_string(), d1);
        scope.declare("f".to_string(), d2);
        assert_eq!(scope.declarations.borrow().get("f").unwrap().len(), 2);
    }
}
