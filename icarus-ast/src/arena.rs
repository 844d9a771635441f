//! Arena allocation for AST nodes.
//!
//! All nodes are allocated in a single arena per compilation unit so that
//! recursive node shapes (a `Binop` holding two `&'ast Node<'ast>`) don't
//! need `Box` and every node gets a stable address to key `Context` maps by.

use typed_arena::Arena;

use crate::{Node, ParameterizedExpression, Scope};

pub struct AstArena<'ast> {
    nodes: Arena<Node<'ast>>,
    params: Arena<ParameterizedExpression<'ast>>,
    scopes: Arena<Scope<'ast>>,
}

impl<'ast> AstArena<'ast> {
    pub fn new() -> Self {
        Self { nodes: Arena::new(), params: Arena::new(), scopes: Arena::new() }
    }

    pub fn alloc(&'ast self, node: Node<'ast>) -> &'ast Node<'ast> {
        self.nodes.alloc(node)
    }

    pub fn alloc_params(
        &'ast self,
        params: ParameterizedExpression<'ast>,
    ) -> &'ast ParameterizedExpression<'ast> {
        self.params.alloc(params)
    }

    pub fn alloc_scope(&'ast self, scope: Scope<'ast>) -> &'ast Scope<'ast> {
        self.scopes.alloc(scope)
    }
}

impl<'ast> Default for AstArena<'ast> {
    fn default() -> Self {
        Self::new()
    }
}
