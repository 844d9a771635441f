//! Generic instantiation memoized on bound-constant tuples (§4.6), plus
//! the dependent-type parameter dependency graph (§4.6.1).

use std::sync::Arc;

use icarus_ast::{DeclFlags, Node, NodeId, ParameterizedExpression};

use crate::context::{BoundParameters, Context};

/// §4.6.1: a `$` or `$x` parameter type is dependent; `ParameterizedExpression`
/// needs its parameters verified in a topological order respecting those
/// references so that `$x`'s inferred type is known before it is needed.
///
/// Returns, and caches on the node itself
/// (`ParameterizedExpression::dependency_order`), an order over parameter
/// indices such that a parameter naming another via `$x` (the
/// `ArgumentType::reference` field) comes after the parameter it names.
pub fn dependency_order(params: &ParameterizedExpression<'_>) -> Vec<usize> {
    if let Some(cached) = params.dependency_order.borrow().clone() {
        return cached;
    }

    let n = params.params.len();
    let mut edges = vec![Vec::new(); n]; // edges[i] = parameters i depends on
    for (i, p) in params.params.iter().enumerate() {
        if let Node::Declaration { type_expr: Some(type_expr), .. } = p {
            if let Some(reference) = dependent_reference_name(type_expr) {
                if let Some(j) = params.params.iter().position(|q| matches!(q, Node::Declaration { id, .. } if *id == reference))
                {
                    edges[i].push(j);
                }
            }
        }
    }

    let order = topological_order(&edges).unwrap_or_else(|| (0..n).collect());
    *params.dependency_order.borrow_mut() = Some(order.clone());
    order
}

fn dependent_reference_name(expr: &Node<'_>) -> Option<String> {
    match expr {
        Node::ArgumentType { reference: Some(reference), .. } => Some(reference.clone()),
        _ => None,
    }
}

/// Kahn's algorithm; `None` on a cycle (verification itself will surface
/// that as a `CyclicDependency` diagnostic when it re-enters the same
/// declaration — this helper just refuses to guess an order).
fn topological_order(edges: &[Vec<usize>]) -> Option<Vec<usize>> {
    let n = edges.len();
    let mut indegree = vec![0usize; n];
    let mut dependents = vec![Vec::new(); n];
    for (i, deps) in edges.iter().enumerate() {
        indegree[i] = deps.len();
        for &j in deps {
            dependents[j].push(i);
        }
    }
    let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    queue.sort_unstable();
    let mut order = Vec::with_capacity(n);
    let mut cursor = 0;
    while cursor < queue.len() {
        let i = queue[cursor];
        cursor += 1;
        order.push(i);
        let mut newly_free = Vec::new();
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                newly_free.push(d);
            }
        }
        newly_free.sort_unstable();
        queue.extend(newly_free);
    }
    if order.len() == n {
        Some(order)
    } else {
        None
    }
}

/// A `ParameterizedExpression` is generic iff some parameter is `Const`
/// or dependently typed — re-exported here for callers that only import
/// `generics`, mirroring `ParameterizedExpression::is_generic`.
pub fn is_generic(params: &ParameterizedExpression<'_>) -> bool {
    params.is_generic()
}

pub fn is_const_param(node: &Node<'_>) -> bool {
    matches!(node, Node::Declaration { flags, .. } if flags.contains(DeclFlags::CONST))
}

/// Outcome of attempting one instantiation: `Ok` caches and wires the
/// child context; `Err` discards it, leaving no trace in `children`.
pub type InstantiationResult<T> = Result<T, ()>;

/// The memo-cache described in §4.6: given the owning context, the
/// `ParameterizedExpression`'s identity, and a `BoundParameters` key
/// already computed by evaluating this call's `Const` arguments, returns
/// the cached child context if one exists for this key, or runs `verify`
/// in a fresh scratchpad context and promotes it on success.
///
/// `verify` receives the freshly created child context (with nothing
/// pre-bound but its parent pointer) and is responsible for binding each
/// parameter's constant into it before verifying the body — that step
/// needs the AST-specific binding logic the verifier owns, not this
/// module.
pub struct GenericInstantiator;

impl GenericInstantiator {
    pub fn instantiate<T>(
        owner: &Arc<Context>,
        param_expr_id: NodeId,
        key: BoundParameters,
        verify: impl FnOnce(&Arc<Context>) -> InstantiationResult<T>,
    ) -> (Arc<Context>, Option<T>) {
        if let Some(cached) = owner.find_subcontext(param_expr_id, &key) {
            // Cache hit: re-running `verify` would be observable work;
            // the spec (§8) requires the second call be a no-op, so the
            // caller must treat `None` here as "already verified, result
            // not recomputed" and look up whatever it needs from the
            // cached context directly.
            log::trace!("instantiation cache hit for {param_expr_id:?}");
            return (cached, None);
        }

        log::debug!("instantiating {param_expr_id:?} with a fresh binding");
        let child = owner.scratchpad();
        match verify(&child) {
            Ok(value) => {
                let wired = owner.insert_subcontext(param_expr_id, key, child);
                (wired, Some(value))
            }
            Err(()) => (child, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icarus_ast::arena::AstArena;
    use icarus_ast::SourceRange;

    #[test]
    fn dependency_order_places_referenced_parameter_first() {
        let arena = AstArena::new();
        let t = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "T".into(),
            type_expr: None,
            init_val: None,
            flags: DeclFlags::FN_PARAM | DeclFlags::CONST,
            hashtags: vec![],
        });
        let dependent_type = arena.alloc(Node::ArgumentType { range: SourceRange::unknown(), reference: Some("T".into()) });
        let v = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "v".into(),
            type_expr: Some(dependent_type),
            init_val: None,
            flags: DeclFlags::FN_PARAM,
            hashtags: vec![],
        });

        // Declared in dependent-first source order (v before T); the
        // topological order must still place T (index 1) before v (index 0).
        let params = ParameterizedExpression::new(SourceRange::unknown(), vec![v, t]);
        let order = dependency_order(&params);
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn instantiation_is_cached_on_the_second_call_with_the_same_key() {
        let arena = AstArena::new();
        let param_expr = arena.alloc(Node::Hole { range: SourceRange::unknown() }).id();
        let owner = Context::root();
        let key = BoundParameters(vec![("T".into(), vec![1, 0, 0, 0])]);

        let (_ctx1, result1) = GenericInstantiator::instantiate(&owner, param_expr, key.clone(), |_| Ok(42));
        assert_eq!(result1, Some(42));

        let (_ctx2, result2) = GenericInstantiator::instantiate(&owner, param_expr, key, |_| -> InstantiationResult<i32> {
            panic!("must not re-verify a cached instantiation")
        });
        assert_eq!(result2, None);
    }

    #[test]
    fn failed_instantiation_is_not_cached() {
        let arena = AstArena::new();
        let param_expr = arena.alloc(Node::Hole { range: SourceRange::unknown() }).id();
        let owner = Context::root();
        let key = BoundParameters(vec![("T".into(), vec![0])]);

        let (_ctx, result) = GenericInstantiator::instantiate::<()>(&owner, param_expr, key.clone(), |_| Err(()));
        assert_eq!(result, None);
        assert!(owner.find_subcontext(param_expr, &key).is_none());
    }
}
