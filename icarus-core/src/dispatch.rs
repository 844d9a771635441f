//! Parameter matching and dispatch-table expansion over sum types (§4.5).

use icarus_ast::NodeId;

use crate::types::lattice::meet;
use crate::types::{Type, TypeHandle, TypeInterner};

#[derive(Debug, Clone)]
pub struct FormalParam {
    pub name: String,
    pub ty: TypeHandle,
    pub has_default: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ArgSource {
    Positional(usize),
    Named,
    Default,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub callee: NodeId,
    /// One entry per formal parameter, in declaration order.
    pub per_param: Vec<(TypeHandle, ArgSource)>,
}

#[derive(Debug, Clone)]
pub enum MatchError {
    MissingArgument { param: String },
    UnknownNamedArgument { arg_name: String },
}

/// §4.5 step 1: "Match positional args to the leading parameters; match
/// named args to remaining; default the rest. Fail if any non-default
/// parameter is unmatched or any named arg is unknown."
///
/// This only performs the *shape* match (which formal slot each argument
/// fills); whether the argument's type actually fits the formal type is
/// `Meet`'s job (step 2, driven by the generic instantiator for
/// dependent parameters and inline here for monomorphic ones).
pub fn match_argument_shape(
    params: &[FormalParam],
    positional: &[NodeId],
    named: &[(String, NodeId)],
) -> Result<Vec<(TypeHandle, ArgSource)>, MatchError> {
    let mut per_param = vec![None; params.len()];

    for (i, arg) in positional.iter().enumerate() {
        if let Some(p) = per_param.get_mut(i) {
            *p = Some((params[i].ty.clone(), ArgSource::Positional(i)));
        }
        let _ = arg;
    }

    for (name, _) in named {
        let index = params.iter().position(|p| &p.name == name);
        match index {
            Some(i) if i >= positional.len() => {
                per_param[i] = Some((params[i].ty.clone(), ArgSource::Named));
            }
            Some(_) => {
                // Named argument re-targets an already-positionally-filled
                // slot: the call is malformed the same way an unknown name
                // is, from the callee's point of view.
                return Err(MatchError::UnknownNamedArgument { arg_name: name.clone() });
            }
            None => return Err(MatchError::UnknownNamedArgument { arg_name: name.clone() }),
        }
    }

    let mut result = Vec::with_capacity(params.len());
    for (i, slot) in per_param.into_iter().enumerate() {
        match slot {
            Some(filled) => result.push(filled),
            None if params[i].has_default => result.push((params[i].ty.clone(), ArgSource::Default)),
            None => return Err(MatchError::MissingArgument { param: params[i].name.clone() }),
        }
    }
    Ok(result)
}

/// One candidate callee together with its formal parameter types, ready
/// for dispatch-table expansion.
#[derive(Debug, Clone)]
pub struct CandidateBinding {
    pub callee: NodeId,
    pub formal_types: Vec<TypeHandle>,
}

#[derive(Debug, Clone)]
pub enum DispatchError {
    UncoveredCombination(Vec<TypeHandle>),
    AmbiguousDispatch(Vec<TypeHandle>),
}

#[derive(Debug)]
pub struct DispatchTable {
    /// One entry per covered concrete-type combination.
    pub entries: Vec<(Vec<TypeHandle>, NodeId)>,
}

impl DispatchTable {
    /// §4.5 "Emission": a single binding means the comparator chain can
    /// be skipped entirely.
    pub fn is_trivial(&self) -> bool {
        self.entries.len() <= 1
    }
}

fn variant_members(ty: &TypeHandle) -> Vec<TypeHandle> {
    match &**ty {
        Type::Variant(ts) => ts.clone(),
        _ => vec![ty.clone()],
    }
}

/// Cartesian product of each argument's variant members, in argument
/// order. A non-variant argument contributes exactly one "choice".
fn cartesian_product(arg_types: &[TypeHandle]) -> Vec<Vec<TypeHandle>> {
    let mut combinations = vec![Vec::new()];
    for arg_type in arg_types {
        let members = variant_members(arg_type);
        let mut next = Vec::with_capacity(combinations.len() * members.len());
        for combo in &combinations {
            for member in &members {
                let mut extended = combo.clone();
                extended.push(member.clone());
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}

/// §4.5 "Dispatch table expansion": builds the Cartesian product of
/// variant-typed arguments, and requires exactly one candidate binding to
/// accept each combination via `Meet`.
pub struct DispatchTableBuilder;

impl DispatchTableBuilder {
    pub fn build(
        interner: &TypeInterner,
        candidates: &[CandidateBinding],
        arg_types: &[TypeHandle],
    ) -> Result<DispatchTable, DispatchError> {
        let combinations = cartesian_product(arg_types);
        let mut entries = Vec::with_capacity(combinations.len());

        for combination in combinations {
            let mut matches: Vec<NodeId> = Vec::new();
            for candidate in candidates {
                if candidate.formal_types.len() != combination.len() {
                    continue;
                }
                let accepts = candidate
                    .formal_types
                    .iter()
                    .zip(&combination)
                    .all(|(formal, arg)| meet(interner, arg, formal).is_some());
                if accepts {
                    matches.push(candidate.callee);
                }
            }
            match matches.as_slice() {
                [] => return Err(DispatchError::UncoveredCombination(combination)),
                [only] => entries.push((combination, *only)),
                _ => return Err(DispatchError::AmbiguousDispatch(combination)),
            }
        }

        Ok(DispatchTable { entries })
    }
}
