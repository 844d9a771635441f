//! Pattern matching (§4.8): `expr ~ pattern` and the unary binder form.
//!
//! Two pattern families are handled: arithmetic patterns over a known
//! compile-time integer (`n + 3`, `2 * n`), and type patterns that unify
//! structure against a concrete `TypeHandle` (`*T`, `[N; T]`, `[]T`).
//! Both report a binder's concrete value by returning a [`Binding`]; the
//! caller (the verifier) is the one that actually writes it into
//! `Context.constants`, since only it knows which declaration a binder
//! name resolves to.

use icarus_ast::{Node, Operator, TerminalValue};

use crate::types::{Type, TypeHandle};

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Constant { name: String, value: i64 },
    Type { name: String, ty: TypeHandle },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternError {
    /// "pattern not sufficiently simple" (§4.8): the pattern isn't one of
    /// the forms this procedure knows how to invert.
    NotSufficientlySimple,
    TypeMismatch { expected: String, found: String },
}

fn try_const_i64(node: &Node<'_>) -> Option<i64> {
    match node {
        Node::Terminal { value: TerminalValue::I64(k), .. } => Some(*k),
        Node::Terminal { value: TerminalValue::I32(k), .. } => Some(*k as i64),
        _ => None,
    }
}

/// Matches a known compile-time value against an arithmetic pattern,
/// inverting `+`/`-`/`*` when exactly one side is already a known
/// constant. `Identifier` is the binder case: it always succeeds and
/// records `value` under that name.
pub fn match_arithmetic(pattern: &Node<'_>, value: i64) -> Result<Vec<Binding>, PatternError> {
    match pattern {
        Node::Identifier { name, .. } => Ok(vec![Binding::Constant { name: name.clone(), value }]),

        Node::Terminal { .. } => match try_const_i64(pattern) {
            Some(k) if k == value => Ok(vec![]),
            Some(k) => Err(PatternError::TypeMismatch { expected: value.to_string(), found: k.to_string() }),
            None => Err(PatternError::NotSufficientlySimple),
        },

        Node::Unop { op: Operator::Negate, operand, .. } => match_arithmetic(operand, -value),

        Node::Binop { op, lhs, rhs, .. } => {
            let lhs_const = try_const_i64(lhs);
            let rhs_const = try_const_i64(rhs);
            match (op, lhs_const, rhs_const) {
                (Operator::Add, None, Some(k)) => match_arithmetic(lhs, value - k),
                (Operator::Add, Some(k), None) => match_arithmetic(rhs, value - k),
                (Operator::Sub, None, Some(k)) => match_arithmetic(lhs, value + k),
                (Operator::Sub, Some(k), None) => match_arithmetic(rhs, k - value),
                (Operator::Mul, None, Some(k)) if k != 0 && value % k == 0 => match_arithmetic(lhs, value / k),
                (Operator::Mul, Some(k), None) if k != 0 && value % k == 0 => match_arithmetic(rhs, value / k),
                _ => Err(PatternError::NotSufficientlySimple),
            }
        }

        _ => Err(PatternError::NotSufficientlySimple),
    }
}

fn array_element(ty: &TypeHandle) -> Option<TypeHandle> {
    match &**ty {
        Type::Arr(elem, _) | Type::ArrUnknown(elem) => Some(elem.clone()),
        _ => None,
    }
}

/// Structurally unifies a type pattern against a concrete type, recursing
/// into pointee/element positions and binding any `Identifier` leaf to
/// the type it landed on.
pub fn match_type_pattern(pattern: &Node<'_>, ty: &TypeHandle) -> Result<Vec<Binding>, PatternError> {
    match pattern {
        Node::Identifier { name, .. } => Ok(vec![Binding::Type { name: name.clone(), ty: ty.clone() }]),

        // `*T`
        Node::Unop { op: Operator::At, operand, .. } => match &**ty {
            Type::Ptr(inner) | Type::BufPtr(inner) => match_type_pattern(operand, inner),
            _ => Err(PatternError::TypeMismatch { expected: "*T".into(), found: format!("{ty:?}") }),
        },

        // `[]T`
        Node::SliceType { data_type, .. } => match &**ty {
            Type::Slice(underlying) => {
                let elem = array_element(underlying).ok_or_else(|| PatternError::TypeMismatch {
                    expected: "[]T".into(),
                    found: format!("{ty:?}"),
                })?;
                match_type_pattern(data_type, &elem)
            }
            _ => Err(PatternError::TypeMismatch { expected: "[]T".into(), found: format!("{ty:?}") }),
        },

        // `[N; T]`
        Node::ArrayType { lengths, data_type, .. } => {
            let elem = array_element(ty)
                .ok_or_else(|| PatternError::TypeMismatch { expected: "[N; T]".into(), found: format!("{ty:?}") })?;
            let mut bindings = match_type_pattern(data_type, &elem)?;
            if let (Some(length_pattern), Type::Arr(_, n)) = (lengths.first(), &**ty) {
                bindings.extend(match_arithmetic(length_pattern, *n as i64)?);
            }
            Ok(bindings)
        }

        _ => Err(PatternError::NotSufficientlySimple),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icarus_ast::arena::AstArena;
    use icarus_ast::SourceRange;
    use crate::types::TypeInterner;

    #[test]
    fn additive_pattern_inverts_against_known_constant() {
        let arena = AstArena::new();
        let n = arena.alloc(Node::Identifier { range: SourceRange::unknown(), name: "n".into(), scope: Default::default() });
        let three = arena.alloc(Node::Terminal { range: SourceRange::unknown(), value: TerminalValue::I64(3) });
        let pattern = Node::Binop { range: SourceRange::unknown(), op: Operator::Add, lhs: n, rhs: three };

        let bindings = match_arithmetic(&pattern, 10).unwrap();
        assert_eq!(bindings, vec![Binding::Constant { name: "n".into(), value: 7 }]);
    }

    #[test]
    fn multiplicative_pattern_requires_exact_division() {
        let arena = AstArena::new();
        let two = arena.alloc(Node::Terminal { range: SourceRange::unknown(), value: TerminalValue::I64(2) });
        let n = arena.alloc(Node::Identifier { range: SourceRange::unknown(), name: "n".into(), scope: Default::default() });
        let pattern = Node::Binop { range: SourceRange::unknown(), op: Operator::Mul, lhs: two, rhs: n };

        assert_eq!(match_arithmetic(&pattern, 10).unwrap(), vec![Binding::Constant { name: "n".into(), value: 5 }]);
        assert_eq!(match_arithmetic(&pattern, 7), Err(PatternError::NotSufficientlySimple));
    }

    #[test]
    fn pattern_with_two_unknowns_is_not_sufficiently_simple() {
        let arena = AstArena::new();
        let n = arena.alloc(Node::Identifier { range: SourceRange::unknown(), name: "n".into(), scope: Default::default() });
        let m = arena.alloc(Node::Identifier { range: SourceRange::unknown(), name: "m".into(), scope: Default::default() });
        let pattern = Node::Binop { range: SourceRange::unknown(), op: Operator::Add, lhs: n, rhs: m };
        assert_eq!(match_arithmetic(&pattern, 10), Err(PatternError::NotSufficientlySimple));
    }

    #[test]
    fn pointer_type_pattern_unifies_and_binds_pointee() {
        let interner = TypeInterner::new();
        let arena = AstArena::new();
        let i64a = interner.i64_();
        let ptr = interner.ptr(i64a);

        let t = arena.alloc(Node::Identifier { range: SourceRange::unknown(), name: "T".into(), scope: Default::default() });
        let pattern = Node::Unop { range: SourceRange::unknown(), op: Operator::At, operand: t };

        let bindings = match_type_pattern(&pattern, &ptr).unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(matches!(&bindings[0], Binding::Type { name, .. } if name == "T"));
    }

    #[test]
    fn pointer_pattern_rejects_non_pointer_type() {
        let interner = TypeInterner::new();
        let arena = AstArena::new();
        let t = arena.alloc(Node::Identifier { range: SourceRange::unknown(), name: "T".into(), scope: Default::default() });
        let pattern = Node::Unop { range: SourceRange::unknown(), op: Operator::At, operand: t };
        let err = match_type_pattern(&pattern, &interner.i64_()).unwrap_err();
        assert!(matches!(err, PatternError::TypeMismatch { .. }));
    }
}
