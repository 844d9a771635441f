//! `Join`/`Meet`/`CanCastImplicitly`/`Inferrable` over interned types
//! (§4.1). Every procedure here is pure: it only ever asks the
//! [`TypeInterner`] to construct handles it already knows how to build.

use std::sync::Arc;

use super::interner::{same_type, Primitive, Type, TypeHandle};
use super::TypeInterner;

/// `Join(⊥, T) = T`: the caller starts an accumulation with `None` and
/// folds in each candidate via [`join`].
pub fn join_many(interner: &TypeInterner, candidates: impl IntoIterator<Item = TypeHandle>) -> Option<TypeHandle> {
    let mut acc: Option<TypeHandle> = None;
    for candidate in candidates {
        acc = Some(match acc {
            None => candidate,
            Some(prev) => join(interner, &prev, &candidate)?,
        });
    }
    acc
}

/// Least upper bound. Returns `None` on failure (the error sentinel).
pub fn join(interner: &TypeInterner, a: &TypeHandle, b: &TypeHandle) -> Option<TypeHandle> {
    if same_type(a, b) {
        return Some(a.clone());
    }

    match (&**a, &**b) {
        (Type::Primitive(Primitive::EmptyArray), Type::Arr(u, _))
        | (Type::Arr(u, _), Type::Primitive(Primitive::EmptyArray)) => {
            Some(interner.array_unknown_length(u.clone()))
        }
        (Type::Primitive(Primitive::EmptyArray), Type::ArrUnknown(u))
        | (Type::ArrUnknown(u), Type::Primitive(Primitive::EmptyArray)) => {
            Some(interner.array_unknown_length(u.clone()))
        }

        (Type::Arr(t, n), Type::Arr(u, m)) => {
            let elem = join(interner, t, u)?;
            if n == m {
                Some(interner.array(elem, *n))
            } else {
                Some(interner.array_unknown_length(elem))
            }
        }
        (Type::Arr(t, _), Type::ArrUnknown(u)) | (Type::ArrUnknown(u), Type::Arr(t, _)) => {
            let elem = join(interner, t, u)?;
            Some(interner.array_unknown_length(elem))
        }
        (Type::ArrUnknown(t), Type::ArrUnknown(u)) => {
            let elem = join(interner, t, u)?;
            Some(interner.array_unknown_length(elem))
        }

        (Type::Ptr(t), Type::Primitive(Primitive::NullPtr))
        | (Type::Primitive(Primitive::NullPtr), Type::Ptr(t)) => Some(interner.ptr(t.clone())),
        (Type::BufPtr(t), Type::Primitive(Primitive::NullPtr))
        | (Type::Primitive(Primitive::NullPtr), Type::BufPtr(t)) => Some(interner.buf_ptr(t.clone())),

        (Type::Variant(ts), _) => {
            let mut members: Vec<_> = ts.clone();
            members.push(b.clone());
            Some(interner.variant(members))
        }
        (_, Type::Variant(ts)) => {
            let mut members: Vec<_> = ts.clone();
            members.push(a.clone());
            Some(interner.variant(members))
        }

        // Functions and scopes never join into a variant: an overload set
        // confusion is a hard error, not a union type.
        (Type::Func { .. }, _) | (_, Type::Func { .. }) | (Type::Scope(_), _) | (_, Type::Scope(_)) => None,

        _ => Some(interner.variant(vec![a.clone(), b.clone()])),
    }
}

/// Greatest lower bound: `Meet(argT, paramT)` succeeds iff there is a
/// value of `argT` that can reach `paramT`.
pub fn meet(interner: &TypeInterner, arg: &TypeHandle, param: &TypeHandle) -> Option<TypeHandle> {
    if same_type(arg, param) {
        return Some(arg.clone());
    }

    match (&**arg, &**param) {
        (Type::Variant(ts), _) => {
            if ts.iter().any(|t| same_type(t, param)) {
                Some(param.clone())
            } else {
                None
            }
        }
        (_, Type::Variant(ts)) => {
            if ts.iter().any(|t| same_type(t, arg)) {
                Some(arg.clone())
            } else {
                None
            }
        }

        (Type::Primitive(Primitive::NullPtr), Type::Ptr(_)) => Some(param.clone()),
        (Type::Primitive(Primitive::NullPtr), Type::BufPtr(_)) => Some(param.clone()),
        (Type::Primitive(Primitive::EmptyArray), Type::Arr(..)) => Some(param.clone()),
        (Type::Primitive(Primitive::EmptyArray), Type::ArrUnknown(_)) => Some(param.clone()),

        (Type::Arr(t, n), Type::Arr(u, m)) if n == m => meet(interner, t, u).map(|e| interner.array(e, *n)),
        (Type::Arr(t, _), Type::ArrUnknown(u)) | (Type::ArrUnknown(t), Type::ArrUnknown(u)) => {
            meet(interner, t, u).map(|e| interner.array_unknown_length(e))
        }

        _ => None,
    }
}

/// `CanCastImplicitly(from, to) ≡ Join(from, to) == to`.
pub fn can_cast_implicitly(interner: &TypeInterner, from: &TypeHandle, to: &TypeHandle) -> bool {
    match join(interner, from, to) {
        Some(joined) => same_type(&joined, to),
        None => false,
    }
}

/// `Inferrable(T)`: false for `NullPtr`, `EmptyArray`, and any composite
/// whose leaves contain either (needed when a declaration omits its type
/// annotation).
pub fn inferrable(ty: &TypeHandle) -> bool {
    Type::is_inferrable(ty)
}

/// §3.1: `is_big(T)` is a pure function of the handle.
pub fn is_big(ty: &TypeHandle) -> bool {
    ty.is_big()
}

fn _assert_handle_is_arc(_: &Arc<Type>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_of_identical_types_is_identity() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        assert!(same_type(&join(&interner, &i64a, &i64a).unwrap(), &i64a));
    }

    #[test]
    fn meet_of_identical_types_is_identity() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        assert!(same_type(&meet(&interner, &i64a, &i64a).unwrap(), &i64a));
    }

    #[test]
    fn join_of_distinct_concrete_types_is_a_variant() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        let boolean = interner.bool_();
        let joined = join(&interner, &i64a, &boolean).unwrap();
        assert!(matches!(&*joined, Type::Variant(ts) if ts.len() == 2));
    }

    #[test]
    fn can_cast_implicitly_into_variant_but_not_out() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        let boolean = interner.bool_();
        let variant = interner.variant(vec![i64a.clone(), boolean.clone()]);
        assert!(can_cast_implicitly(&interner, &i64a, &variant));
        assert!(!can_cast_implicitly(&interner, &variant, &i64a));
    }

    #[test]
    fn join_of_empty_array_and_known_array_drops_the_length() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        let arr = interner.array(i64a.clone(), 3);
        let empty = interner.empty_array();
        let joined = join(&interner, &empty, &arr).unwrap();
        assert!(matches!(&*joined, Type::ArrUnknown(_)));
    }

    #[test]
    fn join_of_null_ptr_and_ptr_is_the_pointer_type() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        let ptr = interner.ptr(i64a);
        let joined = join(&interner, &interner.null_ptr(), &ptr).unwrap();
        assert!(same_type(&joined, &ptr));
    }

    #[test]
    fn nullptr_and_bufptr_do_not_join_into_ptr() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        let buf_ptr = interner.buf_ptr(i64a.clone());
        let ptr = interner.ptr(i64a);
        let joined = join(&interner, &interner.null_ptr(), &buf_ptr).unwrap();
        assert!(!same_type(&joined, &ptr));
        assert!(same_type(&joined, &buf_ptr));
    }

    #[test]
    fn empty_array_is_not_inferrable() {
        let interner = TypeInterner::new();
        assert!(!inferrable(&interner.empty_array()));
        assert!(inferrable(&interner.i64_()));
    }

    #[test]
    fn composite_containing_nullptr_is_not_inferrable() {
        let interner = TypeInterner::new();
        let tup = interner.tuple(vec![interner.i64_(), interner.null_ptr()]);
        assert!(!inferrable(&tup));
    }
}
