//! Hash-consed type constructors (§3.1, §4.1).
//!
//! `Struct`/`Enum`/`Flags` are identity types and are never deduped here:
//! each call to [`TypeInterner::new_struct`]/[`new_enum`](TypeInterner::new_enum)
//! returns a fresh handle, and two handles are the same type iff they are
//! the same `Arc` (checked by pointer, via [`TypeHandle::same`]).
//! Every other constructor is pure and memoized: structurally equal
//! arguments return the same handle.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};

use super::completion::{EnumType, ModuleId, StructType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
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
    /// The type of a type expression, e.g. the value `i32` itself.
    Type,
    Module,
    NullPtr,
    EmptyArray,
}

impl Primitive {
    pub fn is_integer(self) -> bool {
        use Primitive::*;
        matches!(self, I8 | I16 | I32 | I64 | U8 | U16 | U32 | U64)
    }

    pub fn is_unsigned(self) -> bool {
        use Primitive::*;
        matches!(self, U8 | U16 | U32 | U64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    pub fn size(self) -> u32 {
        use Primitive::*;
        match self {
            Bool | I8 | U8 | Char => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            I64 | U64 | F64 | Type | Module | NullPtr => 8,
            EmptyArray => 0,
        }
    }
}

pub type TypeHandle = Arc<Type>;

/// A constructed type (§3.1). Everything except `Struct`/`Enum`/`Flags`/
/// generics is pure data deduplicated by [`TypeInterner`]; those four are
/// identity types owned behind a lock so their completion state machine
/// (§4.3) can mutate them in place.
#[derive(Debug)]
pub enum Type {
    Primitive(Primitive),
    Ptr(TypeHandle),
    BufPtr(TypeHandle),
    /// Known-length array.
    Arr(TypeHandle, u64),
    /// Unknown-length array, e.g. the join of two different-length arrays.
    ArrUnknown(TypeHandle),
    Tuple(Vec<TypeHandle>),
    /// Already normalized: flattened, deduped, sorted by handle address.
    Variant(Vec<TypeHandle>),
    Func { input: TypeHandle, output: TypeHandle },
    Slice(TypeHandle),
    Range(TypeHandle),
    Scope(TypeHandle),
    Struct(Arc<Mutex<StructType>>),
    Enum(Arc<Mutex<EnumType>>),
}

impl Type {
    pub fn as_struct(&self) -> Option<&Arc<Mutex<StructType>>> {
        match self {
            Type::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&Arc<Mutex<EnumType>>> {
        match self {
            Type::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[TypeHandle]> {
        match self {
            Type::Tuple(ts) => Some(ts),
            _ => None,
        }
    }

    pub fn as_variant(&self) -> Option<&[TypeHandle]> {
        match self {
            Type::Variant(ts) => Some(ts),
            _ => None,
        }
    }

    /// §3.1: "Big types are passed and returned by hidden pointer; small
    /// types by value."
    pub fn is_big(&self) -> bool {
        matches!(
            self,
            Type::Arr(..) | Type::ArrUnknown(_) | Type::Struct(_) | Type::Variant(_) | Type::Tuple(_)
        )
    }

    /// §4.1 `Inferrable`: false for `NullPtr`, `EmptyArray`, and any
    /// composite whose leaves contain either.
    pub fn is_inferrable(self_handle: &TypeHandle) -> bool {
        fn leaves_ok(t: &Type) -> bool {
            match t {
                Type::Primitive(Primitive::NullPtr) | Type::Primitive(Primitive::EmptyArray) => false,
                Type::Primitive(_) | Type::Struct(_) | Type::Enum(_) => true,
                Type::Ptr(inner) | Type::BufPtr(inner) | Type::Slice(inner) | Type::Range(inner)
                | Type::Scope(inner) | Type::Arr(inner, _) | Type::ArrUnknown(inner) => leaves_ok(inner),
                Type::Tuple(ts) | Type::Variant(ts) => ts.iter().all(|h| leaves_ok(h)),
                Type::Func { input, output } => leaves_ok(input) && leaves_ok(output),
            }
        }
        leaves_ok(self_handle)
    }
}

/// Pointer/identity comparison helper: two handles name the same type iff
/// they are the same allocation. Structural types are always compared
/// this way because the interner guarantees structural equality implies
/// allocation equality (hash-consing); identity types have no other
/// notion of equality.
pub fn same_type(a: &TypeHandle, b: &TypeHandle) -> bool {
    Arc::ptr_eq(a, b)
}

/// Structural key used only to dedupe the *pure* constructors. Built from
/// already-interned sub-handles' addresses, so equal structure always
/// yields an equal key without re-hashing the whole subtree.
#[derive(Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Primitive(Primitive),
    Ptr(usize),
    BufPtr(usize),
    Arr(usize, u64),
    ArrUnknown(usize),
    Tuple(Vec<usize>),
    Variant(Vec<usize>),
    Func(usize, usize),
    Slice(usize),
    Range(usize),
    Scope(usize),
}

fn addr(h: &TypeHandle) -> usize {
    Arc::as_ptr(h) as usize
}

pub struct TypeInterner {
    cache: DashMap<TypeKey, TypeHandle>,
    next_module_id: std::sync::atomic::AtomicU32,
}

impl TypeInterner {
    pub fn new() -> Self {
        TypeInterner { cache: DashMap::new(), next_module_id: std::sync::atomic::AtomicU32::new(0) }
    }

    pub fn fresh_module_id(&self) -> ModuleId {
        ModuleId(self.next_module_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    fn intern(&self, key: TypeKey, build: impl FnOnce() -> Type) -> TypeHandle {
        if let Some(existing) = self.cache.get(&key) {
            return existing.clone();
        }
        self.cache.entry(key).or_insert_with(|| Arc::new(build())).clone()
    }

    pub fn primitive(&self, p: Primitive) -> TypeHandle {
        self.intern(TypeKey::Primitive(p), || Type::Primitive(p))
    }

    pub fn bool_(&self) -> TypeHandle {
        self.primitive(Primitive::Bool)
    }
    pub fn i64_(&self) -> TypeHandle {
        self.primitive(Primitive::I64)
    }
    pub fn null_ptr(&self) -> TypeHandle {
        self.primitive(Primitive::NullPtr)
    }
    pub fn empty_array(&self) -> TypeHandle {
        self.primitive(Primitive::EmptyArray)
    }

    /// `Void == Tup{}` (§3.1 invariant).
    pub fn void(&self) -> TypeHandle {
        self.tuple(vec![])
    }

    pub fn ptr(&self, pointee: TypeHandle) -> TypeHandle {
        let key = TypeKey::Ptr(addr(&pointee));
        self.intern(key, || Type::Ptr(pointee))
    }

    pub fn buf_ptr(&self, pointee: TypeHandle) -> TypeHandle {
        let key = TypeKey::BufPtr(addr(&pointee));
        self.intern(key, || Type::BufPtr(pointee))
    }

    pub fn array(&self, element: TypeHandle, length: u64) -> TypeHandle {
        let key = TypeKey::Arr(addr(&element), length);
        self.intern(key, || Type::Arr(element, length))
    }

    pub fn array_unknown_length(&self, element: TypeHandle) -> TypeHandle {
        let key = TypeKey::ArrUnknown(addr(&element));
        self.intern(key, || Type::ArrUnknown(element))
    }

    /// `Tup(ts)` with `|ts|==1` returns `ts[0]` (§4.1 normalization).
    pub fn tuple(&self, elements: Vec<TypeHandle>) -> TypeHandle {
        if elements.len() == 1 {
            return elements.into_iter().next().unwrap();
        }
        let key = TypeKey::Tuple(elements.iter().map(addr).collect());
        self.intern(key, || Type::Tuple(elements))
    }

    /// `Var(ts)` normalized: flatten nested variants, dedupe, sort by
    /// handle address, then collapse singletons (§4.1, §3.1). `ts` must be
    /// non-empty (`Var{}` is illegal per the spec).
    pub fn variant(&self, members: Vec<TypeHandle>) -> TypeHandle {
        assert!(!members.is_empty(), "Var{{}} is illegal");
        let mut flat = Vec::new();
        for m in members {
            match &*m {
                Type::Variant(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(m),
            }
        }
        flat.sort_by_key(addr);
        flat.dedup_by(|a, b| Arc::ptr_eq(a, b));
        if flat.len() == 1 {
            return flat.into_iter().next().unwrap();
        }
        let key = TypeKey::Variant(flat.iter().map(addr).collect());
        self.intern(key, || Type::Variant(flat))
    }

    pub fn func(&self, input: TypeHandle, output: TypeHandle) -> TypeHandle {
        let key = TypeKey::Func(addr(&input), addr(&output));
        self.intern(key, || Type::Func { input, output })
    }

    pub fn slice(&self, underlying_array: TypeHandle) -> TypeHandle {
        let key = TypeKey::Slice(addr(&underlying_array));
        self.intern(key, || Type::Slice(underlying_array))
    }

    pub fn range(&self, end: TypeHandle) -> TypeHandle {
        let key = TypeKey::Range(addr(&end));
        self.intern(key, || Type::Range(end))
    }

    pub fn scope(&self, state: TypeHandle) -> TypeHandle {
        let key = TypeKey::Scope(addr(&state));
        self.intern(key, || Type::Scope(state))
    }

    /// Identity type: never deduplicated, always a fresh allocation.
    pub fn new_struct(&self, module: ModuleId, name: String) -> TypeHandle {
        Arc::new(Type::Struct(Arc::new(Mutex::new(StructType::incomplete(module, name)))))
    }

    pub fn new_enum(&self, module: ModuleId, name: String, kind: super::EnumKind) -> TypeHandle {
        Arc::new(Type::Enum(Arc::new(Mutex::new(EnumType::incomplete(module, name, kind)))))
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_constructors_are_pointer_equal_when_equal_args() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        assert!(same_type(&interner.ptr(i64a.clone()), &interner.ptr(i64a.clone())));
        assert!(same_type(&interner.array(i64a.clone(), 4), &interner.array(i64a.clone(), 4)));
        assert!(!same_type(&interner.array(i64a.clone(), 4), &interner.array(i64a, 5)));
    }

    #[test]
    fn tuple_of_one_collapses_to_its_element() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        assert!(same_type(&interner.tuple(vec![i64a.clone()]), &i64a));
    }

    #[test]
    fn void_is_the_empty_tuple() {
        let interner = TypeInterner::new();
        match &*interner.void() {
            Type::Tuple(ts) => assert!(ts.is_empty()),
            _ => panic!("Void must be Tup{{}}"),
        }
    }

    #[test]
    fn variant_is_sort_independent_and_deduped() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        let boolean = interner.bool_();
        let v1 = interner.variant(vec![i64a.clone(), boolean.clone(), i64a.clone()]);
        let v2 = interner.variant(vec![boolean, i64a]);
        assert!(same_type(&v1, &v2));
    }

    #[test]
    fn variant_of_one_collapses_to_its_element() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        assert!(same_type(&interner.variant(vec![i64a.clone()]), &i64a));
    }

    #[test]
    fn is_big_matches_array_struct_variant_tuple() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        let boolean = interner.bool_();
        assert!(interner.array(i64a.clone(), 3).is_big());
        assert!(interner.variant(vec![i64a.clone(), boolean.clone()]).is_big());
        assert!(interner.tuple(vec![i64a.clone(), boolean]).is_big());
        assert!(!i64a.is_big());
    }

    #[test]
    fn ptr_and_buf_ptr_are_always_distinct() {
        let interner = TypeInterner::new();
        let i64a = interner.i64_();
        assert!(!same_type(&interner.ptr(i64a.clone()), &interner.buf_ptr(i64a)));
    }

    #[test]
    fn struct_identity_types_are_never_deduped() {
        let interner = TypeInterner::new();
        let module = interner.fresh_module_id();
        let a = interner.new_struct(module, "S".into());
        let b = interner.new_struct(module, "S".into());
        assert!(!same_type(&a, &b));
    }
}
