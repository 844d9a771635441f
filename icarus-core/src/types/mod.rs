//! The type system: the interned lattice of types plus qualified types
//! (§3.1, §3.2, §4.1).

pub mod architecture;
pub mod completion;
pub mod interner;
pub mod lattice;

pub use completion::{EnumKind, EnumType, Field, ModuleId, StructType};
pub use interner::{Primitive, Type, TypeHandle, TypeInterner};

use bitflags::bitflags;

bitflags! {
    /// §3.2: `Const` means the value is known at compile time, `Ref` means
    /// addressable, `Buf` means contiguous-buffer addressable, `Error` is
    /// the sticky poisoning bit (§7).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Qualifiers: u8 {
        const CONST = 1 << 0;
        const REF   = 1 << 1;
        const BUF   = 1 << 2;
        const ERROR = 1 << 3;
    }
}

/// `QualType = (Type, Qualifiers)` (§3.2). Every verified expression has
/// exactly one of these.
#[derive(Debug, Clone)]
pub struct QualType {
    pub ty: TypeHandle,
    pub qualifiers: Qualifiers,
}

impl QualType {
    pub fn new(ty: TypeHandle, qualifiers: Qualifiers) -> Self {
        QualType { ty, qualifiers }
    }

    pub fn rvalue(ty: TypeHandle) -> Self {
        QualType::new(ty, Qualifiers::empty())
    }

    pub fn constant(ty: TypeHandle) -> Self {
        QualType::new(ty, Qualifiers::CONST)
    }

    pub fn is_error(&self) -> bool {
        self.qualifiers.contains(Qualifiers::ERROR)
    }

    /// Poisons this qual type in place (§7): downstream consumers see the
    /// bit and skip re-diagnosing.
    pub fn poison(&mut self) {
        self.qualifiers.insert(Qualifiers::ERROR);
    }

    pub fn poisoned(ty: TypeHandle) -> Self {
        QualType::new(ty, Qualifiers::ERROR)
    }
}
