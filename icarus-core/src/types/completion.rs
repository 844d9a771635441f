//! Completion state machine for `Struct`/`Enum`/`Flags` (§4.3).
//!
//! Unlike every other constructor in the interner, these three are
//! identity types: two `Struct`s with identical fields are still distinct
//! unless they are literally the same declaration (or the same generic
//! instantiation, memoized elsewhere). Mutability is confined to the
//! transitions below; nothing else may mutate a `Struct`/`Enum`/`Flags`
//! after construction.

use crate::types::architecture::Layout;
use crate::types::TypeHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Only the identity exists. Safe to take `Ptr`/`BufPtr` of; nothing
    /// else.
    Incomplete,
    /// Every field has a resolved `QualType`; sizes/offsets not yet known.
    DataComplete,
    /// Field types, default-value buffers, and layout are all final.
    Complete,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeHandle,
    /// Default-value byte buffer, filled by `CompleteStructData`.
    pub initial_value: Option<Vec<u8>>,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

#[derive(Debug)]
pub struct StructType {
    pub module: ModuleId,
    pub name: String,
    pub state: Completeness,
    pub fields: Vec<Field>,
    pub layout: Option<Layout>,
    pub field_offsets: Vec<u32>,
}

impl StructType {
    pub fn incomplete(module: ModuleId, name: String) -> Self {
        StructType {
            module,
            name,
            state: Completeness::Incomplete,
            fields: Vec::new(),
            layout: None,
            field_offsets: Vec::new(),
        }
    }

    /// `VerifyStructBody`: every field now has a resolved type.
    pub fn set_data(&mut self, fields: Vec<Field>) {
        debug_assert_eq!(self.state, Completeness::Incomplete);
        self.fields = fields;
        self.state = Completeness::DataComplete;
    }

    /// `CompleteStructData`: default-value buffers evaluated.
    pub fn set_initial_values(&mut self, values: Vec<Option<Vec<u8>>>) {
        debug_assert_eq!(self.state, Completeness::DataComplete);
        debug_assert_eq!(values.len(), self.fields.len());
        for (field, value) in self.fields.iter_mut().zip(values) {
            field.initial_value = value;
        }
    }

    /// `CompleteStruct`: finalize layout per the host architecture rules.
    pub fn complete_layout(&mut self, field_layouts: Vec<Layout>) {
        debug_assert_eq!(self.state, Completeness::DataComplete);
        let (offsets, layout) = Layout::of_fields(field_layouts);
        self.field_offsets = offsets;
        self.layout = Some(layout);
        self.state = Completeness::Complete;
    }

    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

#[derive(Debug)]
pub struct EnumType {
    pub module: ModuleId,
    pub name: String,
    pub kind: EnumKind,
    pub complete: bool,
    /// Name -> discriminant (enum) or bitmask (flags).
    pub members: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKind {
    Enum,
    Flags,
}

impl EnumType {
    pub fn incomplete(module: ModuleId, name: String, kind: EnumKind) -> Self {
        EnumType { module, name, kind, complete: false, members: Vec::new() }
    }

    /// `CompleteEnum`: assign discriminants. Explicit discriminants come
    /// from `X ::= k` bindings in `explicit`; everything else gets the
    /// lowest unused nonnegative integer (for `Flags`, the lowest unused
    /// bit position).
    pub fn complete(&mut self, names: Vec<String>, explicit: Vec<Option<i64>>) {
        debug_assert!(!self.complete);
        debug_assert_eq!(names.len(), explicit.len());
        let mut used = std::collections::HashSet::new();
        for value in explicit.iter().flatten() {
            used.insert(*value);
        }
        let mut next = 0i64;
        let mut next_free = || -> i64 {
            while used.contains(&next) {
                next += 1;
            }
            let v = next;
            used.insert(v);
            v
        };
        for (name, explicit) in names.into_iter().zip(explicit) {
            let value = match explicit {
                Some(v) => v,
                None if self.kind == EnumKind::Flags => {
                    let bit = next_free();
                    1i64 << bit
                }
                None => next_free(),
            };
            self.members.push((name, value));
        }
        self.complete = true;
    }

    pub fn discriminant_of(&self, name: &str) -> Option<i64> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_assigns_lowest_unused_nonnegative_integer() {
        let mut e = EnumType::incomplete(ModuleId(0), "Color".into(), EnumKind::Enum);
        e.complete(
            vec!["Red".into(), "Green".into(), "Blue".into()],
            vec![Some(5), None, None],
        );
        assert_eq!(e.discriminant_of("Red"), Some(5));
        assert_eq!(e.discriminant_of("Green"), Some(0));
        assert_eq!(e.discriminant_of("Blue"), Some(1));
    }

    #[test]
    fn flags_assigns_lowest_unused_bit() {
        let mut f = EnumType::incomplete(ModuleId(0), "Perm".into(), EnumKind::Flags);
        f.complete(vec!["Read".into(), "Write".into()], vec![None, None]);
        assert_eq!(f.discriminant_of("Read"), Some(1));
        assert_eq!(f.discriminant_of("Write"), Some(2));
    }

    #[test]
    fn struct_completion_requires_data_complete_before_layout() {
        let mut s = StructType::incomplete(ModuleId(0), "List".into());
        assert_eq!(s.state, Completeness::Incomplete);
        s.set_data(vec![]);
        assert_eq!(s.state, Completeness::DataComplete);
        s.set_initial_values(vec![]);
        s.complete_layout(vec![]);
        assert_eq!(s.state, Completeness::Complete);
    }
}
