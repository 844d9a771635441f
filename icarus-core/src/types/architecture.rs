//! Host architecture rules used by struct/array layout (§4.3, §4.7.1).
//!
//! `CompleteStruct` and constant-buffer allocation both need pointer size
//! and alignment for the target the compiler itself runs on; cross
//! compilation is out of scope, so "current" is the only target modeled.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Arm64,
}

impl Platform {
    pub fn current() -> Self {
        #[cfg(target_os = "linux")]
        return Platform::Linux;
        #[cfg(target_os = "macos")]
        return Platform::MacOS;
        #[cfg(target_os = "windows")]
        return Platform::Windows;
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        compile_error!("unsupported host platform");
    }
}

impl Arch {
    pub fn current() -> Self {
        #[cfg(target_arch = "x86_64")]
        return Arch::X64;
        #[cfg(target_arch = "aarch64")]
        return Arch::Arm64;
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        compile_error!("unsupported host architecture");
    }

    /// Pointer size in bytes, and its natural alignment (pointers are
    /// self-aligned on every target this compiler runs on).
    pub fn pointer_size(self) -> u32 {
        8
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Linux => "linux",
            Platform::MacOS => "macos",
            Platform::Windows => "windows",
        };
        write!(f, "{s}")
    }
}

/// The layout rules `CompleteStruct` (§4.3) applies to a field list:
/// align-forward each field to its own alignment, then pad the trailing
/// size up to the struct's own (max-field) alignment.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub size: u32,
    pub alignment: u32,
}

impl Layout {
    pub const fn scalar(size: u32) -> Self {
        Layout { size, alignment: size }
    }

    fn align_forward(offset: u32, alignment: u32) -> u32 {
        debug_assert!(alignment.is_power_of_two());
        (offset + alignment - 1) & !(alignment - 1)
    }

    /// Lays out `fields` in declaration order, returning each field's byte
    /// offset alongside the struct's own total `Layout`.
    pub fn of_fields(fields: impl IntoIterator<Item = Layout>) -> (Vec<u32>, Layout) {
        let mut offsets = Vec::new();
        let mut cursor = 0u32;
        let mut max_align = 1u32;
        for field in fields {
            let offset = Self::align_forward(cursor, field.alignment);
            offsets.push(offset);
            cursor = offset + field.size;
            max_align = max_align.max(field.alignment);
        }
        let size = Self::align_forward(cursor, max_align);
        (offsets, Layout { size, alignment: max_align })
    }
}

/// Computes the [`Layout`] of an arbitrary [`TypeHandle`] on the current
/// host architecture (§4.3's `CompleteStruct`, §4.7.1's constant-buffer
/// allocation). A `Struct`/`Enum` that hasn't reached
/// [`super::completion::Completeness::Complete`] contributes a zero-sized
/// placeholder layout rather than recursing — the only field shape that
/// can legally reference an incomplete identity is a pointer to it, which
/// never needs the pointee's layout.
pub fn layout_of(ty: &super::TypeHandle) -> Layout {
    use super::interner::{Primitive, Type};

    match &**ty {
        Type::Primitive(p) => Layout::scalar(p.size()),
        Type::Ptr(_) | Type::BufPtr(_) => Layout::scalar(Arch::current().pointer_size()),
        Type::Arr(elem, n) => {
            let elem_layout = layout_of(elem);
            let stride = Layout::align_forward(elem_layout.size, elem_layout.alignment);
            Layout { size: stride * (*n as u32), alignment: elem_layout.alignment }
        }
        Type::ArrUnknown(_) | Type::Slice(_) => {
            // Fat pointer: data pointer + length.
            Layout::scalar(Arch::current().pointer_size() * 2)
        }
        Type::Tuple(ts) => Layout::of_fields(ts.iter().map(layout_of)).1,
        Type::Variant(ts) => {
            let tag = Layout::scalar(Arch::current().pointer_size());
            let payload = ts.iter().map(layout_of).fold(Layout::scalar(0), |acc, l| Layout {
                size: acc.size.max(l.size),
                alignment: acc.alignment.max(l.alignment),
            });
            Layout::of_fields([tag, payload]).1
        }
        Type::Func { .. } => Layout::scalar(Arch::current().pointer_size()),
        Type::Range(inner) => Layout::of_fields([layout_of(inner), layout_of(inner)]).1,
        Type::Scope(_) => Layout::scalar(Arch::current().pointer_size()),
        Type::Struct(s) => {
            let s = s.lock().unwrap();
            s.layout.unwrap_or(Layout { size: 0, alignment: 1 })
        }
        Type::Enum(_) => Layout::scalar(Primitive::I64.size()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout_pads_trailing_field_to_max_alignment() {
        let (offsets, layout) = Layout::of_fields([Layout::scalar(1), Layout::scalar(8)]);
        assert_eq!(offsets, vec![0, 8]);
        assert_eq!(layout.size, 16);
        assert_eq!(layout.alignment, 8);
    }

    #[test]
    fn pointer_sized_struct_has_pointer_layout() {
        let arch = Arch::current();
        let (offsets, layout) = Layout::of_fields([Layout::scalar(arch.pointer_size())]);
        assert_eq!(offsets, vec![0]);
        assert_eq!(layout.size, arch.pointer_size());
    }
}
