//! Verifier-deps deserializer: decodes the per-Dex dependency blob the verifier records
//! during on-device compilation, so `--deps` can display what a Dex's methods and fields
//! assumed about classes that weren't verified along with it.
//!
//! The blob is a flat sequence of per-Dex records, each a handful of ULEB128-framed
//! arrays in a fixed order: extra strings, assignable-type pairs, unassignable-type
//! pairs, classes, fields, methods (laid out differently across versions, see
//! [`MethodShape`]), and unverified classes. Everything here only reads
//! [`crate::leb128::Cursor`]; it never touches the Dex pools directly, though resolving a
//! string id usually does (see [`resolve_string`]).

use std::borrow::Cow;

use crate::dex::Dex;
use crate::errors::VerifierDepsError;
use crate::leb128::Cursor;

/// Whether a container version's verifier-deps methods array is one combined list or
/// split into direct/virtual/interface sub-arrays.
///
/// Decision: older single-version-tag containers (006/010) use the split three-array
/// encoding; the split-version-tag containers (019/021/027) use the combined encoding.
/// See DESIGN.md for why this boundary, rather than some other, was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodShape {
    Split,
    Combined,
}

/// Which method sub-array a [`MethodDep`] came from; `Unspecified` for [`MethodShape::Combined`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Direct,
    Virtual,
    Interface,
    Unspecified,
}

/// One verified-or-not class dependency. `access_flags == 0xffff` means the verifier
/// never resolved this class; see [`ClassDep::is_unresolved`].
#[derive(Debug, Clone, Copy)]
pub struct ClassDep {
    pub type_idx: u32,
    pub access_flags: u32,
}

impl ClassDep {
    pub fn is_unresolved(&self) -> bool {
        self.access_flags == UNRESOLVED_MARKER
    }
}

const UNRESOLVED_MARKER: u32 = 0xffff;

#[derive(Debug, Clone, Copy)]
pub struct FieldDep {
    pub field_idx: u32,
    pub access_flags: u32,
    pub declaring_class_idx: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodDep {
    pub method_idx: u32,
    pub access_flags: u32,
    pub declaring_class_idx: u32,
    pub kind: MethodKind,
}

/// One Dex file's full verifier-deps record.
#[derive(Debug, Clone, Default)]
pub struct VerifierDeps {
    pub extra_strings: Vec<String>,
    pub assignable_types: Vec<(u32, u32)>,
    pub unassignable_types: Vec<(u32, u32)>,
    pub classes: Vec<ClassDep>,
    pub fields: Vec<FieldDep>,
    pub methods: Vec<MethodDep>,
    pub unverified_classes: Vec<u32>,
}

fn read_count(cursor: &mut Cursor) -> Result<u32, VerifierDepsError> {
    cursor.read_uleb128().map_err(|_| VerifierDepsError::Overflow)
}

fn read_pairs(cursor: &mut Cursor) -> Result<Vec<(u32, u32)>, VerifierDepsError> {
    let count = read_count(cursor)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let a = read_count(cursor)?;
        let b = read_count(cursor)?;
        out.push((a, b));
    }
    Ok(out)
}

fn read_classes(cursor: &mut Cursor) -> Result<Vec<ClassDep>, VerifierDepsError> {
    let count = read_count(cursor)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let type_idx = read_count(cursor)?;
        let access_flags = read_count(cursor)?;
        out.push(ClassDep { type_idx, access_flags });
    }
    Ok(out)
}

fn read_fields(cursor: &mut Cursor) -> Result<Vec<FieldDep>, VerifierDepsError> {
    let count = read_count(cursor)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let field_idx = read_count(cursor)?;
        let access_flags = read_count(cursor)?;
        let declaring_class_idx = read_count(cursor)?;
        out.push(FieldDep { field_idx, access_flags, declaring_class_idx });
    }
    Ok(out)
}

fn read_methods_array(
    cursor: &mut Cursor,
    kind: MethodKind,
) -> Result<Vec<MethodDep>, VerifierDepsError> {
    let count = read_count(cursor)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let method_idx = read_count(cursor)?;
        let access_flags = read_count(cursor)?;
        let declaring_class_idx = read_count(cursor)?;
        out.push(MethodDep { method_idx, access_flags, declaring_class_idx, kind });
    }
    Ok(out)
}

fn read_unverified_classes(cursor: &mut Cursor) -> Result<Vec<u32>, VerifierDepsError> {
    let count = read_count(cursor)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(read_count(cursor)?);
    }
    Ok(out)
}

/// Decodes one Dex's verifier-deps record starting at `cursor`'s current position,
/// advancing it past the record.
pub fn decode_one(cursor: &mut Cursor, shape: MethodShape) -> Result<VerifierDeps, VerifierDepsError> {
    let extra_string_count = read_count(cursor)?;
    let mut extra_strings = Vec::with_capacity(extra_string_count as usize);
    for _ in 0..extra_string_count {
        let bytes = cursor.read_cstr().map_err(|_| VerifierDepsError::Overflow)?;
        extra_strings.push(String::from_utf8_lossy(bytes).into_owned());
    }

    let assignable_types = read_pairs(cursor)?;
    let unassignable_types = read_pairs(cursor)?;
    let classes = read_classes(cursor)?;
    let fields = read_fields(cursor)?;

    let methods = match shape {
        MethodShape::Combined => read_methods_array(cursor, MethodKind::Unspecified)?,
        MethodShape::Split => {
            let mut all = read_methods_array(cursor, MethodKind::Direct)?;
            all.extend(read_methods_array(cursor, MethodKind::Virtual)?);
            all.extend(read_methods_array(cursor, MethodKind::Interface)?);
            all
        }
    };

    let unverified_classes = read_unverified_classes(cursor)?;

    Ok(VerifierDeps {
        extra_strings,
        assignable_types,
        unassignable_types,
        classes,
        fields,
        methods,
        unverified_classes,
    })
}

/// Decodes `num_dex_files` consecutive records from `data`, one per Dex in container order.
pub fn decode_all(
    data: &[u8],
    num_dex_files: u32,
    shape: MethodShape,
) -> Result<Vec<VerifierDeps>, VerifierDepsError> {
    let mut cursor = Cursor::new(data);
    let mut out = Vec::with_capacity(num_dex_files as usize);
    for _ in 0..num_dex_files {
        out.push(decode_one(&mut cursor, shape)?);
    }
    Ok(out)
}

/// Resolves a verifier-deps string id: ids below the Dex's own `string_ids_size` index
/// that pool directly; ids at or above it index into `deps.extra_strings`.
pub fn resolve_string<'a>(
    dex: &'a Dex,
    deps: &'a VerifierDeps,
    string_id: u32,
) -> Result<Cow<'a, str>, VerifierDepsError> {
    let dex_string_count = dex.header.string_ids_size;
    if string_id < dex_string_count {
        return dex
            .string_data_by_idx(string_id as usize)
            .map_err(|_| VerifierDepsError::UnresolvedStringId { string_id });
    }
    let extra_idx = (string_id - dex_string_count) as usize;
    deps.extra_strings
        .get(extra_idx)
        .map(|s| Cow::Borrowed(s.as_str()))
        .ok_or(VerifierDepsError::UnresolvedStringId { string_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uleb(mut x: u32, out: &mut Vec<u8>) {
        loop {
            let byte = (x & 0x7f) as u8;
            x >>= 7;
            if x == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    #[test]
    fn decodes_empty_record() {
        let mut buf = Vec::new();
        for _ in 0..7 {
            uleb(0, &mut buf);
        }
        let mut cursor = Cursor::new(&buf);
        let deps = decode_one(&mut cursor, MethodShape::Combined).unwrap();
        assert!(deps.extra_strings.is_empty());
        assert!(deps.classes.is_empty());
        assert!(deps.methods.is_empty());
    }

    #[test]
    fn decodes_one_extra_string_and_one_class() {
        let mut buf = Vec::new();
        uleb(1, &mut buf); // extra_strings count
        buf.extend_from_slice(b"Lfoo/Bar;\0");
        uleb(0, &mut buf); // assignable_types count
        uleb(0, &mut buf); // unassignable_types count
        uleb(1, &mut buf); // classes count
        uleb(42, &mut buf); // type_idx
        uleb(UNRESOLVED_MARKER, &mut buf); // access_flags = unresolved
        uleb(0, &mut buf); // fields count
        uleb(0, &mut buf); // methods count
        uleb(0, &mut buf); // unverified_classes count

        let mut cursor = Cursor::new(&buf);
        let deps = decode_one(&mut cursor, MethodShape::Combined).unwrap();
        assert_eq!(deps.extra_strings, vec!["Lfoo/Bar;".to_string()]);
        assert_eq!(deps.classes.len(), 1);
        assert!(deps.classes[0].is_unresolved());
    }

    #[test]
    fn split_method_shape_concatenates_three_arrays() {
        let mut buf = Vec::new();
        for _ in 0..5 {
            uleb(0, &mut buf); // extra_strings, assignable, unassignable, classes, fields
        }
        uleb(1, &mut buf); // direct methods: 1
        uleb(10, &mut buf);
        uleb(0, &mut buf);
        uleb(0, &mut buf);
        uleb(1, &mut buf); // virtual methods: 1
        uleb(20, &mut buf);
        uleb(0, &mut buf);
        uleb(0, &mut buf);
        uleb(0, &mut buf); // interface methods: 0
        uleb(0, &mut buf); // unverified_classes

        let mut cursor = Cursor::new(&buf);
        let deps = decode_one(&mut cursor, MethodShape::Split).unwrap();
        assert_eq!(deps.methods.len(), 2);
        assert_eq!(deps.methods[0].method_idx, 10);
        assert_eq!(deps.methods[0].kind, MethodKind::Direct);
        assert_eq!(deps.methods[1].method_idx, 20);
        assert_eq!(deps.methods[1].kind, MethodKind::Virtual);
    }
}
