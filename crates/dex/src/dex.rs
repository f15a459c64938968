//! Parses a single Dex or CompactDex file and exposes its pools, class data, and code
//! items to the rest of the crate.
//!
//! A [`Dex`] owns the whole file as a `Vec<u8>`; every accessor method borrows back into
//! that buffer instead of copying, except where a pool's encoding (MUTF-8 strings,
//! ULEB128 class data) forces a decode. Two on-disk shapes share this module: NormalDex
//! (`"dex\n"`) lays the code item out as a fixed 16-byte struct; CompactDex (`"cdex"`)
//! bit-packs small fields into a 2-`u2` header and spills anything that overflows a
//! nibble into optional preheader words stored just before it. [`Dex::code_item`]
//! hides that difference behind one return type.

use std::borrow::Cow;
use std::sync::Arc;

use bitflags::bitflags;
use winnow::binary::{be_u32, le_u16, le_u32};
use winnow::combinator::repeat;
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take;

use crate::errors::DexError;
use crate::leb128::{self, Cursor};

/// Endianness tag meaning little-endian.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#endian-constant>
pub const ENDIAN_CONSTANT: u32 = 0x12345678;

/// Endianness tag meaning big-endian.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#endian-constant>
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;

/// Sentinel index value meaning "absent".
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#no-index>
pub const NO_INDEX: u32 = u32::MAX;

const NORMAL_DEX_MAGIC: u32 = 0x6465780A; // "dex\n"
const COMPACT_DEX_MAGIC: u32 = 0x63646578; // "cdex"

/// Size in bytes of `magic + version` (8) plus the `checksum` field (4). The Adler-32
/// checksum covers everything from this offset to `file_size`.
const CHECKSUM_COVERAGE_START: usize = 12;

/// Which of the two on-disk shapes a [`Dex`] was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexKind {
    NormalDex,
    CompactDex,
}

/// Peeks at a buffer's magic without parsing it.
pub fn detect_kind(buf: &[u8]) -> Option<DexKind> {
    let magic = buf.get(0..4)?;
    match magic {
        b"dex\n" => Some(DexKind::NormalDex),
        b"cdex" => Some(DexKind::CompactDex),
        _ => None,
    }
}

/// Parses the 3-ASCII-digit version tag that follows the 4-byte magic, without
/// validating it against either kind's known-version set.
fn version_digits(buf: &[u8]) -> Option<u32> {
    let tag = buf.get(4..8)?;
    if tag[3] != 0 {
        return None;
    }
    let mut value = 0u32;
    for &b in &tag[0..3] {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as u32;
    }
    Some(value)
}

/// `true` if `buf` starts with a recognized magic and a well-formed version tag.
///
/// For NormalDex the version must additionally be in the known set `{035..039}`;
/// CompactDex versions are accepted as long as they parse, since this tool targets
/// whichever CompactDex revision a given ART release embedded rather than a fixed list.
pub fn is_valid(buf: &[u8]) -> bool {
    match (detect_kind(buf), version_digits(buf)) {
        (Some(DexKind::NormalDex), Some(v)) => (35..=39).contains(&v),
        (Some(DexKind::CompactDex), Some(_)) => true,
        _ => false,
    }
}

/// A parsed Dex or CompactDex file.
#[derive(Debug)]
pub struct Dex {
    /// Owns the raw bytes of the file.
    data: Vec<u8>,

    /// Which on-disk shape `data` was parsed as.
    pub kind: DexKind,

    /// Parsed header, common to both shapes.
    pub header: DexHeader,

    /// CompactDex-only header fields; `None` for NormalDex.
    pub compact: Option<CompactDexExtra>,

    /// Dex strings: offsets into `data` of each string's `string_data_item`.
    pub string_ids: Vec<u32>,

    /// Dex types: indices into [`Dex::string_ids`].
    pub type_ids: Vec<u32>,

    /// Dex prototype items.
    pub proto_ids: Vec<ProtoItem>,

    /// Dex field items.
    pub field_ids: Vec<FieldItem>,

    /// Dex method items.
    pub method_ids: Vec<MethodItem>,

    /// Dex class items.
    pub class_defs: Vec<ClassItem>,
}

impl Dex {
    /// Parses `data` as a Dex or CompactDex file.
    ///
    /// ```ignore
    /// let dex = Dex::new(data)?;
    /// ```
    pub fn new(data: Vec<u8>) -> Result<Dex, DexError> {
        let kind = detect_kind(&data).ok_or(DexError::InvalidHeader)?;
        let input = &mut &data[..];

        let (header, compact) =
            Self::parse_header(kind, input).map_err(|_| DexError::InvalidHeader)?;

        let string_ids = repeat(header.string_ids_size as usize, le_u32)
            .parse_next(input)
            .map_err(|_: ContextError| DexError::StringError)?;

        let type_ids = repeat(header.type_ids_size as usize, le_u32)
            .parse_next(input)
            .map_err(|_: ContextError| DexError::TypeError)?;

        let proto_ids = repeat(header.proto_ids_size as usize, ProtoItem::parse)
            .parse_next(input)
            .map_err(|_| DexError::ProtoError)?;

        let field_ids = repeat(header.field_ids_size as usize, FieldItem::parse)
            .parse_next(input)
            .map_err(|_| DexError::FieldError)?;

        let method_ids = repeat(header.method_ids_size as usize, MethodItem::parse)
            .parse_next(input)
            .map_err(|_| DexError::MethodError)?;

        let class_defs = repeat(header.class_defs_size as usize, ClassItem::parse)
            .parse_next(input)
            .map_err(|_| DexError::ClassError)?;

        Ok(Dex {
            data,
            kind,
            header,
            compact,
            string_ids,
            type_ids,
            proto_ids,
            field_ids,
            method_ids,
            class_defs,
        })
    }

    fn parse_header(
        kind: DexKind,
        input: &mut &[u8],
    ) -> ModalResult<(DexHeader, Option<CompactDexExtra>)> {
        let expected_magic = match kind {
            DexKind::NormalDex => NORMAL_DEX_MAGIC,
            DexKind::CompactDex => COMPACT_DEX_MAGIC,
        };

        let (magic, version_tag) = (
            be_u32.verify(move |m| *m == expected_magic),
            take(4usize).map(|v: &[u8]| [v[0], v[1], v[2], v[3]]),
        )
            .parse_next(input)?;

        let version = version_tag[0..3]
            .iter()
            .try_fold(0u32, |acc, &b| {
                if b.is_ascii_digit() {
                    Some(acc * 10 + (b - b'0') as u32)
                } else {
                    None
                }
            })
            .filter(|_| version_tag[3] == 0)
            .ok_or(())
            .map_err(|_| winnow::error::ErrMode::Cut(ContextError::new()))?;

        let (
            checksum,
            signature,
            file_size,
            header_size,
            endian_tag,
            link_size,
            link_off,
            map_off,
            string_ids_size,
            string_ids_off,
            type_ids_size,
            type_ids_off,
            proto_ids_size,
            proto_ids_off,
            field_ids_size,
            field_ids_off,
            method_ids_size,
            method_ids_off,
            class_defs_size,
            class_defs_off,
            data_size,
            data_off,
        ) = (
            le_u32,
            take(20usize).map(Arc::from),
            le_u32,
            le_u32,
            le_u32.verify(|&tag| tag == ENDIAN_CONSTANT || tag == REVERSE_ENDIAN_CONSTANT),
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32.verify(|&size| size <= u16::MAX.into()),
            le_u32,
            le_u32.verify(|&size| size <= u16::MAX.into()),
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
        )
            .parse_next(input)?;

        let header = DexHeader {
            magic,
            kind,
            version,
            checksum,
            signature,
            file_size,
            header_size,
            endian_tag,
            link_size,
            link_off,
            map_off,
            string_ids_size,
            string_ids_off,
            type_ids_size,
            type_ids_off,
            proto_ids_size,
            proto_ids_off,
            field_ids_size,
            field_ids_off,
            method_ids_size,
            method_ids_off,
            class_defs_size,
            class_defs_off,
            data_size,
            data_off,
        };

        let compact = if kind == DexKind::CompactDex {
            let (
                feature_flags,
                debug_info_offsets_pos,
                debug_info_offsets_table_offset,
                debug_info_base,
                cdex_data_size,
                cdex_data_off,
            ) = (le_u32, le_u32, le_u32, le_u32, le_u32, le_u32).parse_next(input)?;

            Some(CompactDexExtra {
                feature_flags,
                debug_info_offsets_pos,
                debug_info_offsets_table_offset,
                debug_info_base,
                data_size: cdex_data_size,
                data_off: cdex_data_off,
            })
        } else {
            None
        };

        Ok((header, compact))
    }

    /// Base offset of the shared-data region: the whole file for NormalDex, or the
    /// CompactDex header's `data_off` for CompactDex (where code items, debug info, and
    /// string data live, potentially shared across the Dex files in one Vdex).
    pub fn data_addr(&self) -> u32 {
        match &self.compact {
            Some(extra) => extra.data_off,
            None => 0,
        }
    }

    /// Recomputes the Adler-32 checksum over `[12..file_size)` without writing it back.
    pub fn compute_adler32(&self) -> Result<u32, DexError> {
        let end = self.header.file_size as usize;
        let region = self
            .data
            .get(CHECKSUM_COVERAGE_START..end)
            .ok_or(DexError::IndexOutOfRange {
                index: end as u32,
                size: self.data.len() as u32,
            })?;
        Ok(simd_adler32::adler32(region))
    }

    /// Recomputes the checksum and writes it back into the header and the buffer.
    pub fn repair_checksum(&mut self) -> Result<u32, DexError> {
        let sum = self.compute_adler32()?;
        self.header.checksum = sum;
        self.data[8..12].copy_from_slice(&sum.to_le_bytes());
        Ok(sum)
    }

    /// Raw file bytes, for writing the transformed Dex back out.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn pool_index<T>(pool: &[T], idx: usize) -> Result<&T, DexError> {
        pool.get(idx).ok_or(DexError::IndexOutOfRange {
            index: idx as u32,
            size: pool.len() as u32,
        })
    }

    pub fn string_id(&self, idx: usize) -> Result<u32, DexError> {
        Self::pool_index(&self.string_ids, idx).copied()
    }

    pub fn type_id(&self, idx: usize) -> Result<u32, DexError> {
        Self::pool_index(&self.type_ids, idx).copied()
    }

    pub fn proto_id(&self, idx: usize) -> Result<&ProtoItem, DexError> {
        Self::pool_index(&self.proto_ids, idx)
    }

    pub fn field_id(&self, idx: usize) -> Result<&FieldItem, DexError> {
        Self::pool_index(&self.field_ids, idx)
    }

    pub fn method_id(&self, idx: usize) -> Result<&MethodItem, DexError> {
        Self::pool_index(&self.method_ids, idx)
    }

    pub fn class_def(&self, idx: usize) -> Result<&ClassItem, DexError> {
        Self::pool_index(&self.class_defs, idx)
    }

    /// Resolves a string id to its decoded (lossily, on bad MUTF-8) text.
    pub fn string_data_by_idx(&self, idx: usize) -> Result<Cow<'_, str>, DexError> {
        let offset = self.string_id(idx)?;
        let region = self
            .data
            .get(offset as usize..)
            .ok_or(DexError::IndexOutOfRange {
                index: offset,
                size: self.data.len() as u32,
            })?;

        let mut cursor = Cursor::new(region);
        let utf16_size = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
        let bytes = cursor
            .read_bytes(utf16_size as usize)
            .map_err(|_| DexError::Uleb128Overrun)?;

        Ok(simd_cesu8::mutf8::decode_lossy(bytes))
    }

    /// Resolves a type id to its descriptor string (e.g. `Ljava/lang/Object;`).
    pub fn type_descriptor(&self, idx: usize) -> Result<Cow<'_, str>, DexError> {
        let string_idx = self.type_id(idx)?;
        self.string_data_by_idx(string_idx as usize)
    }

    fn read_type_list(&self, offset: u32) -> Result<Vec<u16>, DexError> {
        if offset == 0 {
            return Ok(Vec::new());
        }
        let region = self
            .data
            .get(offset as usize..)
            .ok_or(DexError::IndexOutOfRange {
                index: offset,
                size: self.data.len() as u32,
            })?;
        let mut cursor = &region[..];
        let size = le_u32::<_, ContextError>
            .parse_next(&mut cursor)
            .map_err(|_| DexError::IndexOutOfRange {
                index: offset,
                size: self.data.len() as u32,
            })?;
        repeat(size as usize, le_u16)
            .parse_next(&mut cursor)
            .map_err(|_: ContextError| DexError::IndexOutOfRange {
                index: offset,
                size: self.data.len() as u32,
            })
    }

    /// Assembles a method's parameter-type signature, e.g. `(ILjava/lang/String;)`.
    pub fn method_signature(&self, method_idx: usize) -> Result<String, DexError> {
        let method = self.method_id(method_idx)?;
        let proto = self.proto_id(method.proto_idx as usize)?;
        let param_types = self.read_type_list(proto.parameters_off)?;

        let mut sig = String::from("(");
        for type_idx in param_types {
            sig.push_str(&self.type_descriptor(type_idx as usize)?);
        }
        sig.push(')');
        Ok(sig)
    }

    /// Parses the class-data item at `class_data_off`, or an empty [`ClassData`] if the
    /// offset is `0` (the class declares no fields or methods).
    pub fn class_data(&self, class_data_off: u32) -> Result<ClassData, DexError> {
        if class_data_off == 0 {
            return Ok(ClassData::default());
        }

        let region = self
            .data
            .get(class_data_off as usize..)
            .ok_or(DexError::ClassDataError(class_data_off))?;
        let mut cursor = Cursor::new(region);

        let hdr = read_class_data_header(&mut cursor)
            .map_err(|_| DexError::ClassDataError(class_data_off))?;

        let read_fields = |cursor: &mut Cursor, count: u32| -> Result<Vec<EncodedField>, DexError> {
            let mut out = Vec::with_capacity(count as usize);
            let mut field_idx = 0u32;
            for _ in 0..count {
                let (diff, access_flags, access_flags_rel_off) =
                    read_field(cursor).map_err(|_| DexError::ClassDataError(class_data_off))?;
                field_idx += diff;
                out.push(EncodedField {
                    field_idx,
                    access_flags,
                    access_flags_off: class_data_off + access_flags_rel_off,
                });
            }
            Ok(out)
        };

        let read_methods = |cursor: &mut Cursor, count: u32| -> Result<Vec<EncodedMethod>, DexError> {
            let mut out = Vec::with_capacity(count as usize);
            let mut method_idx = 0u32;
            for _ in 0..count {
                let (diff, access_flags, access_flags_rel_off, code_off) =
                    read_method(cursor).map_err(|_| DexError::ClassDataError(class_data_off))?;
                method_idx += diff;
                out.push(EncodedMethod {
                    method_idx,
                    access_flags,
                    code_off,
                    access_flags_off: class_data_off + access_flags_rel_off,
                });
            }
            Ok(out)
        };

        let static_fields = read_fields(&mut cursor, hdr.static_fields_size)?;
        let instance_fields = read_fields(&mut cursor, hdr.instance_fields_size)?;
        let direct_methods = read_methods(&mut cursor, hdr.direct_methods_size)?;
        let virtual_methods = read_methods(&mut cursor, hdr.virtual_methods_size)?;

        Ok(ClassData {
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        })
    }

    /// Decodes the code item at `code_off`, dispatching on [`Dex::kind`].
    pub fn code_item(&self, code_off: u32) -> Result<CodeItemView, DexError> {
        match self.kind {
            DexKind::NormalDex => self.normal_code_item(code_off),
            DexKind::CompactDex => self.compact_code_item(code_off),
        }
    }

    fn u16_at(&self, offset: usize) -> Result<u16, DexError> {
        let bytes = self
            .data
            .get(offset..offset + 2)
            .ok_or(DexError::TruncatedCodeItem(offset as u32))?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32_at(&self, offset: usize) -> Result<u32, DexError> {
        let bytes = self
            .data
            .get(offset..offset + 4)
            .ok_or(DexError::TruncatedCodeItem(offset as u32))?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn normal_code_item(&self, code_off: u32) -> Result<CodeItemView, DexError> {
        let off = code_off as usize;
        let registers_size = self.u16_at(off)? as u32;
        let ins_size = self.u16_at(off + 2)? as u32;
        let outs_size = self.u16_at(off + 4)? as u32;
        let tries_size = self.u16_at(off + 6)? as u32;
        // bytes [off+8..off+12) hold debug_info_off, unused here.
        let insns_size = self.u32_at(off + 12)?;

        Ok(CodeItemView {
            registers_size,
            ins_size,
            outs_size,
            tries_size,
            insns_size,
            insns_off: off as u32 + 16,
        })
    }

    /// Decodes a CompactDex code item's bit-packed 2-word header and any preheader
    /// words stored immediately before it.
    ///
    /// Layout: the first `u2` packs registers/ins/outs/tries as four nibbles, `0xF`
    /// meaning "see preheader"; the second `u2` packs a 5-bit presence-flag set (one
    /// bit per field, in the order registers, ins, outs, tries, insns-size) in its low
    /// bits and an 11-bit inline insns-size in its high bits. Present preheader fields
    /// are stored as `u2` words directly before `code_off`, in that same fixed order,
    /// one word per set bit.
    fn compact_code_item(&self, code_off: u32) -> Result<CodeItemView, DexError> {
        let off = code_off as usize;
        let first = self.u16_at(off)?;
        let second = self.u16_at(off + 2)?;

        let registers_nibble = (first & 0xF) as u32;
        let ins_nibble = ((first >> 4) & 0xF) as u32;
        let outs_nibble = ((first >> 8) & 0xF) as u32;
        let tries_nibble = ((first >> 12) & 0xF) as u32;

        let presence = second & 0x1f;
        let inline_insns_size = (second >> 5) as u32;

        const HAS_REGISTERS: u16 = 0x01;
        const HAS_INS: u16 = 0x02;
        const HAS_OUTS: u16 = 0x04;
        const HAS_TRIES: u16 = 0x08;
        const HAS_INSNS_SIZE: u16 = 0x10;

        let flags = [
            presence & HAS_REGISTERS != 0,
            presence & HAS_INS != 0,
            presence & HAS_OUTS != 0,
            presence & HAS_TRIES != 0,
            presence & HAS_INSNS_SIZE != 0,
        ];
        let num_preheader_words = flags.iter().filter(|&&b| b).count();

        let preheader_start = off
            .checked_sub(num_preheader_words * 2)
            .ok_or(DexError::TruncatedCodeItem(code_off))?;

        let mut cursor = preheader_start;
        let mut next_preheader_word = |this: &Dex, cursor: &mut usize| -> Result<u32, DexError> {
            let v = this.u16_at(*cursor)? as u32;
            *cursor += 2;
            Ok(v)
        };

        let registers_size = if flags[0] {
            next_preheader_word(self, &mut cursor)?
        } else {
            registers_nibble
        };
        let ins_size = if flags[1] {
            next_preheader_word(self, &mut cursor)?
        } else {
            ins_nibble
        };
        let outs_size = if flags[2] {
            next_preheader_word(self, &mut cursor)?
        } else {
            outs_nibble
        };
        let tries_size = if flags[3] {
            next_preheader_word(self, &mut cursor)?
        } else {
            tries_nibble
        };
        let insns_size = if flags[4] {
            next_preheader_word(self, &mut cursor)?
        } else {
            inline_insns_size
        };

        Ok(CodeItemView {
            registers_size,
            ins_size,
            outs_size,
            tries_size,
            insns_size,
            insns_off: off as u32 + 4,
        })
    }

    /// Offset of a method's first instruction, i.e. the start of its `insns` array.
    pub fn first_instruction_offset(&self, code_off: u32) -> Result<u32, DexError> {
        Ok(self.code_item(code_off)?.insns_off)
    }

    /// Reads a code item's instruction stream as code units, copied out of the owned
    /// buffer so callers (the unquickener, the disassembler) can operate on a plain
    /// `&[u16]`/`Vec<u16>` without fighting the alignment of a byte buffer.
    pub fn read_insns(&self, view: &CodeItemView) -> Result<Vec<u16>, DexError> {
        let mut out = Vec::with_capacity(view.insns_size as usize);
        for i in 0..view.insns_size {
            out.push(self.u16_at(view.insns_off as usize + i as usize * 2)?);
        }
        Ok(out)
    }

    /// Writes a (possibly rewritten) instruction stream back into the owned buffer.
    /// `units.len()` must equal `view.insns_size`.
    pub fn write_insns(&mut self, view: &CodeItemView, units: &[u16]) -> Result<(), DexError> {
        debug_assert_eq!(units.len(), view.insns_size as usize);
        for (i, unit) in units.iter().enumerate() {
            let at = view.insns_off as usize + i * 2;
            let bytes = self
                .data
                .get_mut(at..at + 2)
                .ok_or(DexError::TruncatedCodeItem(view.insns_off))?;
            bytes.copy_from_slice(&unit.to_le_bytes());
        }
        Ok(())
    }

    /// Clears the runtime-hidden-API bit in the access-flags ULEB128 that begins at
    /// `access_flags_off`, rewriting it in place with the same encoded byte width so
    /// nothing else in the class-data stream has to move.
    pub fn unhide_access_flags(
        &mut self,
        access_flags_off: usize,
        is_native_method: bool,
    ) -> Result<(), DexError> {
        let region = self
            .data
            .get(access_flags_off..)
            .ok_or(DexError::Uleb128Overrun)?;
        let mut cursor = Cursor::new(region);
        let flags = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
        let width = cursor.position();

        let hidden_bit: u32 = if is_native_method { 0x200 } else { 0x20 };
        let cleared = flags & !hidden_bit;

        let out = self
            .data
            .get_mut(access_flags_off..access_flags_off + width)
            .ok_or(DexError::Uleb128Overrun)?;
        leb128::write_uleb128_fixed_width(cleared, width, out);
        Ok(())
    }
}

/// Reads the four ULEB128 pool-size counts at the head of a class-data item.
pub fn read_class_data_header(cursor: &mut Cursor) -> Result<ClassDataHeader, DexError> {
    let static_fields_size = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    let instance_fields_size = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    let direct_methods_size = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    let virtual_methods_size = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    Ok(ClassDataHeader {
        static_fields_size,
        instance_fields_size,
        direct_methods_size,
        virtual_methods_size,
    })
}

/// Reads one `encoded_field`'s `(field_idx_diff, access_flags, access_flags_rel_off)`,
/// where the last element is `access_flags`'s own position relative to the cursor's start.
pub fn read_field(cursor: &mut Cursor) -> Result<(u32, u32, u32), DexError> {
    let field_idx_diff = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    let access_flags_rel_off = cursor.position() as u32;
    let access_flags = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    Ok((field_idx_diff, access_flags, access_flags_rel_off))
}

/// Reads one `encoded_method`'s `(method_idx_diff, access_flags, access_flags_rel_off,
/// code_off)`, where `access_flags_rel_off` is `access_flags`'s own position relative to
/// the cursor's start.
pub fn read_method(cursor: &mut Cursor) -> Result<(u32, u32, u32, u32), DexError> {
    let method_idx_diff = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    let access_flags_rel_off = cursor.position() as u32;
    let access_flags = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    let code_off = cursor.read_uleb128().map_err(|_| DexError::Uleb128Overrun)?;
    Ok((method_idx_diff, access_flags, access_flags_rel_off, code_off))
}

/// The four ULEB128 pool-size counts at the head of a `class_data_item`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassDataHeader {
    pub static_fields_size: u32,
    pub instance_fields_size: u32,
    pub direct_methods_size: u32,
    pub virtual_methods_size: u32,
}

/// A field entry from a class's class-data item, with its delta-encoded index already
/// resolved to an absolute index into [`Dex::field_ids`].
#[derive(Debug, Clone, Copy)]
pub struct EncodedField {
    pub field_idx: u32,
    pub access_flags: u32,
    /// Byte offset of this entry's `access_flags` ULEB128 within [`Dex::as_bytes`], for
    /// [`Dex::unhide_access_flags`].
    pub access_flags_off: u32,
}

/// A method entry from a class's class-data item, with its delta-encoded index already
/// resolved to an absolute index into [`Dex::method_ids`].
#[derive(Debug, Clone, Copy)]
pub struct EncodedMethod {
    pub method_idx: u32,
    pub access_flags: u32,
    pub code_off: u32,
    /// Byte offset of this entry's `access_flags` ULEB128 within [`Dex::as_bytes`], for
    /// [`Dex::unhide_access_flags`].
    pub access_flags_off: u32,
}

/// A class's full field/method layout, decoded from its `class_data_item`.
#[derive(Debug, Clone, Default)]
pub struct ClassData {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

/// A decoded code item, independent of whether it came from a NormalDex fixed struct
/// or a CompactDex bit-packed header.
#[derive(Debug, Clone, Copy)]
pub struct CodeItemView {
    pub registers_size: u32,
    pub ins_size: u32,
    pub outs_size: u32,
    pub tries_size: u32,
    pub insns_size: u32,
    /// Byte offset of the first instruction's first code unit.
    pub insns_off: u32,
}

/// Abstraction over `header_item`, shared by NormalDex and CompactDex.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#header-item>
#[derive(Debug, Clone)]
pub struct DexHeader {
    pub magic: u32,
    pub kind: DexKind,

    /// Three-digit version tag, e.g. `35` for `"035\0"`.
    pub version: u32,

    /// Adler-32 checksum of the file, covering `[12..file_size)`.
    pub checksum: u32,

    /// SHA-1 signature of the file.
    pub signature: Arc<[u8]>,

    /// Size of the entire file in bytes.
    pub file_size: u32,

    /// Size of the header in bytes.
    pub header_size: u32,

    /// [`ENDIAN_CONSTANT`] or [`REVERSE_ENDIAN_CONSTANT`].
    pub endian_tag: u32,

    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,

    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

/// CompactDex-only fields that follow the common [`DexHeader`].
#[derive(Debug, Clone, Copy)]
pub struct CompactDexExtra {
    pub feature_flags: u32,
    pub debug_info_offsets_pos: u32,
    pub debug_info_offsets_table_offset: u32,
    pub debug_info_base: u32,

    /// Size of the shared-data region.
    pub data_size: u32,

    /// Base offset of the shared-data region; see [`Dex::data_addr`].
    pub data_off: u32,
}

/// Abstraction over `proto_id_item`.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#proto-id-item>
#[derive(Debug)]
pub struct ProtoItem {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters_off: u32,
}

impl ProtoItem {
    #[inline]
    fn parse(input: &mut &[u8]) -> ModalResult<ProtoItem> {
        (le_u32, le_u32, le_u32)
            .map(|(shorty_idx, return_type_idx, parameters_off)| ProtoItem {
                shorty_idx,
                return_type_idx,
                parameters_off,
            })
            .parse_next(input)
    }
}

/// Abstraction over `field_id_item`.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#field-id-item>
#[derive(Debug)]
pub struct FieldItem {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

impl FieldItem {
    #[inline]
    fn parse(input: &mut &[u8]) -> ModalResult<FieldItem> {
        (le_u16, le_u16, le_u32)
            .map(|(class_idx, type_idx, name_idx)| FieldItem {
                class_idx,
                type_idx,
                name_idx,
            })
            .parse_next(input)
    }
}

/// Abstraction over `method_id_item`.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#method-id-item>
#[derive(Debug)]
pub struct MethodItem {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

impl MethodItem {
    #[inline]
    fn parse(input: &mut &[u8]) -> ModalResult<MethodItem> {
        (le_u16, le_u16, le_u32)
            .map(|(class_idx, proto_idx, name_idx)| MethodItem {
                class_idx,
                proto_idx,
                name_idx,
            })
            .parse_next(input)
    }
}

/// Abstraction over `class_def_item`.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#class-def-item>
#[derive(Debug)]
pub struct ClassItem {
    pub class_idx: u32,
    pub access_flags: AccessFlags,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassItem {
    #[inline]
    fn parse(input: &mut &[u8]) -> ModalResult<ClassItem> {
        (
            le_u32,
            le_u32.map(AccessFlags::from_bits_truncate),
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
            le_u32,
        )
            .map(
                |(
                    class_idx,
                    access_flags,
                    superclass_idx,
                    interfaces_off,
                    source_file_idx,
                    annotations_off,
                    class_data_off,
                    static_values_off,
                )| ClassItem {
                    class_idx,
                    access_flags,
                    superclass_idx,
                    interfaces_off,
                    source_file_idx,
                    annotations_off,
                    class_data_off,
                    static_values_off,
                },
            )
            .parse_next(input)
    }
}

bitflags! {
    /// Access flags used in Dex for classes, fields, and methods.
    ///
    /// See: <https://source.android.com/docs/core/runtime/dex-format#access-flags>
    #[derive(Debug)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const UNUSED = 0x8000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags {
    #[inline]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    #[inline]
    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }

    #[inline]
    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_header(buf: &mut Vec<u8>, sizes: [u32; 6]) {
        buf.extend_from_slice(b"dex\n");
        buf.extend_from_slice(b"035\0");
        buf.extend_from_slice(&0u32.to_le_bytes()); // checksum, fixed up later
        buf.extend_from_slice(&[0u8; 20]); // signature
        let file_size_pos = buf.len();
        buf.extend_from_slice(&0u32.to_le_bytes()); // file_size, fixed up later
        buf.extend_from_slice(&0x70u32.to_le_bytes()); // header_size
        buf.extend_from_slice(&ENDIAN_CONSTANT.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // link_size
        buf.extend_from_slice(&0u32.to_le_bytes()); // link_off
        buf.extend_from_slice(&0u32.to_le_bytes()); // map_off
        for size in sizes {
            buf.extend_from_slice(&size.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes()); // offset, unused by these tests
        }
        buf.extend_from_slice(&0u32.to_le_bytes()); // data_size
        buf.extend_from_slice(&0u32.to_le_bytes()); // data_off
        let len = buf.len() as u32;
        buf[file_size_pos..file_size_pos + 4].copy_from_slice(&len.to_le_bytes());
    }

    #[test]
    fn minimal_header_parses_and_checksum_repairs() {
        let mut buf = Vec::new();
        push_header(&mut buf, [0, 0, 0, 0, 0, 0]);
        let mut dex = Dex::new(buf).expect("parses");
        let repaired = dex.repair_checksum().expect("repairs");
        assert_eq!(repaired, dex.compute_adler32().unwrap());
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let buf = vec![0u8; 0x70];
        assert!(Dex::new(buf).is_err());
        assert!(!is_valid(&[0u8; 8]));
    }

    #[test]
    fn compact_code_item_all_nibbles_present() {
        // registers=1, ins=0, outs=0, tries=0 all fit in nibbles; insns_size=2 inline.
        let mut data = vec![0u8; 8];
        let first: u16 = 1; // registers nibble = 1, rest 0
        let second: u16 = 2 << 5; // no preheader flags set, inline insns_size = 2
        data[0..2].copy_from_slice(&first.to_le_bytes());
        data[2..4].copy_from_slice(&second.to_le_bytes());
        data[4..6].copy_from_slice(&0xAAAAu16.to_le_bytes());
        data[6..8].copy_from_slice(&0xBBBBu16.to_le_bytes());

        let mut header_buf = Vec::new();
        header_buf.extend_from_slice(b"cdex");
        header_buf.extend_from_slice(b"001\0");
        header_buf.extend_from_slice(&0u32.to_le_bytes());
        header_buf.extend_from_slice(&[0u8; 20]);
        let file_size_pos = header_buf.len();
        header_buf.extend_from_slice(&0u32.to_le_bytes());
        header_buf.extend_from_slice(&0x78u32.to_le_bytes());
        header_buf.extend_from_slice(&ENDIAN_CONSTANT.to_le_bytes());
        for _ in 0..16 {
            header_buf.extend_from_slice(&0u32.to_le_bytes());
        }
        header_buf.extend_from_slice(&0u32.to_le_bytes()); // feature_flags
        header_buf.extend_from_slice(&0u32.to_le_bytes()); // debug_info_offsets_pos
        header_buf.extend_from_slice(&0u32.to_le_bytes()); // debug_info_offsets_table_offset
        header_buf.extend_from_slice(&0u32.to_le_bytes()); // debug_info_base
        header_buf.extend_from_slice(&0u32.to_le_bytes()); // data_size
        header_buf.extend_from_slice(&0u32.to_le_bytes()); // data_off
        let code_off = header_buf.len() as u32;
        header_buf.extend_from_slice(&data);
        let len = header_buf.len() as u32;
        header_buf[file_size_pos..file_size_pos + 4].copy_from_slice(&len.to_le_bytes());

        let dex = Dex::new(header_buf).expect("parses");
        let view = dex.code_item(code_off).expect("decodes");
        assert_eq!(view.registers_size, 1);
        assert_eq!(view.insns_size, 2);
        assert_eq!(view.insns_off, code_off + 4);
        let insns = dex.read_insns(&view).unwrap();
        assert_eq!(insns, vec![0xAAAA, 0xBBBB]);
    }

    #[test]
    fn unhide_access_flags_clears_bit_without_changing_width() {
        let mut buf = Vec::new();
        push_header(&mut buf, [0, 0, 0, 0, 0, 0]);
        let access_flags_off = buf.len();
        let mut flags_bytes = [0u8; 2];
        leb128::write_uleb128_fixed_width(0x129, 2, &mut flags_bytes);
        buf.extend_from_slice(&flags_bytes);
        let len = buf.len() as u32;
        // file_size lives right after magic+version+checksum+signature (offset 0x10).
        buf[0x10..0x14].copy_from_slice(&len.to_le_bytes());

        let mut dex = Dex::new(buf).expect("parses");
        dex.unhide_access_flags(access_flags_off, false).unwrap();

        let region = &dex.as_bytes()[access_flags_off..access_flags_off + 2];
        let mut cursor = Cursor::new(region);
        let flags = cursor.read_uleb128().unwrap();
        assert_eq!(flags, 0x129 & !0x20);
        assert_eq!(cursor.position(), 2);
    }
}
