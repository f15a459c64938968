//! Quickening-info readers: three incompatible on-disk shapes feeding the same two
//! operations the unquickener needs — "give me the index this quickened field/method
//! access was compiled from" and "is this `NOP` actually a folded `CHECK_CAST`".
//!
//! Each version gets its own cursor type satisfying [`QuickenSource`], so
//! [`crate::unquicken`] can walk a method's bytecode without caring which shape backs it.

use crate::errors::{QuickeningError, UnquickenError};
use crate::leb128::Cursor;

/// Sentinel stored in place of a type index when a `NOP` really is just a `NOP` and not
/// a folded `CHECK_CAST` (010/021's flat index streams only; 006 tells the two apart by
/// dex_pc instead, see [`GlobalStreamSource`]).
pub const NO_INDEX_16: u16 = 0xffff;

/// A source of quickening hints for one method. `enter_method` establishes position and
/// reports whether the method has any hints at all, letting a walk skip straight past a
/// method with nothing to rewrite rather than disassembling it for no reason.
/// `decompile_index`/`decompile_nop` return the next hint and fold in whatever
/// per-version validation (006's dex_pc equality check, 010/021's end-of-table bounds)
/// that version's reader performs at that point.
pub trait QuickenSource {
    /// Establishes position for the method whose code item starts at `code_off`
    /// (ignored by the flat-index sources) with running absolute method index
    /// `quicken_index` (ignored by the ones that don't need it). Returns whether this
    /// method has any hints to apply.
    fn enter_method(&mut self, code_off: u32, quicken_index: u32) -> Result<bool, UnquickenError>;

    /// Consumes and returns the index for a quickened field or method access at
    /// `dex_pc`. Only called once `enter_method` reported hints are present.
    fn decompile_index(&mut self, dex_pc: u32) -> Result<u16, UnquickenError>;

    /// Consumes whatever a `NOP` at `dex_pc` represents: `Ok(None)` if it is an ordinary
    /// `NOP`, `Ok(Some((reference_index, type_index)))` if it is a folded `CHECK_CAST`.
    fn decompile_nop(&mut self, dex_pc: u32) -> Result<Option<(u16, u16)>, UnquickenError>;

    /// Called once a method's instructions have all been walked.
    fn leave_method(&mut self) -> Result<(), UnquickenError>;

    /// Called once every Dex file in the container has been walked; the 006 global
    /// stream uses this to assert the whole blob was consumed.
    fn finish(&mut self) -> Result<(), UnquickenError>;
}

/// 006: one ULEB128-framed stream spans the *entire* container. The backend slices off
/// one method's share by reading a raw u4 byte length at the current global cursor and
/// handing the decompiler that many bytes; within it, entries are `(dex_pc, index)`
/// ULEB128 pairs, each asserted to match the instruction's actual dex_pc. A folded
/// `CHECK_CAST` consumes two pairs sharing the same dex_pc (`reference_index` then
/// `type_index`); an ordinary `NOP` is detected by *peeking* the next pair's dex_pc
/// without consuming it when it doesn't match.
pub struct GlobalStreamSource<'a> {
    data: &'a [u8],
    pos: usize,
    method_end: Option<usize>,
}

impl<'a> GlobalStreamSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        GlobalStreamSource { data, pos: 0, method_end: None }
    }

    fn method_end(&self) -> Result<usize, UnquickenError> {
        self.method_end
            .ok_or_else(|| QuickeningError::TruncatedTable.into())
    }

    /// Reads one `(dex_pc, index)` pair, advancing, asserting dex_pc equality.
    fn read_pair(&mut self, expect_pc: u32) -> Result<u16, UnquickenError> {
        let end = self.method_end()?;
        if self.pos >= end {
            return Err(UnquickenError::HintExhausted);
        }
        let mut c = Cursor::at(self.data, self.pos);
        let hint_pc = c.read_uleb128().map_err(|_| QuickeningError::TruncatedTable)?;
        let index = c.read_uleb128().map_err(|_| QuickeningError::TruncatedTable)?;
        self.pos = c.position();
        if hint_pc != expect_pc {
            return Err(UnquickenError::HintAlignmentError { hint_pc, actual_pc: expect_pc });
        }
        Ok(index as u16)
    }
}

impl<'a> QuickenSource for GlobalStreamSource<'a> {
    fn enter_method(&mut self, _code_off: u32, _quicken_index: u32) -> Result<bool, UnquickenError> {
        let mut c = Cursor::at(self.data, self.pos);
        let size = c
            .read_u32_le()
            .map_err(|_| QuickeningError::TruncatedTable)? as usize;
        let sub_start = c.position();
        let sub_end = sub_start
            .checked_add(size)
            .ok_or(QuickeningError::TruncatedTable)?;
        if sub_end > self.data.len() {
            return Err(QuickeningError::TruncatedTable.into());
        }
        self.pos = sub_start;
        self.method_end = Some(sub_end);
        Ok(size != 0)
    }

    fn decompile_index(&mut self, dex_pc: u32) -> Result<u16, UnquickenError> {
        self.read_pair(dex_pc)
    }

    fn decompile_nop(&mut self, dex_pc: u32) -> Result<Option<(u16, u16)>, UnquickenError> {
        let end = self.method_end()?;
        if self.pos >= end {
            return Ok(None);
        }
        // Peek the next pair's dex_pc without committing; an ordinary NOP pads the
        // stream with nothing, so a mismatch here just means "not a folded check-cast".
        let mut peek = Cursor::at(self.data, self.pos);
        let peeked_pc = peek.read_uleb128().map_err(|_| QuickeningError::TruncatedTable)?;
        if peeked_pc != dex_pc {
            return Ok(None);
        }
        let reference_index = self.read_pair(dex_pc)?;
        let type_index = self.read_pair(dex_pc)?;
        Ok(Some((reference_index, type_index)))
    }

    fn leave_method(&mut self) -> Result<(), UnquickenError> {
        // The sub-stream's declared size, not how much of it a partial walk consumed,
        // is authoritative; jump straight to its end.
        if let Some(end) = self.method_end.take() {
            self.pos = end;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), UnquickenError> {
        if self.pos != self.data.len() {
            return Err(UnquickenError::HintResidueError((self.data.len() - self.pos) as u32));
        }
        Ok(())
    }
}

/// Shared sentinel-based sequential reader backing both 010 and 021: once positioned at
/// a method's flat `u2` index payload, `decompile_index`/`decompile_nop` pull values off
/// the front in order, with no dex_pc bookkeeping at all — the hint stream is trusted to
/// line up with quickened instructions purely by encounter order.
struct FlatIndexCursor<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> FlatIndexCursor<'a> {
    fn new(payload: &'a [u8]) -> Self {
        FlatIndexCursor { payload, pos: 0 }
    }

    fn next(&mut self) -> Result<u16, UnquickenError> {
        if self.pos + 2 > self.payload.len() {
            return Err(UnquickenError::HintExhausted);
        }
        let v = u16::from_le_bytes([self.payload[self.pos], self.payload[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn remaining(&self) -> usize {
        (self.payload.len() - self.pos) / 2
    }
}

fn flat_decompile_index(cur: &mut Option<FlatIndexCursor<'_>>) -> Result<u16, UnquickenError> {
    cur.as_mut().ok_or(UnquickenError::HintExhausted)?.next()
}

fn flat_decompile_nop(
    cur: &mut Option<FlatIndexCursor<'_>>,
) -> Result<Option<(u16, u16)>, UnquickenError> {
    let c = cur.as_mut().ok_or(UnquickenError::HintExhausted)?;
    let reference_index = c.next()?;
    if reference_index == NO_INDEX_16 {
        return Ok(None);
    }
    let type_index = c.next()?;
    Ok(Some((reference_index, type_index)))
}

/// 010: the last `numberOfDexFiles * 4` bytes of the quickening-info blob are a
/// dex-file index table giving each Dex's `(start, end)` byte range among
/// `(codeItemOffset: u4, hintPayloadOffset: u4)` entries. A method's hints are present
/// only if its code offset equals the next unconsumed entry's `codeItemOffset` — the
/// table cursor does not advance otherwise. A hint payload begins with a raw u4 byte
/// length followed by that many bytes of flat little-endian u2 values.
pub struct PerDexIndexSource<'a> {
    data: &'a [u8],
    table_pos: usize,
    table_end: usize,
    cursor: Option<FlatIndexCursor<'a>>,
}

impl<'a> PerDexIndexSource<'a> {
    pub fn new(
        quicken_info: &'a [u8],
        dex_file_idx: u32,
        number_of_dex_files: u32,
    ) -> Result<Self, UnquickenError> {
        let index_table_start = quicken_info
            .len()
            .checked_sub(number_of_dex_files as usize * 4)
            .ok_or(QuickeningError::TruncatedTable)?;
        let entry_off = index_table_start + dex_file_idx as usize * 4;
        let mut c = Cursor::at(quicken_info, entry_off);
        let start = c.read_u32_le().map_err(|_| QuickeningError::TruncatedTable)? as usize;
        let end = if dex_file_idx + 1 < number_of_dex_files {
            let mut c2 = Cursor::at(quicken_info, entry_off + 4);
            c2.read_u32_le().map_err(|_| QuickeningError::TruncatedTable)? as usize
        } else {
            index_table_start
        };
        if end > index_table_start || start > end {
            return Err(QuickeningError::TruncatedTable.into());
        }
        Ok(PerDexIndexSource {
            data: quicken_info,
            table_pos: start,
            table_end: end,
            cursor: None,
        })
    }
}

impl<'a> QuickenSource for PerDexIndexSource<'a> {
    fn enter_method(&mut self, code_off: u32, _quicken_index: u32) -> Result<bool, UnquickenError> {
        self.cursor = None;
        if self.table_pos >= self.table_end {
            return Ok(false);
        }
        let mut c = Cursor::at(self.data, self.table_pos);
        let entry_code_off = c.read_u32_le().map_err(|_| QuickeningError::TruncatedTable)?;
        if entry_code_off != code_off {
            return Ok(false);
        }
        let hint_payload_off = c.read_u32_le().map_err(|_| QuickeningError::TruncatedTable)?;
        self.table_pos = c.position();

        let mut p = Cursor::at(self.data, hint_payload_off as usize);
        let len = p.read_u32_le().map_err(|_| QuickeningError::TruncatedTable)? as usize;
        let payload = p
            .read_bytes(len)
            .map_err(|_| QuickeningError::TruncatedTable)?;
        let has_hints = !payload.is_empty();
        self.cursor = Some(FlatIndexCursor::new(payload));
        Ok(has_hints)
    }

    fn decompile_index(&mut self, _dex_pc: u32) -> Result<u16, UnquickenError> {
        flat_decompile_index(&mut self.cursor)
    }

    fn decompile_nop(&mut self, _dex_pc: u32) -> Result<Option<(u16, u16)>, UnquickenError> {
        flat_decompile_nop(&mut self.cursor)
    }

    fn leave_method(&mut self) -> Result<(), UnquickenError> {
        if let Some(c) = &self.cursor {
            if c.remaining() != 0 {
                return Err(UnquickenError::HintResidueError(c.remaining() as u32));
            }
        }
        self.cursor = None;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), UnquickenError> {
        Ok(())
    }
}

/// 021: a compact offset table keyed by a running absolute method index
/// (`lastIdx + methodIdx`, reset at the direct/virtual boundary — the same delta-index
/// resolution already used for class-data). `getOffset` resolves an index to a byte
/// offset via a block of `kElementsPerIndex = 16` methods sharing one big-endian u16
/// presence bitmask, followed by cumulative ULEB128 deltas from a minimum offset; the
/// resolved offset is biased by +1 (0 means "not quickened"). The hint payload at the
/// resolved offset is a ULEB128 element count followed by that many flat little-endian
/// u2 values.
pub struct CompactOffsetSource<'a> {
    data: &'a [u8],
    compact_offset_data_begin: usize,
    compact_offset_min_offset: u32,
    compact_offset_table: usize,
    cursor: Option<FlatIndexCursor<'a>>,
}

const ELEMENTS_PER_INDEX: u32 = 16;

impl<'a> CompactOffsetSource<'a> {
    /// `sub_table_offset` is the `quickening_table_offset` u4 stored immediately before
    /// the embedded Dex's header, as resolved by the container layer.
    pub fn new(quicken_info: &'a [u8], sub_table_offset: u32) -> Result<Self, UnquickenError> {
        let base = sub_table_offset as usize;
        if base + 8 > quicken_info.len() {
            return Err(QuickeningError::BadCompactOffsetBlock.into());
        }
        let mut c = Cursor::at(quicken_info, base);
        let min_offset = c
            .read_u32_le()
            .map_err(|_| QuickeningError::BadCompactOffsetBlock)?;
        let table_offset = c
            .read_u32_le()
            .map_err(|_| QuickeningError::BadCompactOffsetBlock)?;
        let data_begin = base + 8;
        let table = data_begin
            .checked_add(table_offset as usize)
            .ok_or(QuickeningError::BadCompactOffsetBlock)?;
        Ok(CompactOffsetSource {
            data: quicken_info,
            compact_offset_data_begin: data_begin,
            compact_offset_min_offset: min_offset,
            compact_offset_table: table,
            cursor: None,
        })
    }

    /// Resolves a running absolute method index to a biased byte offset into this Dex's
    /// quickening sub-region, or `0` if the method has no hints.
    fn get_offset(&self, index: u32) -> Result<u32, QuickeningError> {
        let block = index / ELEMENTS_PER_INDEX;
        let bit_index = index % ELEMENTS_PER_INDEX;

        let entry_off = self.compact_offset_table + block as usize * 4;
        let mut c = Cursor::at(self.data, entry_off);
        let offset = c.read_u32_le().map_err(|_| QuickeningError::BadCompactOffsetBlock)?;

        let mask_off = self
            .compact_offset_data_begin
            .checked_add(offset as usize)
            .ok_or(QuickeningError::BadCompactOffsetBlock)?;
        let mask_bytes = self
            .data
            .get(mask_off..mask_off + 2)
            .ok_or(QuickeningError::BadCompactOffsetBlock)?;
        let bit_mask: u16 = ((mask_bytes[0] as u16) << 8) | mask_bytes[1] as u16;

        if bit_mask & (1u16 << bit_index) == 0 {
            return Ok(0);
        }

        // Number of set bits at position <= bit_index, i.e. how many ULEB128 deltas to
        // sum before reaching this method's slot.
        let shifted = bit_mask << (15 - bit_index);
        let count = shifted.count_ones();

        let mut cur = Cursor::at(self.data, mask_off + 2);
        let mut sum = self.compact_offset_min_offset;
        for _ in 0..count {
            sum = sum
                .checked_add(cur.read_uleb128().map_err(|_| QuickeningError::BadCompactOffsetBlock)?)
                .ok_or(QuickeningError::BadCompactOffsetBlock)?;
        }
        Ok(sum)
    }
}

impl<'a> QuickenSource for CompactOffsetSource<'a> {
    fn enter_method(&mut self, _code_off: u32, quicken_index: u32) -> Result<bool, UnquickenError> {
        self.cursor = None;
        let resolved = self.get_offset(quicken_index)?;
        if resolved == 0 {
            return Ok(false);
        }
        let byte_offset = resolved as usize - 1;
        let mut c = Cursor::at(self.data, byte_offset);
        let count = c
            .read_uleb128()
            .map_err(|_| QuickeningError::BadCompactOffsetBlock)? as usize;
        let payload = c
            .read_bytes(count * 2)
            .map_err(|_| QuickeningError::BadCompactOffsetBlock)?;
        let has_hints = count != 0;
        self.cursor = Some(FlatIndexCursor::new(payload));
        Ok(has_hints)
    }

    fn decompile_index(&mut self, _dex_pc: u32) -> Result<u16, UnquickenError> {
        flat_decompile_index(&mut self.cursor)
    }

    fn decompile_nop(&mut self, _dex_pc: u32) -> Result<Option<(u16, u16)>, UnquickenError> {
        flat_decompile_nop(&mut self.cursor)
    }

    fn leave_method(&mut self) -> Result<(), UnquickenError> {
        if let Some(c) = &self.cursor {
            if c.remaining() != 0 {
                return Err(UnquickenError::HintResidueError(c.remaining() as u32));
            }
        }
        self.cursor = None;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), UnquickenError> {
        Ok(())
    }
}

/// 027 carries no quickening-info section at all; this source reports no hints for any
/// method, matching a reader that never expects quickened bytecode at this version.
pub struct NoHintsSource;

impl QuickenSource for NoHintsSource {
    fn enter_method(&mut self, _code_off: u32, _quicken_index: u32) -> Result<bool, UnquickenError> {
        Ok(false)
    }

    fn decompile_index(&mut self, _dex_pc: u32) -> Result<u16, UnquickenError> {
        Err(UnquickenError::HintExhausted)
    }

    fn decompile_nop(&mut self, _dex_pc: u32) -> Result<Option<(u16, u16)>, UnquickenError> {
        Ok(None)
    }

    fn leave_method(&mut self) -> Result<(), UnquickenError> {
        Ok(())
    }

    fn finish(&mut self) -> Result<(), UnquickenError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(dex_pc: u32, index: u32) -> Vec<u8> {
        let mut v = Vec::new();
        let mut push_uleb = |mut x: u32, v: &mut Vec<u8>| loop {
            let byte = (x & 0x7f) as u8;
            x >>= 7;
            if x == 0 {
                v.push(byte);
                break;
            } else {
                v.push(byte | 0x80);
            }
        };
        push_uleb(dex_pc, &mut v);
        push_uleb(index, &mut v);
        v
    }

    #[test]
    fn global_stream_reads_field_access_hint_then_finishes() {
        let mut sub = Vec::new();
        sub.extend(pair(0, 5));
        let mut buf = Vec::new();
        buf.extend_from_slice(&(sub.len() as u32).to_le_bytes());
        buf.extend(sub);

        let mut src = GlobalStreamSource::new(&buf);
        assert!(src.enter_method(0, 0).unwrap());
        assert_eq!(src.decompile_index(0).unwrap(), 5);
        src.leave_method().unwrap();
        src.finish().unwrap();
    }

    #[test]
    fn global_stream_nop_peek_mismatch_is_ordinary_nop() {
        let mut sub = Vec::new();
        sub.extend(pair(4, 9)); // a field-access hint for a LATER instruction, not pc=0
        let mut buf = Vec::new();
        buf.extend_from_slice(&(sub.len() as u32).to_le_bytes());
        buf.extend(sub);

        let mut src = GlobalStreamSource::new(&buf);
        assert!(src.enter_method(0, 0).unwrap());
        assert_eq!(src.decompile_nop(0).unwrap(), None);
        assert_eq!(src.decompile_index(4).unwrap(), 9);
    }

    #[test]
    fn global_stream_nop_match_consumes_two_pairs() {
        let mut sub = Vec::new();
        sub.extend(pair(0, 3)); // reference_index
        sub.extend(pair(0, 12)); // type_index
        let mut buf = Vec::new();
        buf.extend_from_slice(&(sub.len() as u32).to_le_bytes());
        buf.extend(sub);

        let mut src = GlobalStreamSource::new(&buf);
        assert!(src.enter_method(0, 0).unwrap());
        assert_eq!(src.decompile_nop(0).unwrap(), Some((3, 12)));
        src.leave_method().unwrap();
        src.finish().unwrap();
    }

    #[test]
    fn global_stream_detects_residue() {
        let buf = 0u32.to_le_bytes().to_vec();
        let mut src = GlobalStreamSource::new(&buf);
        assert!(!src.enter_method(0, 0).unwrap());
        src.leave_method().unwrap();
        // Trailing garbage the global stream never advances past.
        let mut buf2 = buf;
        buf2.extend_from_slice(&[0xff, 0xff]);
        let mut src2 = GlobalStreamSource::new(&buf2);
        src2.enter_method(0, 0).unwrap();
        src2.leave_method().unwrap();
        assert!(src2.finish().is_err());
    }

    #[test]
    fn per_dex_index_skips_method_on_offset_mismatch() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x1000u32.to_le_bytes()); // codeItemOffset
        buf.extend_from_slice(&0u32.to_le_bytes()); // hintPayloadOffset (unused: mismatch)
        buf.extend_from_slice(&0u32.to_le_bytes()); // index_table[0] = start offset 0

        let mut src = PerDexIndexSource::new(&buf, 0, 1).unwrap();
        assert!(!src.enter_method(0x2000, 0).unwrap());
    }

    #[test]
    fn per_dex_index_reads_flat_u2_payload_on_match() {
        let mut buf = Vec::new();
        let payload_off = 12u32; // right after the one table entry
        buf.extend_from_slice(&0x1000u32.to_le_bytes());
        buf.extend_from_slice(&payload_off.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // index table[0] = 0 (region start)
        // payload: len=2, one u2 value 0x1234
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&0x1234u16.to_le_bytes());

        let mut src = PerDexIndexSource::new(&buf, 0, 1).unwrap();
        assert!(src.enter_method(0x1000, 0).unwrap());
        assert_eq!(src.decompile_index(0).unwrap(), 0x1234);
        src.leave_method().unwrap();
    }

    #[test]
    fn compact_offset_source_resolves_unset_bit_as_no_hints() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes()); // compactOffsetMinOffset
        buf.extend_from_slice(&8u32.to_le_bytes()); // tableOffset (relative to data_begin)
        buf.resize(16, 0); // data_begin = 8; table at data_begin+8=16
        buf.extend_from_slice(&0u32.to_le_bytes()); // table[0] -> offset 0 within data region
        buf[8] = 0x00;
        buf[9] = 0x00; // bitmask: all bits unset

        let mut src = CompactOffsetSource::new(&buf, 0).unwrap();
        assert!(!src.enter_method(0, 0).unwrap());
    }

    #[test]
    fn compact_offset_source_resolves_set_bit_to_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_le_bytes()); // compactOffsetMinOffset
        buf.extend_from_slice(&8u32.to_le_bytes()); // tableOffset
        buf.resize(16, 0); // data_begin = 8
        buf.extend_from_slice(&0u32.to_le_bytes()); // table[0] -> mask at data_begin+0

        // bitmask big-endian at data_begin(=8): bit 0 set => 0x8000
        buf[8] = 0x80;
        buf[9] = 0x00;
        // one ULEB128 delta (+5) right after the 2-byte mask -> resolved = 100+5 = 105, biased +1 = 106
        buf.push(5);
        // pad so offset 106-1=105 lands inside the buffer with a payload: count=1, one u2=0xAAAA
        buf.resize(105, 0);
        buf.push(1); // ULEB128 count = 1
        buf.extend_from_slice(&0xAAAAu16.to_le_bytes());

        let mut src = CompactOffsetSource::new(&buf, 0).unwrap();
        assert!(src.enter_method(0, 0).unwrap());
        assert_eq!(src.decompile_index(0).unwrap(), 0xAAAA);
    }
}
