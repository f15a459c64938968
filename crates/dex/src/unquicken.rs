//! The per-version bytecode un-quickener.
//!
//! [`unquicken_dex`] walks every class-data method in a parsed [`Dex`], in turn handing
//! each method's code item to [`unquicken_method`], which runs the shared rewrite
//! algorithm against whatever [`QuickenSource`] the caller bound for this container
//! version. The three hint-stream shapes in [`crate::quicken`] and the instruction
//! decoding in [`crate::instruction`] are the only version-specific and format-specific
//! knowledge this module needs; the walk itself is identical across 006/010/021.

use std::collections::{HashMap, HashSet};

use crate::dex::Dex;
use crate::errors::UnquickenError;
use crate::instruction::{self, op};
use crate::quicken::QuickenSource;

/// Rewrites every quickened instruction reachable from a Dex's class-data methods.
///
/// `dedup` should be `Some(&mut HashSet::new())` only for Vdex 021, where CompactDex
/// code items can be shared by more than one method (e.g. a default interface method
/// body reached through several bridges); passing `None` (006/010) walks every method
/// unconditionally, matching their per-method hint framing.
///
/// Returns, for every code item actually rewritten, the set of instruction pcs (code-unit
/// offsets within that method) the walk changed — the disassembler's `[updated] --->` tag
/// reads straight off this map rather than re-deriving it from the rewritten bytecode.
pub fn unquicken_dex(
    dex: &mut Dex,
    source: &mut dyn QuickenSource,
    mut dedup: Option<&mut HashSet<u32>>,
) -> Result<HashMap<u32, HashSet<u32>>, UnquickenError> {
    let mut code_offs = Vec::new();
    for i in 0..dex.class_defs.len() {
        let class_data_off = dex.class_defs[i].class_data_off;
        let data = dex.class_data(class_data_off)?;
        for m in data.direct_methods.iter().chain(data.virtual_methods.iter()) {
            if m.code_off != 0 {
                code_offs.push((m.code_off, m.method_idx));
            }
        }
    }

    let mut rewritten = HashMap::new();
    for (code_off, method_idx) in code_offs {
        let pcs = unquicken_method(dex, source, code_off, method_idx, dedup.as_deref_mut())?;
        if !pcs.is_empty() {
            rewritten.insert(code_off, pcs);
        }
    }

    Ok(rewritten)
}

/// Rewrites the single method whose code item starts at `code_off`.
///
/// When `dedup` is `Some` and `code_off` has already been inserted by an earlier call,
/// the method's instructions are still walked (to keep size/offset bookkeeping honest
/// for any caller computing a disassembly) but no hint is consumed and nothing is
/// rewritten — the owning method already did that the first time this code item was
/// reached. This mirrors CompactDex's code-item sharing: a duplicate method entry is not
/// a second copy of the bytecode to unquicken, just another name for the same one.
/// `quicken_index` is the method's absolute Dex method index (`EncodedMethod::method_idx`,
/// already delta-decoded and reset at the direct/virtual-method boundary) — the same key
/// Vdex 021's compact-offset table is addressed by. 006 and 010 ignore it.
pub fn unquicken_method(
    dex: &mut Dex,
    source: &mut dyn QuickenSource,
    code_off: u32,
    quicken_index: u32,
    dedup: Option<&mut HashSet<u32>>,
) -> Result<HashSet<u32>, UnquickenError> {
    let view = dex.code_item(code_off)?;

    let already_processed = match dedup {
        Some(set) => !set.insert(code_off),
        None => false,
    };

    let has_hints = if already_processed {
        false
    } else {
        source.enter_method(code_off, quicken_index)?
    };

    let mut insns = dex.read_insns(&view)?;
    let mut pc = 0usize;
    let mut rewritten_pcs = HashSet::new();

    while pc < insns.len() {
        let opcode_before = instruction::opcode(&insns[pc..]);
        let code = &mut insns[pc..];

        if !already_processed {
            rewrite_one(code, opcode_before, pc as u32, source, has_hints)?;
            if instruction::opcode(code) != opcode_before {
                rewritten_pcs.insert(pc as u32);
            }
        }

        let size = instruction::size_in_code_units(code)?;
        pc += size as usize;
    }

    if pc != insns.len() {
        return Err(crate::errors::DexError::TruncatedCodeItem(code_off).into());
    }

    if !already_processed {
        source.leave_method()?;
        dex.write_insns(&view, &insns)?;
    }

    Ok(rewritten_pcs)
}

/// Applies the shared per-instruction rewrite rule from the design: `RETURN_VOID_NO_BARRIER`
/// always folds to `RETURN_VOID`; a `NOP` folds to `CHECK_CAST` only when the method has
/// hints and the next one isn't the "this really is a NOP" sentinel; the six quickened
/// field-access opcodes and the two quickened invoke-virtual opcodes each consume exactly
/// one hint index. Every other opcode is left untouched.
fn rewrite_one(
    code: &mut [u16],
    opcode: u8,
    pc: u32,
    source: &mut dyn QuickenSource,
    has_hints: bool,
) -> Result<(), UnquickenError> {
    if opcode == op::RETURN_VOID_NO_BARRIER {
        instruction::set_opcode(code, op::RETURN_VOID);
    } else if opcode == op::NOP && has_hints {
        if let Some((reference_idx, type_idx)) = source.decompile_nop(pc)? {
            instruction::set_opcode(code, op::CHECK_CAST);
            instruction::set_v_reg_a_21c(code, reference_idx as u8);
            instruction::set_v_reg_b_21c(code, type_idx);
        }
    } else if let Some(canonical) = instruction::unquicken_field_access(opcode) {
        let idx = source.decompile_index(pc)?;
        instruction::set_opcode(code, canonical);
        instruction::set_v_reg_c_22c(code, idx);
    } else if opcode == op::INVOKE_VIRTUAL_QUICK {
        let idx = source.decompile_index(pc)?;
        instruction::set_opcode(code, op::INVOKE_VIRTUAL);
        instruction::set_v_reg_b_35c(code, idx);
    } else if opcode == op::INVOKE_VIRTUAL_RANGE_QUICK {
        let idx = source.decompile_index(pc)?;
        instruction::set_opcode(code, op::INVOKE_VIRTUAL_RANGE);
        instruction::set_v_reg_b_3rc(code, idx);
    }
    Ok(())
}

/// `true` if `opcode` is any opcode this module rewrites or would have rewritten; used by
/// the [`crate::errors`]-surfacing callers to implement testable property 3 ("no
/// quickened opcode survives unquicken").
pub fn is_quickened_opcode(opcode: u8) -> bool {
    opcode == op::RETURN_VOID_NO_BARRIER
        || instruction::unquicken_field_access(opcode).is_some()
        || opcode == op::INVOKE_VIRTUAL_QUICK
        || opcode == op::INVOKE_VIRTUAL_RANGE_QUICK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ENDIAN_CONSTANT;

    /// A trivial hint source for exercising [`unquicken_method`] in isolation, without
    /// pulling in a whole version-specific container.
    struct FixedSource {
        indices: Vec<u16>,
        pos: usize,
        has_hints: bool,
    }

    impl QuickenSource for FixedSource {
        fn enter_method(&mut self, _code_off: u32, _quicken_index: u32) -> Result<bool, UnquickenError> {
            Ok(self.has_hints)
        }

        fn decompile_index(&mut self, _dex_pc: u32) -> Result<u16, UnquickenError> {
            let v = *self.indices.get(self.pos).ok_or(UnquickenError::HintExhausted)?;
            self.pos += 1;
            Ok(v)
        }

        fn decompile_nop(&mut self, _dex_pc: u32) -> Result<Option<(u16, u16)>, UnquickenError> {
            let reference_idx = self.decompile_index(0)?;
            if reference_idx == crate::quicken::NO_INDEX_16 {
                return Ok(None);
            }
            let type_idx = self.decompile_index(0)?;
            Ok(Some((reference_idx, type_idx)))
        }

        fn leave_method(&mut self) -> Result<(), UnquickenError> {
            Ok(())
        }

        fn finish(&mut self) -> Result<(), UnquickenError> {
            Ok(())
        }
    }

    fn minimal_dex_with_code(insns: &[u16]) -> (Dex, u32) {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"dex\n");
        buf.extend_from_slice(b"035\0");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 20]);
        let file_size_pos = buf.len();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0x70u32.to_le_bytes());
        buf.extend_from_slice(&ENDIAN_CONSTANT.to_le_bytes());
        // link_size/link_off/map_off, six (size, off) pool pairs, data_size/data_off.
        for _ in 0..17 {
            buf.extend_from_slice(&0u32.to_le_bytes());
        }
        let code_off = buf.len() as u32;
        buf.extend_from_slice(&1u16.to_le_bytes()); // registers_size
        buf.extend_from_slice(&0u16.to_le_bytes()); // ins_size
        buf.extend_from_slice(&0u16.to_le_bytes()); // outs_size
        buf.extend_from_slice(&0u16.to_le_bytes()); // tries_size
        buf.extend_from_slice(&0u32.to_le_bytes()); // debug_info_off
        buf.extend_from_slice(&(insns.len() as u32).to_le_bytes());
        for unit in insns {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        let len = buf.len() as u32;
        buf[file_size_pos..file_size_pos + 4].copy_from_slice(&len.to_le_bytes());

        (Dex::new(buf).expect("parses"), code_off)
    }

    #[test]
    fn return_void_no_barrier_rewrites_without_any_hint_source() {
        let (mut dex, code_off) = minimal_dex_with_code(&[op::RETURN_VOID_NO_BARRIER as u16]);
        let mut source = FixedSource { indices: vec![], pos: 0, has_hints: false };
        unquicken_method(&mut dex, &mut source, code_off, 0, None).unwrap();

        let view = dex.code_item(code_off).unwrap();
        let insns = dex.read_insns(&view).unwrap();
        assert_eq!(instruction::opcode(&insns), op::RETURN_VOID);
    }

    #[test]
    fn iget_quick_rewrites_using_next_hint_index() {
        let (mut dex, code_off) = minimal_dex_with_code(&[0x0000 | op::IGET_QUICK as u16, 0]);
        let mut source = FixedSource { indices: vec![7], pos: 0, has_hints: true };
        unquicken_method(&mut dex, &mut source, code_off, 0, None).unwrap();

        let view = dex.code_item(code_off).unwrap();
        let insns = dex.read_insns(&view).unwrap();
        assert_eq!(instruction::opcode(&insns), op::IGET);
        assert_eq!(instruction::v_reg_c_22c(&insns), 7);
        assert!(!is_quickened_opcode(instruction::opcode(&insns)));
    }

    #[test]
    fn nop_without_hints_is_left_alone() {
        let (mut dex, code_off) = minimal_dex_with_code(&[op::NOP as u16]);
        let mut source = FixedSource { indices: vec![], pos: 0, has_hints: false };
        unquicken_method(&mut dex, &mut source, code_off, 0, None).unwrap();

        let view = dex.code_item(code_off).unwrap();
        let insns = dex.read_insns(&view).unwrap();
        assert_eq!(instruction::opcode(&insns), op::NOP);
    }

    #[test]
    fn nop_with_matching_hints_folds_to_check_cast() {
        let (mut dex, code_off) = minimal_dex_with_code(&[op::NOP as u16, 0]);
        let mut source = FixedSource { indices: vec![3, 12], pos: 0, has_hints: true };
        unquicken_method(&mut dex, &mut source, code_off, 0, None).unwrap();

        let view = dex.code_item(code_off).unwrap();
        let insns = dex.read_insns(&view).unwrap();
        assert_eq!(instruction::opcode(&insns), op::CHECK_CAST);
        assert_eq!(instruction::v_reg_a_21c(&insns), 3);
        assert_eq!(instruction::v_reg_b_21c(&insns), 12);
    }

    #[test]
    fn duplicate_code_item_is_walked_but_not_rewritten_again() {
        let (mut dex, code_off) = minimal_dex_with_code(&[op::RETURN_VOID_NO_BARRIER as u16]);
        let mut source = FixedSource { indices: vec![], pos: 0, has_hints: false };
        let mut seen = HashSet::new();
        seen.insert(code_off);

        unquicken_method(&mut dex, &mut source, code_off, 1, Some(&mut seen)).unwrap();

        let view = dex.code_item(code_off).unwrap();
        let insns = dex.read_insns(&view).unwrap();
        // Second "owner" does not touch bytecode the first owner never got a chance to
        // rewrite in this isolated test (no first call happened), so it is left as-is.
        assert_eq!(instruction::opcode(&insns), op::RETURN_VOID_NO_BARRIER);
    }
}
