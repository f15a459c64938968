//! Deterministic textual dumps of a parsed Vdex/Dex, backing `--dis`/`--deps`. This
//! module never decides what to unquicken or how to walk a container; it only renders
//! what the other modules already computed, so its output is stable across runs of the
//! same input and safe to diff.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::dex::Dex;
use crate::instruction::{self, op, Format};
use crate::verifier_deps::VerifierDeps;

/// One line per header field that matters for identifying a Dex, in the order a reader
/// would want to check them.
pub fn dump_header(dex: &Dex) -> String {
    format!(
        "kind={:?} version={} checksum={:#010x} file_size={} header_size={} \
         strings={} types={} protos={} fields={} methods={} classes={}",
        dex.kind,
        dex.header.version,
        dex.header.checksum,
        dex.header.file_size,
        dex.header.header_size,
        dex.header.string_ids_size,
        dex.header.type_ids_size,
        dex.header.proto_ids_size,
        dex.header.field_ids_size,
        dex.header.method_ids_size,
        dex.header.class_defs_size,
    )
}

/// One line per class, naming it by descriptor rather than index where the type pool
/// resolves cleanly.
pub fn dump_class_table(dex: &Dex) -> String {
    let mut out = String::new();
    for (i, class) in dex.class_defs.iter().enumerate() {
        let name = dex
            .type_descriptor(class.class_idx as usize)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| "<type?>".to_string());
        let superclass = dex
            .type_descriptor(class.superclass_idx as usize)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| "<type?>".to_string());
        let _ = writeln!(
            out,
            "class[{}] {} access={:?} extends {} class_data_off={:#x}",
            i, name, class.access_flags, superclass, class.class_data_off
        );
    }
    out
}

/// Disassembles every instruction in `insns`, one per line, in the `--dis` format:
/// `address: raw code units | mnemonic operands`. `rewritten` marks pcs (in code units)
/// the unquickener actually touched with a leading `[updated] --->` tag; an empty set
/// renders a plain disassembly of whatever opcodes are currently in the stream.
pub fn disassemble(dex: &Dex, insns: &[u16], rewritten: &HashSet<u32>) -> Result<String, crate::errors::InstructionError> {
    let mut out = String::new();
    let mut pc = 0u32;
    while (pc as usize) < insns.len() {
        let code = &insns[pc as usize..];
        let size = instruction::size_in_code_units(code)?;
        let line = format_instruction(dex, code, pc, size, rewritten.contains(&pc));
        let _ = writeln!(out, "{}", line);
        pc += size;
    }
    Ok(out)
}

fn format_instruction(dex: &Dex, code: &[u16], pc: u32, size: u32, rewritten: bool) -> String {
    let opcode = instruction::opcode(code);
    let mnemonic = instruction::mnemonic_of(opcode).unwrap_or("<unknown>");
    let units = size.min(code.len() as u32) as usize;
    let raw: Vec<String> = code[..units].iter().map(|u| format!("{:04x}", u)).collect();
    let operands = format_operands(dex, code, opcode);
    let tag = if rewritten { "[updated] ---> " } else { "" };
    format!("{:08x}: {:<24} | {}{} {}", pc, raw.join(" "), tag, mnemonic, operands)
}

fn format_operands(dex: &Dex, code: &[u16], opcode: u8) -> String {
    match instruction::format_of(opcode) {
        Format::K21c => resolve_21c_operand(dex, opcode, instruction::v_reg_b_21c(code) as usize),
        Format::K22c => resolve_field_operand(dex, instruction::v_reg_c_22c(code) as usize),
        Format::K35c => resolve_method_operand(dex, instruction::v_reg_b_35c(code) as usize),
        Format::K3rc => resolve_method_operand(dex, instruction::v_reg_b_3rc(code) as usize),
        _ => String::new(),
    }
}

fn resolve_21c_operand(dex: &Dex, opcode: u8, idx: usize) -> String {
    const CONST_STRING: u8 = 0x1a;
    const CONST_STRING_JUMBO: u8 = 0x1b;
    match opcode {
        CONST_STRING | CONST_STRING_JUMBO => dex
            .string_data_by_idx(idx)
            .map(|s| format!("{:?}", s))
            .unwrap_or_else(|_| "<string?>".to_string()),
        op::CHECK_CAST | op::NEW_INSTANCE => dex
            .type_descriptor(idx)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| "<type?>".to_string()),
        _ => dex
            .type_descriptor(idx)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| "<unresolved>".to_string()),
    }
}

fn resolve_field_operand(dex: &Dex, field_idx: usize) -> String {
    dex.field_id(field_idx)
        .and_then(|f| dex.type_descriptor(f.type_idx as usize))
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| "<field?>".to_string())
}

fn resolve_method_operand(dex: &Dex, method_idx: usize) -> String {
    dex.method_signature(method_idx)
        .unwrap_or_else(|_| "<method?>".to_string())
}

/// Renders a Dex's verifier-deps record, resolving string ids against both the Dex's own
/// string pool and the record's own `extra_strings` overflow area.
pub fn dump_verifier_deps(dex: &Dex, deps: &VerifierDeps) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "extra_strings: {}", deps.extra_strings.len());
    for (i, s) in deps.extra_strings.iter().enumerate() {
        let _ = writeln!(out, "  [{}] {:?}", i, s);
    }

    let _ = writeln!(out, "assignable_types: {}", deps.assignable_types.len());
    for (destination, source) in &deps.assignable_types {
        let _ = writeln!(
            out,
            "  {} <- {}",
            resolve_type_label(dex, deps, *destination),
            resolve_type_label(dex, deps, *source),
        );
    }

    let _ = writeln!(out, "unassignable_types: {}", deps.unassignable_types.len());
    for (destination, source) in &deps.unassignable_types {
        let _ = writeln!(
            out,
            "  {} </- {}",
            resolve_type_label(dex, deps, *destination),
            resolve_type_label(dex, deps, *source),
        );
    }

    let _ = writeln!(out, "classes: {}", deps.classes.len());
    for c in &deps.classes {
        let flags = if c.is_unresolved() { "<unresolved>".to_string() } else { format!("{:#x}", c.access_flags) };
        let _ = writeln!(out, "  type_idx={} access_flags={}", c.type_idx, flags);
    }

    let _ = writeln!(out, "fields: {}", deps.fields.len());
    for f in &deps.fields {
        let _ = writeln!(
            out,
            "  field_idx={} access_flags={:#x} declaring_class_idx={}",
            f.field_idx, f.access_flags, f.declaring_class_idx
        );
    }

    let _ = writeln!(out, "methods: {}", deps.methods.len());
    for m in &deps.methods {
        let _ = writeln!(
            out,
            "  method_idx={} access_flags={:#x} declaring_class_idx={} kind={:?}",
            m.method_idx, m.access_flags, m.declaring_class_idx, m.kind
        );
    }

    let _ = writeln!(out, "unverified_classes: {}", deps.unverified_classes.len());
    for idx in &deps.unverified_classes {
        let _ = writeln!(out, "  {}", resolve_type_label(dex, deps, *idx));
    }

    out
}

fn resolve_type_label(dex: &Dex, _deps: &VerifierDeps, type_idx: u32) -> String {
    dex.type_descriptor(type_idx as usize)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| format!("<type?{}>", type_idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ENDIAN_CONSTANT;

    fn minimal_dex() -> Dex {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"dex\n");
        buf.extend_from_slice(b"035\0");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 20]);
        let file_size_pos = buf.len();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0x70u32.to_le_bytes());
        buf.extend_from_slice(&ENDIAN_CONSTANT.to_le_bytes());
        for _ in 0..17 {
            buf.extend_from_slice(&0u32.to_le_bytes());
        }
        let len = buf.len() as u32;
        buf[file_size_pos..file_size_pos + 4].copy_from_slice(&len.to_le_bytes());
        Dex::new(buf).expect("parses")
    }

    #[test]
    fn disassembles_return_void_as_one_line() {
        let dex = minimal_dex();
        let insns = [op::RETURN_VOID as u16];
        let out = disassemble(&dex, &insns, &HashSet::new()).unwrap();
        assert!(out.contains("return-void"));
        assert!(out.starts_with("00000000:"));
    }

    #[test]
    fn rewritten_pc_gets_updated_tag() {
        let dex = minimal_dex();
        let insns = [op::IGET as u16, 0];
        let mut rewritten = HashSet::new();
        rewritten.insert(0);
        let out = disassemble(&dex, &insns, &rewritten).unwrap();
        assert!(out.contains("[updated] --->"));
    }

    #[test]
    fn header_dump_includes_version_and_kind() {
        let dex = minimal_dex();
        let out = dump_header(&dex);
        assert!(out.contains("kind=NormalDex"));
        assert!(out.contains("version=35"));
    }
}
