//! Errors returned by this crate.
//!
//! This module contains the definitions for all error types returned by this crate. Each
//! error type corresponds to one component boundary from the design: instruction decoding,
//! Dex file parsing, Vdex container parsing, quickening-info reading, unquickening, and
//! verifier-deps parsing never share an error enum, so a caller can always tell which
//! layer failed without inspecting a string.

use thiserror::Error;

use crate::instruction::Format;

/// Errors from the instruction model (`crate::instruction`).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InstructionError {
    #[error("instruction truncated before its declared size")]
    Truncated,

    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("opcode 0x{opcode:02x} accessed as {expected:?} but decodes as {actual:?}")]
    FormatMismatch {
        opcode: u8,
        expected: Format,
        actual: Format,
    },
}

/// Errors from Dex file parsing (`crate::dex`).
#[derive(Error, Debug)]
pub enum DexError {
    #[error("got unknown dex version: {0}")]
    UnknownVersion(u32),

    #[error("invalid header")]
    InvalidHeader,

    #[error("got error while parsing string_ids")]
    StringError,

    #[error("got error while parsing type_ids")]
    TypeError,

    #[error("got error while parsing proto_ids")]
    ProtoError,

    #[error("got error while parsing field_ids")]
    FieldError,

    #[error("got error while parsing method_ids")]
    MethodError,

    #[error("got error while parsing class_defs")]
    ClassError,

    #[error("got error while parsing class_data at offset {0:#x}")]
    ClassDataError(u32),

    #[error("index {index} out of range for pool of size {size}")]
    IndexOutOfRange { index: u32, size: u32 },

    #[error("uleb128 overran its buffer")]
    Uleb128Overrun,

    #[error("code item at offset {0:#x} is truncated")]
    TruncatedCodeItem(u32),

    #[error(transparent)]
    Instruction(#[from] InstructionError),
}

/// Errors from Vdex container parsing (`crate::vdex`).
#[derive(Error, Debug)]
pub enum VdexError {
    #[error("unrecognized vdex magic or version")]
    UnsupportedContainer,

    #[error("section {0} offset/size runs past end of file")]
    SectionOutOfBounds(&'static str),

    #[error("dex file at offset {0:#x} is not 4-byte aligned")]
    MisalignedDexFile(u32),

    #[error("checksum count {found} does not match numberOfDexFiles {expected}")]
    ChecksumCountMismatch { found: u32, expected: u32 },

    #[error("inconsistent section count or ordering in container header")]
    InconsistentLayout,

    #[error(transparent)]
    Dex(#[from] DexError),
}

/// Errors from quickening-info readers (`crate::quicken`).
#[derive(Error, Debug)]
pub enum QuickeningError {
    #[error("quickening-info blob truncated while reading table")]
    TruncatedTable,

    #[error("quickening-info offset table index {0} out of range")]
    IndexOutOfRange(u32),

    #[error("compact-offset table references a block past end of data")]
    BadCompactOffsetBlock,
}

/// Errors from the per-version unquickener (`crate::unquicken`).
#[derive(Error, Debug)]
pub enum UnquickenError {
    #[error(transparent)]
    Instruction(#[from] InstructionError),

    #[error(transparent)]
    Quickening(#[from] QuickeningError),

    #[error(transparent)]
    Dex(#[from] DexError),

    #[error("hint dex_pc {hint_pc} did not match instruction offset {actual_pc}")]
    HintAlignmentError { hint_pc: u32, actual_pc: u32 },

    #[error("unquicken left {0} hint entries unconsumed")]
    HintResidueError(u32),

    #[error("hint stream exhausted before instruction stream")]
    HintExhausted,

    #[error("recomputed checksum {computed:#x} does not match stored {stored:#x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

/// Errors from the verifier-deps deserializer (`crate::verifier_deps`).
#[derive(Error, Debug)]
pub enum VerifierDepsError {
    #[error("uleb128 read past end of verifier-deps blob")]
    Overflow,

    #[error("string id {string_id} has no backing dex string or extra string")]
    UnresolvedStringId { string_id: u32 },
}
