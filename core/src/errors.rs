//! The driver's error type: composes every lower-layer error enum from
//! `vdextract-dex` with the handful of failure sites that belong to orchestration itself
//! (output collisions, malformed `--new-crc` input).

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use vdextract_dex::errors::{DexError, UnquickenError, VdexError, VerifierDepsError};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Vdex(#[from] VdexError),

    #[error(transparent)]
    Dex(#[from] DexError),

    #[error(transparent)]
    Unquicken(#[from] UnquickenError),

    #[error(transparent)]
    VerifierDeps(#[from] VerifierDepsError),

    #[error("output file already exists: {0:?} (pass --file-override to overwrite)")]
    OutputExists(PathBuf),

    #[error("verifier-deps record missing for dex index {0}")]
    MissingVerifierDeps(u32),

    #[error("{0:?} has one CRC line per line but container has a different number of dex files")]
    CrcCountMismatch(PathBuf),

    #[error("{0:?} contains a line that isn't a decimal or 0x-prefixed hex checksum")]
    InvalidCrcLine(PathBuf),
}
