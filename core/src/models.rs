//! Plain data exchanged between the driver and its caller. None of these types perform
//! I/O or own a reference to the container buffer; they are what `--dis`/`--deps` print
//! and what the CLI's summary line is built from.

use std::path::PathBuf;

use vdextract_dex::vdex::VdexVersion;

/// Flags controlling one extraction run; a direct mapping of the CLI surface onto the
/// driver, independent of how `clap` parsed it.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Where to write extracted Dex files; `None` means alongside the input.
    pub output_dir: Option<PathBuf>,
    /// Overwrite an existing output instead of failing with [`crate::errors::CoreError::OutputExists`].
    pub file_override: bool,
    /// Reverse bytecode quickening before writing each Dex out.
    pub unquicken: bool,
    /// Also produce a disassembly text for each extracted Dex.
    pub disassemble: bool,
    /// Also produce a verifier-deps dump for each extracted Dex.
    pub dump_deps: bool,
    /// On a post-unquicken checksum mismatch, repair rather than fail the Dex.
    pub ignore_crc_error: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        ProcessOptions {
            output_dir: None,
            file_override: false,
            unquicken: false,
            disassemble: false,
            dump_deps: false,
            ignore_crc_error: false,
        }
    }
}

/// One Dex file successfully extracted from a container.
#[derive(Debug)]
pub struct ExtractedDex {
    pub output_path: PathBuf,
    pub index: u32,
    /// Whether the Adler-32 checksum differed from the stored value and was rewritten.
    pub checksum_repaired: bool,
    pub disassembly: Option<String>,
    pub deps_dump: Option<String>,
}

/// The outcome of processing one Vdex file.
#[derive(Debug)]
pub struct FileReport {
    pub input: PathBuf,
    pub version: VdexVersion,
    pub extracted: Vec<ExtractedDex>,
    /// Dex files that failed to extract, with the error that stopped them; other
    /// entries in `extracted` still went through.
    pub skipped_dex: Vec<(u32, String)>,
}

/// The outcome of one `process_input` call, which may have walked a whole directory.
#[derive(Debug, Default)]
pub struct RunReport {
    pub processed: Vec<FileReport>,
    /// Files that could not even be opened as a Vdex container, with the error.
    pub skipped_files: Vec<(PathBuf, String)>,
}
