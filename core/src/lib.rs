//! Driver crate: orchestrates Vdex extraction and bytecode un-quickening above
//! `vdextract-dex`. Owns every bit of I/O this tool performs (reading files, writing
//! extracted Dex files, walking directories); the CLI binary only parses arguments,
//! prints what this crate returns, and maps errors to exit codes.

pub mod driver;
pub mod errors;
pub mod models;

pub use driver::{get_api_level, process_file, process_input, update_crc};
pub use errors::CoreError;
pub use models::{ExtractedDex, FileReport, ProcessOptions, RunReport};
