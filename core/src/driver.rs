//! Orchestrates one run: open a file, detect its container version, iterate the embedded
//! Dex files, optionally unquicken each one, repair its checksum, and write it out. This
//! module is the only thing in the workspace that calls into both `vdextract-dex` and the
//! filesystem; it never prints, only returns [`FileReport`]/[`RunReport`] values and logs
//! diagnostics through the `log` facade.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use vdextract_dex::dex::{Dex, DexKind};
use vdextract_dex::pretty_print;
use vdextract_dex::quicken::{self, QuickenSource};
use vdextract_dex::unquicken;
use vdextract_dex::verifier_deps::{self, MethodShape, VerifierDeps};
use vdextract_dex::vdex::{self, DexFileSlice, VdexBackend, VdexVersion};

use crate::errors::CoreError;
use crate::models::{ExtractedDex, FileReport, ProcessOptions, RunReport};

/// Processes `input`: a single file, or every regular file in a directory tree. A file
/// that isn't a recognizable Vdex container is skipped with a warning rather than
/// aborting the run, so pointing this at a directory of mixed files is safe.
pub fn process_input(input: &Path, opts: &ProcessOptions) -> Result<RunReport, CoreError> {
    if !input.exists() {
        return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "input not found").into());
    }

    let mut report = RunReport::default();

    if input.is_dir() {
        for entry in WalkDir::new(input)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.path().is_file())
        {
            let path = entry.path();
            match process_file(path, opts) {
                Ok(file_report) => report.processed.push(file_report),
                Err(err) => {
                    log::warn!("{}: {}", path.display(), err);
                    report.skipped_files.push((path.to_path_buf(), err.to_string()));
                }
            }
        }
    } else {
        report.processed.push(process_file(input, opts)?);
    }

    Ok(report)
}

/// Processes one Vdex file: extracts every embedded Dex, each independently, so a single
/// malformed Dex doesn't stop its siblings from extracting.
pub fn process_file(path: &Path, opts: &ProcessOptions) -> Result<FileReport, CoreError> {
    let data = std::fs::read(path)?;
    let backend = vdex::detect(data)?;
    log::info!("{}: {}", path.display(), backend.dump_header());

    let version = backend.version();

    if !backend.has_dex_section() {
        log::info!("{}: container carries no dex section", path.display());
        return Ok(FileReport {
            input: path.to_path_buf(),
            version,
            extracted: Vec::new(),
            skipped_dex: Vec::new(),
        });
    }

    let num_dex = backend.num_dex_files()?;
    let slices = backend.iter_dex_files()?;
    let quickening_info = backend.quickening_info_slice().unwrap_or(&[]);

    let all_deps = if opts.dump_deps {
        let shape = method_shape_for(version);
        Some(verifier_deps::decode_all(backend.verifier_deps_slice()?, num_dex, shape)?)
    } else {
        None
    };

    // The 006 hint stream spans the whole container and must be consumed in the same
    // order the driver visits methods across every embedded Dex; every other version's
    // source is self-contained per Dex and gets built fresh inside `process_one_dex`.
    let mut global_stream = if opts.unquicken && version == VdexVersion::V006 {
        Some(quicken::GlobalStreamSource::new(quickening_info))
    } else {
        None
    };

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let out_dir = resolve_output_dir(path, opts);
    std::fs::create_dir_all(&out_dir)?;

    let mut extracted = Vec::new();
    let mut skipped_dex = Vec::new();

    for slice in &slices {
        let deps_for_slice = all_deps.as_ref().and_then(|all| all.get(slice.index as usize));
        let result = process_one_dex(
            backend.as_ref(),
            slice,
            quickening_info,
            num_dex,
            global_stream.as_mut(),
            deps_for_slice,
            opts,
            &out_dir,
            stem,
        );
        match result {
            Ok(entry) => extracted.push(entry),
            Err(err) => {
                log::warn!("{}: dex[{}]: {}", path.display(), slice.index, err);
                skipped_dex.push((slice.index, err.to_string()));
            }
        }
    }

    if let Some(mut gs) = global_stream {
        if let Err(err) = gs.finish() {
            log::warn!("{}: quickening-info stream left unconsumed data: {}", path.display(), err);
        }
    }

    Ok(FileReport { input: path.to_path_buf(), version, extracted, skipped_dex })
}

#[allow(clippy::too_many_arguments)]
fn process_one_dex(
    backend: &dyn VdexBackend,
    slice: &DexFileSlice,
    quickening_info: &[u8],
    num_dex: u32,
    global_stream: Option<&mut quicken::GlobalStreamSource<'_>>,
    deps: Option<&VerifierDeps>,
    opts: &ProcessOptions,
    out_dir: &Path,
    stem: &str,
) -> Result<ExtractedDex, CoreError> {
    let bytes = backend.as_bytes();
    let start = slice.offset as usize;
    let end = start + slice.size as usize;
    let body = bytes
        .get(start..end)
        .ok_or(vdextract_dex::errors::DexError::IndexOutOfRange { index: end as u32, size: bytes.len() as u32 })?;

    let mut dex = Dex::new(body.to_vec())?;

    let rewritten = if opts.unquicken {
        unquicken_one(&mut dex, backend.version(), slice, quickening_info, num_dex, global_stream)?
    } else {
        HashMap::new()
    };

    let checksum_repaired = finalize_checksum(&mut dex, opts)?;

    let ext = match dex.kind {
        DexKind::NormalDex => "dex",
        DexKind::CompactDex => "cdex",
    };
    let output_path = out_dir.join(dex_output_name(stem, slice.index, ext));
    if output_path.exists() && !opts.file_override {
        return Err(CoreError::OutputExists(output_path));
    }
    std::fs::write(&output_path, dex.as_bytes())?;

    let disassembly = if opts.disassemble { Some(disassemble_all(&dex, &rewritten)?) } else { None };
    let deps_dump = match (opts.dump_deps, deps) {
        (true, Some(d)) => Some(pretty_print::dump_verifier_deps(&dex, d)),
        (true, None) => return Err(CoreError::MissingVerifierDeps(slice.index)),
        (false, _) => None,
    };

    Ok(ExtractedDex { output_path, index: slice.index, checksum_repaired, disassembly, deps_dump })
}

/// Binds the per-version quickening-info reader and runs the shared unquickener against
/// it. 019 carries no quickening-info section (quickening on that version's dex section
/// is already absent), so it shares 027's no-op source.
fn unquicken_one(
    dex: &mut Dex,
    version: VdexVersion,
    slice: &DexFileSlice,
    quickening_info: &[u8],
    num_dex: u32,
    global_stream: Option<&mut quicken::GlobalStreamSource<'_>>,
) -> Result<HashMap<u32, HashSet<u32>>, CoreError> {
    let rewritten = match version {
        VdexVersion::V006 => {
            let source: &mut dyn QuickenSource =
                global_stream.expect("global stream source bound for V006 when unquicken is requested");
            unquicken::unquicken_dex(dex, source, None)?
        }
        VdexVersion::V010 => {
            let mut source = quicken::PerDexIndexSource::new(quickening_info, slice.index, num_dex)?;
            unquicken::unquicken_dex(dex, &mut source, None)?
        }
        VdexVersion::V021 => {
            let sub_table_offset = slice.quickening_table_offset.unwrap_or(0);
            let mut source = quicken::CompactOffsetSource::new(quickening_info, sub_table_offset)?;
            let mut dedup = HashSet::new();
            unquicken::unquicken_dex(dex, &mut source, Some(&mut dedup))?
        }
        VdexVersion::V019 | VdexVersion::V027 => {
            let mut source = quicken::NoHintsSource;
            unquicken::unquicken_dex(dex, &mut source, None)?
        }
    };
    Ok(rewritten)
}

/// Recomputes the Adler-32 checksum and reconciles it with the stored value. After an
/// unquicken, a mismatch is the fatal `ChecksumMismatch` from the design unless
/// `--ignore-crc-error` asked for it to be repaired instead; without unquicken, any
/// mismatch is just repaired, matching plain extraction's checksum-passthrough contract.
fn finalize_checksum(dex: &mut Dex, opts: &ProcessOptions) -> Result<bool, CoreError> {
    let computed = dex.compute_adler32()?;
    if computed == dex.header.checksum {
        return Ok(false);
    }
    if opts.unquicken && !opts.ignore_crc_error {
        return Err(vdextract_dex::errors::UnquickenError::ChecksumMismatch {
            stored: dex.header.checksum,
            computed,
        }
        .into());
    }
    dex.repair_checksum()?;
    Ok(true)
}

fn disassemble_all(dex: &Dex, rewritten: &HashMap<u32, HashSet<u32>>) -> Result<String, CoreError> {
    let mut out = String::new();
    out.push_str(&pretty_print::dump_header(dex));
    out.push('\n');
    out.push_str(&pretty_print::dump_class_table(dex));

    let no_rewrites = HashSet::new();
    for class in &dex.class_defs {
        if class.class_data_off == 0 {
            continue;
        }
        let data = dex.class_data(class.class_data_off)?;
        for method in data.direct_methods.iter().chain(data.virtual_methods.iter()) {
            if method.code_off == 0 {
                continue;
            }
            let view = dex.code_item(method.code_off)?;
            let insns = dex.read_insns(&view)?;
            let pcs = rewritten.get(&method.code_off).unwrap_or(&no_rewrites);
            out.push_str(&format!("method_idx={} code_off={:#x}\n", method.method_idx, method.code_off));
            out.push_str(&pretty_print::disassemble(dex, &insns, pcs)?);
        }
    }
    Ok(out)
}

/// Reads and reports the container version's API level, for `--get-api-level`. 027 has
/// no known mapping; `None` propagates straight through.
pub fn get_api_level(path: &Path) -> Result<Option<u32>, CoreError> {
    let data = std::fs::read(path)?;
    let backend = vdex::detect(data)?;
    Ok(backend.version().api_level())
}

/// Overwrites a container's per-Dex location-checksum cells from one checksum per line in
/// `crc_file` (decimal, or `0x`-prefixed hex) and writes the result as `<name>_updated.vdex`.
pub fn update_crc(input: &Path, crc_file: &Path, output_dir: &Option<PathBuf>) -> Result<PathBuf, CoreError> {
    let data = std::fs::read(input)?;
    let mut backend = vdex::detect(data)?;
    let num_dex = backend.num_dex_files()?;

    let crc_text = std::fs::read_to_string(crc_file)?;
    let values = parse_crc_lines(&crc_text, crc_file)?;
    if values.len() as u32 != num_dex {
        return Err(CoreError::CrcCountMismatch(crc_file.to_path_buf()));
    }

    for (idx, value) in values.into_iter().enumerate() {
        backend.set_location_checksum(idx as u32, value)?;
    }

    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let dir = output_dir
        .clone()
        .unwrap_or_else(|| input.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")));
    std::fs::create_dir_all(&dir)?;

    let out_path = dir.join(format!("{stem}_updated.vdex"));
    std::fs::write(&out_path, backend.as_bytes())?;
    Ok(out_path)
}

fn parse_crc_lines(text: &str, crc_file: &Path) -> Result<Vec<u32>, CoreError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let parsed = match line.strip_prefix("0x").or_else(|| line.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => line.parse::<u32>(),
            };
            parsed.map_err(|_| CoreError::InvalidCrcLine(crc_file.to_path_buf()))
        })
        .collect()
}

fn resolve_output_dir(input: &Path, opts: &ProcessOptions) -> PathBuf {
    opts.output_dir.clone().unwrap_or_else(|| {
        input.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
    })
}

/// `foo.vdex`'s first embedded Dex becomes `foo_classes.dex`, the second
/// `foo_classes2.dex`, and so on; `ext` is `cdex` for an embedded CompactDex.
fn dex_output_name(stem: &str, index: u32, ext: &str) -> String {
    if index == 0 {
        format!("{stem}_classes.{ext}")
    } else {
        format!("{stem}_classes{}.{ext}", index + 1)
    }
}

/// Older single-version-tag containers (006/010) keep the verifier-deps methods array
/// split into direct/virtual/interface sub-arrays; split-version-tag containers
/// (019/021/027) use one combined array. See `vdextract_dex::verifier_deps::MethodShape`.
fn method_shape_for(version: VdexVersion) -> MethodShape {
    match version {
        VdexVersion::V006 | VdexVersion::V010 => MethodShape::Split,
        VdexVersion::V019 | VdexVersion::V021 | VdexVersion::V027 => MethodShape::Combined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dex_output_name_follows_classesn_convention() {
        assert_eq!(dex_output_name("foo", 0, "dex"), "foo_classes.dex");
        assert_eq!(dex_output_name("foo", 1, "dex"), "foo_classes2.dex");
        assert_eq!(dex_output_name("foo", 2, "cdex"), "foo_classes3.cdex");
    }

    #[test]
    fn parse_crc_lines_accepts_decimal_and_hex() {
        let values = parse_crc_lines("123\n0xff\n\n0X10\n", Path::new("crc.txt")).unwrap();
        assert_eq!(values, vec![123, 0xff, 0x10]);
    }

    #[test]
    fn parse_crc_lines_rejects_garbage() {
        let err = parse_crc_lines("not-a-number", Path::new("crc.txt")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCrcLine(_)));
    }
}
