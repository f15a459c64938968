use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;

use vdextract::{get_api_level, process_input, update_crc, ProcessOptions};

/// Extracts and un-quickens Dex files from an ART Vdex container.
#[derive(Parser)]
#[command(version, about, arg_required_else_help(true))]
struct Cli {
    /// A file, or a directory whose regular files are each processed.
    #[arg(long, required = true)]
    input: PathBuf,

    /// Directory to place outputs; default is alongside the input.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Overwrite existing outputs instead of failing.
    #[arg(long)]
    file_override: bool,

    /// Reverse bytecode quickening; without it, only checksum repair happens.
    #[arg(long)]
    unquicken: bool,

    /// Emit disassembly to stdout.
    #[arg(long)]
    dis: bool,

    /// Emit a verifier-deps dump to stdout.
    #[arg(long)]
    deps: bool,

    /// On a post-unquicken checksum mismatch, repair rather than fail.
    #[arg(long)]
    ignore_crc_error: bool,

    /// Redirect the log stream to a file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Severity filter: 0=FATAL, 1=ERROR, 2=WARN, 3=INFO, 4=DEBUG.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=4))]
    debug: u8,

    /// Print the container's API level (API-26..API-29) and exit.
    #[arg(long)]
    get_api_level: bool,

    /// Read CRC values from PATH and overwrite the container's per-Dex checksum cells.
    #[arg(long)]
    new_crc: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

/// `--debug=0..4` maps onto `LevelFilter::{Error, Error, Warn, Info, Debug}`; FATAL
/// collapses onto `Error` since `log` has no separate fatal level.
fn init_logging(cli: &Cli) {
    let level = match cli.debug {
        0 | 1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    if let Some(path) = &cli.log_file {
        match File::create(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("can't open log file {:?}: {}", path, err),
        }
    }

    builder.init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if cli.get_api_level {
        return print_api_level(cli);
    }

    if let Some(crc_file) = &cli.new_crc {
        let out = update_crc(&cli.input, crc_file, &cli.output)
            .with_context(|| format!("updating CRCs for {:?}", cli.input))?;
        println!("wrote {:?}", out);
        return Ok(());
    }

    let opts = ProcessOptions {
        output_dir: cli.output.clone(),
        file_override: cli.file_override,
        unquicken: cli.unquicken,
        disassemble: cli.dis,
        dump_deps: cli.deps,
        ignore_crc_error: cli.ignore_crc_error,
    };

    let report = process_input(&cli.input, &opts).with_context(|| format!("processing {:?}", cli.input))?;
    print_report(&report);
    Ok(())
}

fn print_api_level(cli: &Cli) -> anyhow::Result<()> {
    let level = get_api_level(&cli.input).with_context(|| format!("reading {:?}", cli.input))?;
    match level {
        Some(api) => println!("API-{}", api),
        None => println!("unknown API level"),
    }
    Ok(())
}

fn print_report(report: &vdextract::RunReport) {
    for file in &report.processed {
        println!("{}: {:?} ({} dex)", file.input.display(), file.version, file.extracted.len());
        for dex in &file.extracted {
            let repaired = if dex.checksum_repaired { " (checksum repaired)" } else { "" };
            println!("  [{}] {:?}{}", dex.index, dex.output_path, repaired);
            if let Some(dis) = &dex.disassembly {
                println!("{}", dis);
            }
            if let Some(deps) = &dex.deps_dump {
                println!("{}", deps);
            }
        }
        for (index, err) in &file.skipped_dex {
            eprintln!("{}: dex[{}] skipped: {}", file.input.display(), index, err);
        }
    }

    for (path, err) in &report.skipped_files {
        eprintln!("{}: skipped: {}", path.display(), err);
    }
}
