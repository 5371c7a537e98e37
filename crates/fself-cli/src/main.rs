//! Command-line interface for the fself container builder.
//!
//! Wraps ELF executables into SELF containers with caller-supplied program
//! identifiers, or prints a summary of an existing container.

use clap::Parser;
use fself::{SelfBuilder, SelfFile};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fself")]
#[command(about = "Wrap an ELF executable into a SELF container")]
struct Cli {
    /// Input file (ELF, or SELF with --describe)
    input: PathBuf,

    /// Output file (defaults to the input with a .self extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Program authentication identifier
    #[arg(long, value_parser = parse_u64, default_value = "0x3100000000000002")]
    paid: u64,

    /// Program type
    #[arg(long, value_parser = parse_u64, default_value = "0x1")]
    ptype: u64,

    /// Application version
    #[arg(long, value_parser = parse_u64, default_value = "0")]
    app_version: u64,

    /// Firmware version
    #[arg(long, value_parser = parse_u64, default_value = "0")]
    fw_version: u64,

    /// Block size for segment digesting (power of two)
    #[arg(long, value_parser = parse_u64, default_value = "0x4000")]
    block_size: u64,

    /// Print a summary of an existing container instead of building one
    #[arg(long)]
    describe: bool,
}

/// Accept decimal or 0x-prefixed hexadecimal.
fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn describe(path: &PathBuf, block_size: u32) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;
    let file = SelfFile::parse_with_block_size(&data, block_size)?;
    let header = file.header();

    println!("{}:", path.display());
    println!(
        "  version {:#x}  mode {:#x}  key type {:#x}  flags {:#x}",
        header.version, header.mode, header.key_type, header.flags
    );
    println!(
        "  file size {:#x}  header size {:#x}  meta size {:#x}",
        header.file_size, header.header_size, header.meta_size
    );
    println!(
        "  signed: {}",
        if file.is_signed() { "yes" } else { "no (placeholder)" }
    );

    println!("  entries ({}):", header.entry_count);
    for (i, entry) in file.entries().iter().enumerate() {
        let flags = entry.flags;
        println!(
            "    [{i}] offset {:#x}  size {:#x}  segment {}  blocks {}",
            entry.offset,
            entry.size,
            if flags.has_digests {
                format!("#{}", flags.segment_index)
            } else {
                "-".into()
            },
            entry.block_count(block_size),
        );
    }

    let ex = file.extended_info()?;
    println!(
        "  paid {:#x}  ptype {:#x}  app {:#x}  fw {:#x}",
        ex.paid, ex.ptype, ex.app_version, ex.fw_version
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let block_size = u32::try_from(cli.block_size).map_err(|_| "block size exceeds 32 bits")?;

    if cli.describe {
        return describe(&cli.input, block_size);
    }

    let output = cli.output.unwrap_or_else(|| {
        let mut out = cli.input.clone();
        out.set_extension("self");
        out
    });
    SelfBuilder::new()
        .paid(cli.paid)
        .program_type(cli.ptype)
        .app_version(cli.app_version)
        .fw_version(cli.fw_version)
        .block_size(block_size)
        .wrap_elf_file(&cli.input, &output)?;

    println!("Wrote {}", output.display());
    Ok(())
}
