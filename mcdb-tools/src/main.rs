//! Command-line front end for building and inspecting mcdb files.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use mcdb::{Builder, Db};

#[derive(Parser)]
#[command(name = "mcdb", version, about = "Build and inspect mcdb files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an mcdb file from tab-separated `key\tvalue` lines on stdin.
    Make {
        /// Destination path for the finished file.
        output: PathBuf,
    },
    /// Look up a key and print each matching value on its own line.
    Get {
        /// Path to an mcdb file.
        path: PathBuf,
        /// Key to look up.
        key: String,
    },
    /// Print every record in a file as tab-separated `key\tvalue` lines.
    Dump {
        /// Path to an mcdb file.
        path: PathBuf,
    },
    /// Print summary statistics about a file's header.
    Stat {
        /// Path to an mcdb file.
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Make { output } => make(&output),
        Command::Get { path, key } => get(&path, &key),
        Command::Dump { path } => dump(&path),
        Command::Stat { path } => stat(&path),
    }
}

/// Splits a path into the directory `Db::open` maps relative to and the
/// bare filename within it, since the core library opens files
/// directory-relative rather than by an arbitrary path.
fn split_dir_and_name(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name component", path.display()))?
        .into();
    Ok((dir, name))
}

fn make(output: &Path) -> Result<()> {
    let mut builder = Builder::new(output)
        .with_context(|| format!("opening staging file for {}", output.display()))?;

    let stdin = io::stdin();
    let mut count = 0u64;
    for (lineno, line) in stdin.lock().lines().enumerate() {
        let line = line.context("reading stdin")?;
        let mut parts = line.splitn(2, '\t');
        let key = parts
            .next()
            .with_context(|| format!("line {}: missing key", lineno + 1))?;
        let value = parts
            .next()
            .with_context(|| format!("line {}: missing a tab-separated value", lineno + 1))?;
        builder
            .add(key.as_bytes(), value.as_bytes())
            .with_context(|| format!("line {}: adding record", lineno + 1))?;
        count += 1;
        debug!(lineno, key, "added record");
    }

    debug!(count, "writing hash tables and fsyncing");
    let stats = builder
        .finish()
        .with_context(|| format!("publishing {}", output.display()))?;
    info!(
        records = stats.records,
        tables_used = stats.tables_used,
        bytes = stats.bytes,
        path = %output.display(),
        "built mcdb file"
    );
    Ok(())
}

fn get(path: &Path, key: &str) -> Result<()> {
    let (dir, name) = split_dir_and_name(path)?;
    let db = Db::open(&dir, &name).with_context(|| format!("opening {}", path.display()))?;

    let mut cursor = db.find_cursor();
    let mut found = false;
    let mut value = cursor.find(key.as_bytes(), 0)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    while let Some(v) = value {
        found = true;
        out.write_all(v)?;
        out.write_all(b"\n")?;
        value = cursor.find_next(key.as_bytes(), 0)?;
    }
    if !found {
        anyhow::bail!("key not found");
    }
    Ok(())
}

fn dump(path: &Path) -> Result<()> {
    let (dir, name) = split_dir_and_name(path)?;
    let db = Db::open(&dir, &name).with_context(|| format!("opening {}", path.display()))?;
    let mapping = db.register();
    let bytes = mapping.bytes();
    debug!(path = %path.display(), size = bytes.len(), "dumping records");

    let mut records = 0u64;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for slot in 0..mcdb::layout::HEADER_SLOTS {
        let desc = mcdb::layout::SlotDescriptor::read(bytes, slot)
            .context("reading header")?;
        for index in 0..desc.slot_count {
            let entry = mcdb::layout::TableEntry::read(bytes, desc.table_offset as usize, index)
                .context("reading hash table entry")?;
            if entry.is_empty() {
                continue;
            }
            let off = entry.record_offset as usize;
            let klen = mcdb::layout::read_u32be(bytes, off).context("reading record header")?;
            let vlen =
                mcdb::layout::read_u32be(bytes, off + 4).context("reading record header")?;
            let key_start = off + mcdb::layout::RECORD_HEADER_SIZE;
            let value_start = key_start + klen as usize;
            out.write_all(&bytes[key_start..value_start])?;
            out.write_all(b"\t")?;
            out.write_all(&bytes[value_start..value_start + vlen as usize])?;
            out.write_all(b"\n")?;
            records += 1;
        }
    }
    info!(records, "dump complete");
    Ok(())
}

fn stat(path: &Path) -> Result<()> {
    let (dir, name) = split_dir_and_name(path)?;
    let db = Db::open(&dir, &name).with_context(|| format!("opening {}", path.display()))?;
    let mapping = db.register();
    let bytes = mapping.bytes();
    debug!(path = %path.display(), size = bytes.len(), "computing stats");

    let mut used_slots = 0u64;
    let mut total_table_entries = 0u64;
    let mut total_records = 0u64;
    for slot in 0..mcdb::layout::HEADER_SLOTS {
        let desc = mcdb::layout::SlotDescriptor::read(bytes, slot).context("reading header")?;
        if desc.slot_count == 0 {
            continue;
        }
        used_slots += 1;
        total_table_entries += desc.slot_count;
        for index in 0..desc.slot_count {
            let entry = mcdb::layout::TableEntry::read(bytes, desc.table_offset as usize, index)
                .context("reading hash table entry")?;
            if !entry.is_empty() {
                total_records += 1;
            }
        }
    }

    println!("file size:     {} bytes", bytes.len());
    println!("used slots:    {used_slots} / {}", mcdb::layout::HEADER_SLOTS);
    println!("records:       {total_records}");
    println!("table entries: {total_table_entries}");
    if total_table_entries > 0 {
        println!(
            "load factor:   {:.3}",
            total_records as f64 / total_table_entries as f64
        );
    }
    info!(used_slots, total_records, total_table_entries, "stat complete");
    Ok(())
}
