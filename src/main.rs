//! Main entry point for the spanzip CLI application.
//!
//! Lists, tests and extracts local ZIP archives, including split sets and
//! entries encrypted with AES or ZipCrypto.

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{Level, LevelFilter, Metadata, Record};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use spanzip::{
    Cli, EncryptionMethod, FileHeader, NoPassword, Password, PasswordSupplier, SplitReader,
    ZipArchive, ZipError,
};

/// Writes log records to stderr.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let tag = match record.level() {
                Level::Error => "error",
                Level::Warn => "warning",
                Level::Info => "info",
                Level::Debug => "debug",
                Level::Trace => "trace",
            };
            eprintln!("{tag}: {}", record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    let archive = ZipArchive::open(Path::new(&cli.file))
        .with_context(|| format!("cannot open {}", cli.file))?;
    let password = cli.password.as_deref().map(Password::utf8);
    let passwords: &dyn PasswordSupplier = match &password {
        Some(password) => password,
        None => &NoPassword,
    };

    if cli.list || cli.verbose {
        list_files(&archive, cli.verbose);
        return Ok(());
    }
    if cli.test {
        return test_archive(&archive, passwords, &cli);
    }
    process_zip(&archive, passwords, &cli)
}

/// Extract the entries selected by the positional and `-x` filters.
fn process_zip(
    archive: &ZipArchive<SplitReader>,
    passwords: &dyn PasswordSupplier,
    cli: &Cli,
) -> Result<()> {
    let files_to_extract: Vec<(usize, &FileHeader)> = archive
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            // Directories are created on demand.
            if e.is_directory() {
                return false;
            }

            if !cli.files.is_empty() {
                let matches = cli.files.iter().any(|f| {
                    if has_glob_chars(f) {
                        glob_match(f, e.name())
                    } else {
                        let basename = Path::new(e.name())
                            .file_name()
                            .map(|s| s.to_string_lossy())
                            .unwrap_or_default();
                        e.name() == f || basename == *f
                    }
                });
                if !matches {
                    return false;
                }
            }

            !cli.exclude
                .iter()
                .any(|x| e.name().contains(x.as_str()) || glob_match(x, e.name()))
        })
        .collect();

    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    for (index, entry) in files_to_extract {
        extract_file(archive, index, entry, passwords, cli, multiple_files)?;
    }
    Ok(())
}

/// List files in the archive.
///
/// Simple format (`-l`) prints names only; verbose (`-v`) adds a table with
/// sizes, ratio, timestamp and encryption.
fn list_files(archive: &ZipArchive<SplitReader>, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  {:>4}  Name",
            "Length", "Size", "Cmpr", "Date", "Time", "Enc"
        );
        println!("{}", "-".repeat(76));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.entries() {
        if !verbose {
            println!("{}", entry.name());
            continue;
        }
        let core = &entry.core;
        let (year, month, day) = core.last_modified.date();
        let (hour, minute, _second) = core.last_modified.time();
        let enc = match entry.encryption_method() {
            EncryptionMethod::None => "-",
            EncryptionMethod::ZipCrypto => "zc",
            EncryptionMethod::Aes => "aes",
        };
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {:>4}  {}",
            core.uncompressed_size,
            core.compressed_size,
            ratio(core.compressed_size, core.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            enc,
            entry.name()
        );
        if !entry.is_directory() {
            total_uncompressed += core.uncompressed_size;
            total_compressed += core.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(76));
        println!(
            "{:>10}  {:>10}  {}  {:>27}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
        if !archive.comment().is_empty() {
            println!("{}", String::from_utf8_lossy(archive.comment()));
        }
    }
}

/// Percentage saved, formatted to five columns.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 {
        return "  0%".to_string();
    }
    let saved = 100 - (compressed.min(uncompressed) * 100 / uncompressed) as i64;
    format!("{saved:>4}%")
}

fn test_archive(
    archive: &ZipArchive<SplitReader>,
    passwords: &dyn PasswordSupplier,
    cli: &Cli,
) -> Result<()> {
    archive
        .check_layout()
        .context("archive structure is damaged")?;
    let mut failures = 0usize;
    let mut tested = 0u64;
    for (index, entry) in archive.entries().iter().enumerate() {
        match archive.extract_to_writer(index, passwords, &mut io::sink()) {
            Ok(bytes) => {
                tested += bytes;
                if !cli.is_quiet() {
                    println!("    testing: {:<40} OK", entry.name());
                }
            }
            Err(err) => {
                failures += 1;
                println!("    testing: {:<40} {}", entry.name(), describe(&err));
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} entries failed", archive.len());
    }
    if !cli.is_very_quiet() {
        println!(
            "No errors detected in {} ({} entries, {}).",
            cli.file,
            archive.len(),
            format_size(tested)
        );
    }
    Ok(())
}

fn describe(err: &ZipError) -> String {
    if err.is_wrong_password() {
        "incorrect password".to_string()
    } else {
        err.to_string()
    }
}

/// Extract a single entry.
///
/// Handles pipe mode (`-p`), output directory (`-d`), junk paths (`-j`) and
/// the overwrite policy (`-n`, `-o`).
fn extract_file(
    archive: &ZipArchive<SplitReader>,
    index: usize,
    entry: &FileHeader,
    passwords: &dyn PasswordSupplier,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    if cli.pipe {
        let mut stdout = io::stdout().lock();
        if show_filename {
            stdout.write_all(format!("--- {} ---\n", entry.name()).as_bytes())?;
        }
        archive
            .extract_to_writer(index, passwords, &mut stdout)
            .with_context(|| format!("cannot extract {}", entry.name()))?;
        return Ok(());
    }

    let root = cli.extract_dir.as_deref().map_or_else(PathBuf::new, PathBuf::from);
    let output_path = match entry_path(entry.name(), cli.junk_paths) {
        Some(relative) => root.join(relative),
        None => {
            // Entry names must stay inside the destination.
            eprintln!("Skipping: {} (path escapes the destination)", entry.name());
            return Ok(());
        }
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.name());
            }
            return Ok(());
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.name());
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.name());
    }
    archive
        .extract_to_file(index, passwords, &output_path)
        .map_err(|err| anyhow::anyhow!("{}: {}", entry.name(), describe(&err)))
}

/// Relative output path for an entry name, or `None` if the name is
/// absolute or climbs out of the destination.
fn entry_path(name: &str, junk_paths: bool) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut path = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if junk_paths {
        return path.file_name().map(PathBuf::from);
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching supporting `*` (any run) and `?` (one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(!glob_match("*.txt", "readme.md"));
    }

    #[test]
    fn escaping_names_are_rejected() {
        assert_eq!(entry_path("../evil", false), None);
        assert_eq!(entry_path("/etc/passwd", false), None);
        assert_eq!(entry_path("a/..\\..\\b", false), None);
        assert_eq!(entry_path("./docs/a.txt", false), Some(PathBuf::from("docs/a.txt")));
        assert_eq!(entry_path("docs/a.txt", true), Some(PathBuf::from("a.txt")));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
    }
}
