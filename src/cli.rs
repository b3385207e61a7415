use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "spanzip")]
#[command(version)]
#[command(about = "Extract, list and test ZIP archives, including encrypted and split ones", long_about = None)]
#[command(after_help = "Examples:\n  \
  spanzip data1.zip -x joe        extract all files except joe from data1.zip\n  \
  spanzip -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  spanzip -t -P secret backup.zip test every entry of an encrypted archive\n  \
  spanzip -l backup.zip           list a split archive (backup.z01, ... backup.zip)")]
pub struct Cli {
    /// ZIP file path (the final .zip disk, or the .001 disk of a numbered set)
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive: check layout, decrypt and decompress every entry
    #[arg(short = 't')]
    pub test: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Password for encrypted entries
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Log codec internals to stderr
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else if self.is_very_quiet() {
            log::LevelFilter::Off
        } else if self.is_quiet() {
            log::LevelFilter::Error
        } else {
            log::LevelFilter::Warn
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["spanzip", "-t", "-P", "pw", "-qq", "a.zip", "x.txt"]);
        assert!(cli.test);
        assert_eq!(cli.password.as_deref(), Some("pw"));
        assert_eq!(cli.files, vec!["x.txt"]);
        assert_eq!(cli.log_level(), log::LevelFilter::Off);
    }
}
