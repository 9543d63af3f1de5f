use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "megdump")]
#[command(version)]
#[command(about = "Extract every file from a MEG archive", long_about = None)]
#[command(after_help = "Files are written relative to the current directory.\n\
  Set RUST_LOG=megdump=debug for parse details.\n\n\
Exit codes:\n  \
   0  success\n  \
  -1  no archive given\n  \
  -2  archive not found\n  \
  -3  malformed archive\n  \
  -4  I/O failure\n  \
  -5  cancelled")]
pub struct Cli {
    /// MEG archive path
    #[arg(value_name = "ARCHIVE")]
    pub file: Option<PathBuf>,
}

/// Exit code when no archive path is given.
pub const EXIT_NO_ARGUMENT: i32 = -1;
