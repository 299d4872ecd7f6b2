//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download files over HTTP with pause and resume support.
///
/// Interrupted transfers leave a breakpoint record behind; running the same
/// command again continues each file from the byte where it stopped.
#[derive(Parser, Debug)]
#[command(name = "resumable-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download (reads newline-separated URLs from stdin when omitted)
    pub urls: Vec<String>,

    /// Directory to write downloaded files into
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Breakpoint database file (default: <output-dir>/.breakpoints.db)
    #[arg(long = "db")]
    pub db_path: Option<PathBuf>,

    /// Streaming buffer size in bytes
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=16_777_216))]
    pub buffer_size: Option<u64>,

    /// Print one JSON object per download event instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["resumable-downloader"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.json);
        assert!(args.concurrency.is_none());
        assert!(args.output_dir.is_none());
        assert!(args.db_path.is_none());
    }

    #[test]
    fn test_cli_positional_urls_collected_in_order() {
        let args = Args::try_parse_from([
            "resumable-downloader",
            "https://example.com/a.bin",
            "https://example.com/b.bin",
        ])
        .unwrap();
        assert_eq!(
            args.urls,
            vec!["https://example.com/a.bin", "https://example.com/b.bin"]
        );
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["resumable-downloader", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["resumable-downloader", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["resumable-downloader", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["resumable-downloader", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["resumable-downloader", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["resumable-downloader", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["resumable-downloader", "-c", "1"]).unwrap();
        assert_eq!(args.concurrency, Some(1));
        let args = Args::try_parse_from(["resumable-downloader", "--concurrency", "100"]).unwrap();
        assert_eq!(args.concurrency, Some(100));
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let err = Args::try_parse_from(["resumable-downloader", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_concurrency_over_max_rejected() {
        let err = Args::try_parse_from(["resumable-downloader", "-c", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_output_dir_and_db_path() {
        let args = Args::try_parse_from([
            "resumable-downloader",
            "-o",
            "/tmp/out",
            "--db",
            "/tmp/state.db",
        ])
        .unwrap();
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/out")));
        assert_eq!(args.db_path, Some(PathBuf::from("/tmp/state.db")));
    }

    #[test]
    fn test_cli_buffer_size_zero_rejected() {
        let err =
            Args::try_parse_from(["resumable-downloader", "--buffer-size", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_json_flag() {
        let args = Args::try_parse_from(["resumable-downloader", "--json"]).unwrap();
        assert!(args.json);
    }
}
