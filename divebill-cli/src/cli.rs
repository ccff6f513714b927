use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "divebill",
    version,
    about = "Inspect and watch the billing pricing configuration"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Read environment variables from this file instead of `.env`
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Seconds a fetched configuration stays fresh
    #[arg(long, global = true, default_value_t = 30, env = "PRICING_CACHE_TTL_SECS")]
    pub ttl_secs: u64,

    /// Map unparseable values to NaN instead of failing
    #[arg(long, global = true)]
    pub lenient: bool,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the current pricing configuration
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,

        /// Print a single key only
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Print the pricing configuration and reprint it after every change
    Watch {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },
}

impl Commands {
    pub fn output_format(&self) -> OutputFormat {
        match self {
            Commands::Show { output, .. } | Commands::Watch { output } => *output,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned key/value table
    Pretty,
    /// Indented JSON object
    Json,
    /// Single-line JSON object
    JsonCompact,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonCompact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_show_defaults() {
        let args = Args::try_parse_from(["divebill", "show"]).unwrap();
        assert_eq!(args.ttl_secs, 30);
        assert!(!args.lenient);
        assert!(matches!(
            args.command,
            Commands::Show {
                output: OutputFormat::Pretty,
                key: None
            }
        ));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "divebill",
            "watch",
            "--output",
            "json-compact",
            "--ttl-secs",
            "5",
            "--lenient",
        ])
        .unwrap();

        assert_eq!(args.ttl_secs, 5);
        assert!(args.lenient);
        assert_eq!(args.command.output_format(), OutputFormat::JsonCompact);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["divebill", "-v", "-q", "show"]).is_err());
    }
}
