//! Command-line argument definitions
//!
//! This module defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tethered capture station: downloads each new camera image into a
/// part-number folder and removes it from the card
#[derive(Parser, Debug)]
#[command(name = "capture-station")]
#[command(version)]
#[command(about = "Tethered camera capture into part-number folders", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root folder for captures (overrides config)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (overrides config)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full capture pipeline against a simulated camera
    ///
    /// Connects to a mock camera, binds the part number, fires `count`
    /// captures and prints each saved photo as it arrives.
    Simulate {
        /// Part number to file captures under
        #[arg(short, long)]
        part: String,

        /// Number of captures to fire
        #[arg(short = 'n', long, default_value = "3")]
        count: u32,

        /// Print each saved photo as a JSON line
        #[arg(long)]
        json: bool,

        /// Make the in-memory transport fail so the disk-backed one is used
        #[arg(long)]
        fail_primary: bool,
    },

    /// Print the sequence number the next capture of a part would get
    NextSequence {
        /// Part number
        #[arg(short, long)]
        part: String,
    },

    /// Generate the thumbnail for an existing image
    Thumbnail {
        /// Full-size image
        path: PathBuf,
    },

    /// Show the config file location or reset it
    ///
    /// The config file is stored at:
    /// - Windows: %APPDATA%\capture_station\config.toml
    /// - Linux: ~/.config/capture_station/config.toml
    ///
    /// If no config file exists, a default one will be created.
    Config {
        /// Show the config file path
        #[arg(long)]
        path: bool,

        /// Reset config to defaults (creates a fresh config file)
        #[arg(long)]
        reset: bool,
    },

    /// Generate a configuration file at a specific location
    GenerateConfig {
        /// Output path for the config file (defaults to standard location)
        #[arg(long = "to", value_name = "FILE")]
        to: Option<PathBuf>,
    },

    /// Show current configuration
    ShowConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_args() {
        let args = Args::parse_from([
            "capture-station",
            "simulate",
            "--part",
            "639808GT",
            "-n",
            "5",
            "--fail-primary",
        ]);
        match args.command {
            Commands::Simulate {
                part,
                count,
                json,
                fail_primary,
            } => {
                assert_eq!(part, "639808GT");
                assert_eq!(count, 5);
                assert!(!json);
                assert!(fail_primary);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let args = Args::parse_from([
            "capture-station",
            "next-sequence",
            "--part",
            "P",
            "--output",
            "/captures",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.output, Some(PathBuf::from("/captures")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
