use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "spectral-processor")]
#[command(about = "Spectral data processor for the Heritage Science DB")]
#[command(version)]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP API together with the processing workers
    Serve,

    /// Process a single spectrum synchronously
    Process {
        /// HSDB spectrum id
        id: i64,
    },

    /// List spectra stored in HSDB
    List,

    /// Show one spectrum record from HSDB
    Show {
        /// HSDB spectrum id
        id: i64,
    },

    /// Upload a raw instrument file to HSDB as a new spectrum of a sample
    Upload {
        /// HSDB sample id
        sample_id: i64,

        /// Raw instrument file
        file: PathBuf,
    },

    /// Convert a local instrument file to CSV
    Convert {
        /// Raw instrument file
        input: PathBuf,

        /// Filetype key such as `ftir.dpt`; detected from the content when omitted
        #[arg(short, long)]
        filetype: Option<String>,

        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Also write the detected peaks as peaks.json
        #[arg(long)]
        peaks: bool,
    },
}

impl Command {
    /// True for commands that talk to HSDB and therefore need credentials.
    pub fn needs_hsdb(&self) -> bool {
        !matches!(self, Command::Convert { .. })
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if let Some(config) = &self.config {
            validation::validate_path("config", &config.to_string_lossy())?;
        }

        match &self.command {
            Command::Convert { input, output, .. } => {
                validation::validate_path("input", &input.to_string_lossy())?;
                validation::validate_path("output", &output.to_string_lossy())?;
            }
            Command::Upload { file, .. } => {
                validation::validate_path("file", &file.to_string_lossy())?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_convert_command() {
        let config = CliConfig::parse_from([
            "spectral-processor",
            "--verbose",
            "convert",
            "sample.0.dpt",
            "--filetype",
            "ftir.dpt",
            "--peaks",
        ]);

        assert!(config.verbose);
        match config.command {
            Command::Convert {
                input,
                filetype,
                output,
                peaks,
            } => {
                assert_eq!(input, PathBuf::from("sample.0.dpt"));
                assert_eq!(filetype.as_deref(), Some("ftir.dpt"));
                assert_eq!(output, PathBuf::from("./output"));
                assert!(peaks);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let config =
            CliConfig::parse_from(["spectral-processor", "process", "42", "-c", "sdp.toml"]);
        assert_eq!(config.config, Some(PathBuf::from("sdp.toml")));
        assert!(matches!(config.command, Command::Process { id: 42 }));
    }

    #[test]
    fn test_validate_rejects_empty_output() {
        let config = CliConfig {
            config: None,
            verbose: false,
            json_logs: false,
            command: Command::Convert {
                input: PathBuf::from("in.dpt"),
                filetype: None,
                output: PathBuf::new(),
                peaks: false,
            },
        };
        assert!(config.validate().is_err());
        assert!(!config.command.needs_hsdb());

        let config = CliConfig::parse_from(["spectral-processor", "upload", "3", "scan.dpt"]);
        assert!(config.validate().is_ok());
        assert!(config.command.needs_hsdb());
    }
}
