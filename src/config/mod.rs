#[cfg(feature = "cli")]
pub mod cli;
pub mod settings;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command};
pub use settings::{
    HsdbConfig, LoggingConfig, PeakConfig, ProcessingConfig, QueueConfig, ServerConfig, Settings,
    ThzConfig,
};
