use clap::Parser;
use spectral_processor::adapters::{HsdbClient, LocalStorage};
use spectral_processor::core::convert::convert_file;
use spectral_processor::core::{ProcessingRequest, SpectraRepository, Storage};
use spectral_processor::tools::FiletypeRegistry;
use spectral_processor::utils::error::{ErrorSeverity, ProcessorError, Result};
use spectral_processor::utils::{logger, validation::Validate};
use spectral_processor::{server, CliConfig, Command, ProcessingEngine, Settings, SpectrumPipeline};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    logger::init_logger(cli.verbose, cli.json_logs || settings.logging.json);
    match &settings.env_file {
        Some(path) => tracing::debug!("Loaded environment from {}", path.display()),
        None => tracing::debug!("No .env file loaded"),
    }

    tracing::info!("Starting spectral-processor {}", env!("CARGO_PKG_VERSION"));
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let validated = cli.validate().and_then(|_| {
        if cli.command.needs_hsdb() {
            settings.validate()
        } else {
            Ok(())
        }
    });
    if let Err(e) = validated {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    match run(cli.command, settings).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

            std::process::exit(exit_code(&e));
        }
    }
}

fn exit_code(e: &ProcessorError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs one subcommand and returns the process exit code.
async fn run(command: Command, settings: Settings) -> Result<i32> {
    match command {
        Command::Serve => {
            server::serve(settings).await?;
        }
        Command::Process { id } => {
            let repository = Arc::new(HsdbClient::new(settings.hsdb.clone())?);
            let pipeline = SpectrumPipeline::new(repository, settings.processing.clone())?;
            let engine = ProcessingEngine::new(pipeline);

            let message = engine.run(&ProcessingRequest::new(id)).await?;
            print_json(&message)?;
            if message.is_error() {
                return Ok(1);
            }
        }
        Command::List => {
            let client = HsdbClient::new(settings.hsdb)?;
            print_json(&client.list_spectra().await?)?;
        }
        Command::Show { id } => {
            let client = HsdbClient::new(settings.hsdb)?;
            print_json(&client.get_spectrum(id).await?)?;
        }
        Command::Upload { sample_id, file } => {
            let client = HsdbClient::new(settings.hsdb)?;
            let (directory, filename) = split_path(&file)?;
            let data = LocalStorage::new(directory).read_file(&filename).await?;

            let created = client.post_spectrum(sample_id, &filename, data).await?;
            tracing::info!("✅ Uploaded {} to sample {}", filename, sample_id);
            print_json(&created)?;
        }
        Command::Convert {
            input,
            filetype,
            output,
            peaks,
        } => {
            let (directory, filename) = split_path(&input)?;
            let content = LocalStorage::new(directory).read_file(&filename).await?;
            let storage = LocalStorage::new(&output);
            let registry = FiletypeRegistry::builtin()?;

            let result = convert_file(
                &storage,
                &registry,
                &filename,
                &content,
                filetype.as_deref(),
                peaks.then_some(&settings.processing.peaks),
            )
            .await?;

            let saved = storage.full_path(&result.csv.filename);
            tracing::info!("📁 Output saved to: {}", saved.display());
            println!("✅ Converted {} as {} ({} rows)", filename, result.filetype, result.csv.rows);
            println!("📁 Output saved to: {}", saved.display());
        }
    }
    Ok(0)
}

fn split_path(path: &Path) -> Result<(std::path::PathBuf, String)> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ProcessorError::ValidationError {
            message: format!("'{}' is not a file", path.display()),
        })?;
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok((directory, filename))
}
