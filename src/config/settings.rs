use crate::utils::error::{ProcessorError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hsdb: HsdbConfig,
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
    /// `.env` file read by [`Settings::load`], reported once logging is up.
    #[serde(skip)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HsdbConfig {
    pub url: String,
    pub email: String,
    pub password: String,
    pub client_id: String,
    pub timeout_seconds: u64,
    pub auth_retry_attempts: u32,
    pub auth_retry_delay_ms: u64,
}

impl Default for HsdbConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            email: String::new(),
            password: String::new(),
            client_id: String::new(),
            timeout_seconds: 30,
            auth_retry_attempts: 5,
            auth_retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub result_retention: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            capacity: 128,
            max_retries: 0,
            retry_delay_ms: 1000,
            result_retention: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub peaks: PeakConfig,
    pub thz: ThzConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    pub max_rank: usize,
    pub min_height: f64,
    pub denoise: bool,
    pub window: usize,
    pub sigma_spatial: f64,
    pub sigma_range: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            max_rank: 40,
            min_height: 0.005,
            denoise: true,
            window: 2,
            sigma_spatial: 1.0,
            sigma_range: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThzConfig {
    pub fit_interval: (f64, f64),
    pub output_interval: (f64, f64),
}

impl Default for ThzConfig {
    fn default() -> Self {
        Self {
            fit_interval: (0.1, 0.5),
            output_interval: (0.2, 1.0),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl Settings {
    /// Loads `.env`, then the optional TOML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_file = dotenvy::dotenv().ok();

        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides()?;
        settings.env_file = env_file;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ProcessorError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ProcessorError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables stay as-is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ProcessorError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("HSDB_URL") {
            self.hsdb.url = url;
        }
        if let Ok(email) = std::env::var("HSDB_EMAIL") {
            self.hsdb.email = email;
        }
        if let Ok(password) = std::env::var("HSDB_PASSWORD") {
            self.hsdb.password = password;
        }
        if let Ok(client_id) = std::env::var("HSDB_CLIENT_ID") {
            self.hsdb.client_id = client_id;
        }
        if let Ok(host) = std::env::var("SDP_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SDP_PORT") {
            self.server.port = port.parse().map_err(|_| ProcessorError::InvalidConfigValueError {
                field: "SDP_PORT".to_string(),
                value: port.clone(),
                reason: "Port must be an integer between 0 and 65535".to_string(),
            })?;
        }
        if let Ok(workers) = std::env::var("SDP_WORKERS") {
            self.queue.workers =
                workers.parse().map_err(|_| ProcessorError::InvalidConfigValueError {
                    field: "SDP_WORKERS".to_string(),
                    value: workers.clone(),
                    reason: "Worker count must be a positive integer".to_string(),
                })?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validation::validate_url("hsdb.url", &self.hsdb.url)?;
        validation::validate_required_string("hsdb.email", &self.hsdb.email)?;
        validation::validate_required_string("hsdb.password", &self.hsdb.password)?;
        validation::validate_required_string("hsdb.client_id", &self.hsdb.client_id)?;

        validation::validate_positive_number("queue.workers", self.queue.workers, 1)?;
        validation::validate_positive_number("queue.capacity", self.queue.capacity, 1)?;

        let peaks = &self.processing.peaks;
        validation::validate_positive_number("processing.peaks.max_rank", peaks.max_rank, 1)?;
        validation::validate_range("processing.peaks.min_height", peaks.min_height, 0.0, 1.0)?;

        let thz = &self.processing.thz;
        if thz.fit_interval.0 >= thz.fit_interval.1 {
            return Err(ProcessorError::ConfigValidationError {
                field: "processing.thz.fit_interval".to_string(),
                message: "Interval start must be below its end".to_string(),
            });
        }
        if thz.output_interval.0 >= thz.output_interval.1 {
            return Err(ProcessorError::ConfigValidationError {
                field: "processing.thz.output_interval".to_string(),
                message: "Interval start must be below its end".to_string(),
            });
        }

        Ok(())
    }
}
