use crate::config::HsdbConfig;
use crate::domain::model::{Spectrum, SpectrumEnvelope, SpectrumStatus};
use crate::domain::ports::SpectraRepository;
use crate::utils::error::{ProcessorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

const TOKEN_PATH: &str = "/api/oauth/token";
const SPECTRA_PATH: &str = "/api/v1/spectra";
const TOKEN_EXPIRY_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn from_response(response: TokenResponse) -> Self {
        let created_at = response
            .created_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);
        // an expiry chrono cannot represent is treated as no expiry
        let expires_at = response
            .expires_in
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| created_at.checked_add_signed(lifetime));

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        }
    }

    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                Utc::now() + ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECONDS) < expires_at
            }
            None => true,
        }
    }
}

/// HTTP client for the Heritage Science DB REST API.
///
/// The OAuth token lives in memory and is shared by all workers. A request
/// answered with 401 drops the token and is replayed once with a new one.
pub struct HsdbClient {
    client: Client,
    config: HsdbConfig,
    base_url: String,
    token: RwLock<Option<AccessToken>>,
    auth_lock: Mutex<()>,
}

impl HsdbClient {
    pub fn new(config: HsdbConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("spectral-processor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = config.url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            base_url,
            token: RwLock::new(None),
            auth_lock: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn spectrum_endpoint(&self, id: i64) -> String {
        format!("{}{}/{}", self.base_url, SPECTRA_PATH, id)
    }

    /// Absolute URLs are kept; relative ones are resolved against the HSDB host.
    pub fn resolve_file_url(&self, file_url: &str) -> String {
        if file_url.starts_with("http://") || file_url.starts_with("https://") {
            file_url.to_string()
        } else {
            self.endpoint(file_url)
        }
    }

    /// Password grant, retried with exponential backoff on transient failures.
    pub async fn authenticate(&self) -> Result<String> {
        let _guard = self.auth_lock.lock().await;
        self.authenticate_locked().await
    }

    async fn authenticate_locked(&self) -> Result<String> {
        let form = [
            ("email", self.config.email.as_str()),
            ("password", self.config.password.as_str()),
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
        ];

        let mut attempt: u32 = 0;
        loop {
            match self.request_token(&form).await {
                Ok(token) => {
                    tracing::info!("🔑 Authenticated against HSDB");
                    let access_token = token.access_token.clone();
                    *self.token.write().await = Some(token);
                    return Ok(access_token);
                }
                Err(e) if e.is_retryable() && attempt < self.config.auth_retry_attempts => {
                    let delay = self
                        .config
                        .auth_retry_delay_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    attempt += 1;
                    tracing::warn!(
                        "Authentication attempt {} failed: {}; retrying in {}ms",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    tracing::error!("❌ Authentication failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<AccessToken> {
        let url = self.endpoint(TOKEN_PATH);
        tracing::debug!("Requesting token from: {}", url);

        let response = self.client.post(&url).form(form).send().await?;
        let status = response.status();

        if status == StatusCode::OK {
            let token: TokenResponse = response.json().await?;
            return Ok(AccessToken::from_response(token));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(ProcessorError::HsdbResponseError {
                status: status.as_u16(),
                endpoint: TOKEN_PATH.to_string(),
                body,
            })
        } else {
            Err(ProcessorError::AuthenticationError {
                message: format!("token endpoint answered {}", status),
            })
        }
    }

    async fn fresh_token(&self) -> Option<String> {
        self.token
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_fresh())
            .map(|t| t.access_token.clone())
    }

    /// Returns a valid access token, refreshing or re-authenticating when needed.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.auth_lock.lock().await;
        // another worker may have authenticated while we waited
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let refresh_token = self
            .token
            .read()
            .await
            .as_ref()
            .and_then(|t| t.refresh_token.clone());

        if let Some(refresh_token) = refresh_token {
            let form = [
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ];
            match self.request_token(&form).await {
                Ok(token) => {
                    tracing::debug!("Refreshed HSDB access token");
                    let access_token = token.access_token.clone();
                    *self.token.write().await = Some(token);
                    return Ok(access_token);
                }
                Err(e) => tracing::warn!("Token refresh failed, falling back to password: {}", e),
            }
        }

        self.authenticate_locked().await
    }

    /// Marks the cached token stale while keeping its refresh token.
    pub async fn invalidate_token(&self) {
        if let Some(token) = self.token.write().await.as_mut() {
            token.expires_at = Some(Utc::now());
        }
    }

    async fn send_authorized<F>(&self, endpoint: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client, &str) -> Result<RequestBuilder> + Send + Sync,
    {
        let token = self.access_token().await?;
        let response = build(&self.client, &token)?.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("Token rejected for {}, re-authenticating", endpoint);
            self.invalidate_token().await;
            let token = self.access_token().await?;
            let response = build(&self.client, &token)?.send().await?;
            return check_status(response, endpoint).await;
        }

        check_status(response, endpoint).await
    }

    /// Uploads a new raw spectrum file for a sample.
    pub async fn post_spectrum(
        &self,
        sample_id: i64,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<serde_json::Value> {
        let url = self.endpoint(SPECTRA_PATH);
        let response = self
            .send_authorized(SPECTRA_PATH, |client, token| {
                let part = Part::bytes(data.clone()).file_name(filename.to_string());
                let form = Form::new()
                    .text("spectrum[sample_id]", sample_id.to_string())
                    .part("spectrum[file]", part);
                Ok(client.post(&url).bearer_auth(token).multipart(form))
            })
            .await?;

        Ok(response.json().await?)
    }

    async fn patch_form(&self, id: i64, field: &str, value: &str) -> Result<()> {
        let url = self.spectrum_endpoint(id);
        self.send_authorized(&url, |client, token| {
            Ok(client
                .patch(&url)
                .bearer_auth(token)
                .form(&[(field, value)]))
        })
        .await?;
        Ok(())
    }
}

async fn check_status(response: Response, endpoint: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProcessorError::HsdbResponseError {
        status: status.as_u16(),
        endpoint: endpoint.to_string(),
        body,
    })
}

fn parse_spectrum_list(value: serde_json::Value) -> Vec<Spectrum> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("spectra") {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            // list entries may come wrapped like single records
            let item = match item {
                serde_json::Value::Object(mut obj) if obj.contains_key("spectrum") => {
                    obj.remove("spectrum").unwrap_or_default()
                }
                other => other,
            };
            serde_json::from_value::<Spectrum>(item).ok()
        })
        .collect()
}

/// Picks the reference measurement of a sample: an explicit `"reference": true`
/// metadata flag wins over a filename containing "ref". The spectrum being
/// processed and spectra without a sample are never picked.
pub fn select_reference(spectra: &[Spectrum], sample_id: i64, spectrum_id: i64) -> Option<i64> {
    let of_sample: Vec<&Spectrum> = spectra
        .iter()
        .filter(|s| s.id != spectrum_id)
        .filter(|s| s.sample.as_ref().is_some_and(|sample| sample.id == sample_id))
        .collect();

    let flagged = of_sample.iter().find(|s| {
        s.metadata
            .as_ref()
            .and_then(|m| m.get("reference"))
            .and_then(|r| r.as_bool())
            .unwrap_or(false)
    });

    flagged
        .or_else(|| {
            of_sample
                .iter()
                .find(|s| s.filename.to_lowercase().contains("ref"))
        })
        .map(|s| s.id)
}

#[async_trait]
impl SpectraRepository for HsdbClient {
    async fn list_spectra(&self) -> Result<serde_json::Value> {
        let url = self.endpoint(SPECTRA_PATH);
        let response = self
            .send_authorized(SPECTRA_PATH, |client, token| {
                Ok(client.get(&url).bearer_auth(token))
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn get_spectrum(&self, id: i64) -> Result<Spectrum> {
        let url = self.spectrum_endpoint(id);
        tracing::debug!("Fetching spectrum {} from: {}", id, url);

        let response = self
            .send_authorized(&url, |client, token| Ok(client.get(&url).bearer_auth(token)))
            .await?;

        let body: serde_json::Value = response.json().await?;
        let envelope: SpectrumEnvelope =
            serde_json::from_value(body).map_err(|e| ProcessorError::RetrievalError {
                id,
                message: format!("unexpected spectrum payload: {}", e),
            })?;
        Ok(envelope.spectrum)
    }

    async fn download_file(&self, file_url: &str) -> Result<Vec<u8>> {
        let url = self.resolve_file_url(file_url);
        tracing::debug!("Downloading spectrum file: {}", url);

        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| ProcessorError::DownloadError {
                    url: url.clone(),
                    message: e.to_string(),
                })?;

        if !response.status().is_success() {
            return Err(ProcessorError::DownloadError {
                url,
                message: format!("server answered {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProcessorError::DownloadError {
                url: url.clone(),
                message: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }

    async fn update_status(&self, id: i64, status: SpectrumStatus) -> Result<()> {
        tracing::debug!("Setting spectrum {} status to {}", id, status);
        self.patch_form(id, "spectrum[status]", status.as_str()).await
    }

    async fn patch_with_processed_file(
        &self,
        id: i64,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let url = self.spectrum_endpoint(id);
        self.send_authorized(&url, |client, token| {
            let part = Part::bytes(data.clone())
                .file_name(filename.to_string())
                .mime_str("text/csv")
                .map_err(|e| ProcessorError::UploadError {
                    message: format!("cannot attach {}: {}", filename, e),
                })?;
            let form = Form::new().part("spectrum[processed_file]", part);
            Ok(client.patch(&url).bearer_auth(token).multipart(form))
        })
        .await?;
        Ok(())
    }

    async fn update_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()> {
        let serialized = serde_json::to_string(metadata)?;
        self.patch_form(id, "spectrum[metadata]", &serialized).await
    }

    async fn retrieve_reference_spectrum_id(&self, sample_id: i64, spectrum_id: i64) -> Result<i64> {
        let url = self.endpoint(SPECTRA_PATH);
        let sample = sample_id.to_string();
        let response = self
            .send_authorized(SPECTRA_PATH, |client, token| {
                Ok(client
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("sample_id", sample.as_str())]))
            })
            .await?;

        let spectra = parse_spectrum_list(response.json().await?);
        select_reference(&spectra, sample_id, spectrum_id).ok_or_else(|| ProcessorError::ThzError {
            message: format!("no reference spectrum found for sample {}", sample_id),
        })
    }
}
