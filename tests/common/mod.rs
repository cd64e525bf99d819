#![allow(dead_code)]

use httpmock::prelude::*;
use httpmock::Method::PATCH;
use spectral_processor::config::HsdbConfig;

pub const TOKEN_PATH: &str = "/api/oauth/token";

pub fn hsdb_config(server: &MockServer) -> HsdbConfig {
    HsdbConfig {
        url: server.base_url(),
        email: "lab@example.org".to_string(),
        password: "secret".to_string(),
        client_id: "processor".to_string(),
        timeout_seconds: 5,
        auth_retry_attempts: 2,
        auth_retry_delay_ms: 1,
    }
}

/// Password grant answering with `token`.
pub async fn mock_password_grant<'a>(server: &'a MockServer, token: &str) -> httpmock::Mock<'a> {
    let body = serde_json::json!({
        "access_token": token,
        "token_type": "Bearer",
        "refresh_token": format!("refresh-{}", token),
        "expires_in": 7200,
        "created_at": chrono::Utc::now().timestamp()
    });
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(TOKEN_PATH)
                .x_www_form_urlencoded_tuple("grant_type", "password")
                .x_www_form_urlencoded_tuple("email", "lab@example.org");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(body);
        })
        .await
}

pub fn spectrum_body(id: i64, filename: &str, category: &str, metadata: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "spectrum": {
            "id": id,
            "filename": filename,
            "file_url": format!("/files/{}", filename),
            "format": filename.rsplit('.').next(),
            "category": category,
            "status": null,
            "sample": {"id": 1, "name": "Icon"},
            "metadata": metadata,
            "created_at": "2024-03-01T10:00:00Z"
        }
    })
}

/// Registers `GET /api/v1/spectra/{id}` and the raw file download.
pub async fn mock_spectrum<'a>(
    server: &'a MockServer,
    id: i64,
    filename: &str,
    category: &str,
    metadata: serde_json::Value,
    content: &[u8],
) -> (httpmock::Mock<'a>, httpmock::Mock<'a>) {
    let record = spectrum_body(id, filename, category, metadata);
    let get = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/api/v1/spectra/{}", id))
                .header_exists("authorization");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(record);
        })
        .await;
    let content = content.to_vec();
    let download = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/files/{}", filename));
            then.status(200).body(content);
        })
        .await;
    (get, download)
}

/// Registers the status PATCH for `status`.
pub async fn mock_status<'a>(server: &'a MockServer, id: i64, status: &str) -> httpmock::Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path(format!("/api/v1/spectra/{}", id))
                .x_www_form_urlencoded_tuple("spectrum[status]", status);
            then.status(200).json_body(serde_json::json!({}));
        })
        .await
}

pub fn ftir_content() -> Vec<u8> {
    (0..200)
        .map(|i| {
            let x = 4000.0 - i as f64 * 10.0;
            let y = (-(x - 2920.0f64).powi(2) / 800.0).exp();
            format!("{},{}\n", x, y)
        })
        .collect::<String>()
        .into_bytes()
}
