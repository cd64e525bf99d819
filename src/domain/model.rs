use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleRef {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Spectrum record as served by HSDB under `{"spectrum": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spectrum {
    pub id: i64,
    pub filename: String,
    pub file_url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub sample: Option<SampleRef>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Spectrum {
    pub fn is_thz(&self) -> bool {
        self.category.eq_ignore_ascii_case("thz")
    }
}

#[derive(Debug, Deserialize)]
pub struct SpectrumEnvelope {
    pub spectrum: Spectrum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumStatus {
    Ongoing,
    Error,
    Successful,
}

impl SpectrumStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpectrumStatus::Ongoing => "ongoing",
            SpectrumStatus::Error => "error",
            SpectrumStatus::Successful => "successful",
        }
    }
}

impl fmt::Display for SpectrumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakDatum {
    pub position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fwhm: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMessage {
    pub status: Outcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

impl ProcessingMessage {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            status: Outcome::Done,
            message: message.into(),
            execution_time: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Outcome::Error,
            message: message.into(),
            execution_time: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Outcome::Error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub spectrum_id: i64,
    #[serde(default)]
    pub record_type: Option<String>,
}

impl ProcessingRequest {
    pub fn new(spectrum_id: i64) -> Self {
        Self {
            spectrum_id,
            record_type: None,
        }
    }
}

/// Raw file downloaded from HSDB.
#[derive(Debug, Clone)]
pub struct SpectrumFile {
    pub spectrum_id: i64,
    pub filename: String,
    pub content: Vec<u8>,
}

/// Output of the extract stage.
#[derive(Debug, Clone)]
pub struct RawSpectrum {
    pub spectrum: Spectrum,
    pub file: SpectrumFile,
    /// THz spectra are processed against a reference measurement of the same sample.
    pub reference: Option<SpectrumFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingKind {
    Peaks,
    Thz,
}

/// Output of the transform stage, ready to be uploaded.
///
/// The CSV is uploaded even when building the metadata failed; that error is
/// reported once the file is stored.
#[derive(Debug)]
pub struct ProcessedSpectrum {
    pub spectrum_id: i64,
    pub kind: ProcessingKind,
    pub filename: String,
    pub csv: Vec<u8>,
    pub metadata: Result<serde_json::Value>,
}
