//! Refractive index and absorption coefficient from THz time-domain spectroscopy.

use crate::config::ThzConfig;
use crate::tools::signal::{fft, linear_fit, minmax, pad, unwrap_phase, Complex};
use crate::utils::error::{ProcessorError, Result};
use std::f64::consts::PI;

/// Speed of light in mm/ps.
pub const SPEED_OF_LIGHT: f64 = 0.299_792_458;

const MIN_SAMPLES: usize = 4;

/// A time-domain trace: time in ps and detector amplitude.
#[derive(Debug, Clone, Copy)]
pub struct Trace<'a> {
    pub time: &'a [f64],
    pub amplitude: &'a [f64],
}

impl<'a> Trace<'a> {
    pub fn new(time: &'a [f64], amplitude: &'a [f64]) -> Self {
        Self { time, amplitude }
    }

    fn step(&self, label: &str) -> Result<f64> {
        if self.time.len() < MIN_SAMPLES || self.time.len() != self.amplitude.len() {
            return Err(ProcessorError::ThzError {
                message: format!("{} trace needs at least {} samples", label, MIN_SAMPLES),
            });
        }
        let (first, last) = minmax(self.time).unwrap_or((0.0, 0.0));
        let step = (last - first) / (self.time.len() - 1) as f64;
        if step <= 0.0 {
            return Err(ProcessorError::ThzError {
                message: format!("{} trace has no time span", label),
            });
        }
        Ok(step)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpticalConstants {
    /// THz
    pub frequency: Vec<f64>,
    pub refractive_index: Vec<f64>,
    /// cm⁻¹
    pub absorption: Vec<f64>,
}

impl OpticalConstants {
    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    /// Headerless `frequency,n,alpha` rows.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for i in 0..self.len() {
            writer.write_record([
                self.frequency[i].to_string(),
                self.refractive_index[i].to_string(),
                self.absorption[i].to_string(),
            ])?;
        }
        writer.into_inner().map_err(|e| ProcessorError::ThzError {
            message: e.to_string(),
        })
    }
}

/// Extracts n(f) and α(f) of a slab of `thickness_mm` from a reference and a sample trace.
///
/// The unwrapped transfer-function phase is offset-corrected with a linear
/// fit over `config.fit_interval`; results cover `config.output_interval`.
pub fn extract_optical_constants(
    reference: Trace<'_>,
    sample: Trace<'_>,
    thickness_mm: f64,
    config: &ThzConfig,
) -> Result<OpticalConstants> {
    if !(thickness_mm > 0.0) {
        return Err(ProcessorError::ThzError {
            message: format!("sample thickness must be positive, got {}", thickness_mm),
        });
    }

    let dt = reference.step("reference")?;
    let sample_dt = sample.step("sample")?;
    if ((sample_dt - dt) / dt).abs() > 0.01 {
        return Err(ProcessorError::ThzError {
            message: format!(
                "reference and sample sampled differently ({} ps vs {} ps)",
                dt, sample_dt
            ),
        });
    }

    let n = reference
        .amplitude
        .len()
        .max(sample.amplitude.len())
        .next_power_of_two();
    let reference_spectrum = fft(&pad(reference.amplitude, n));
    let sample_spectrum = fft(&pad(sample.amplitude, n));
    let time_offset = sample.time[0] - reference.time[0];

    let half = n / 2;
    let mut frequency = Vec::with_capacity(half);
    let mut transfer = Vec::with_capacity(half);
    for k in 1..half {
        let f = k as f64 / (n as f64 * dt);
        let shift = Complex::from_polar(1.0, -2.0 * PI * f * time_offset);
        frequency.push(f);
        transfer.push(sample_spectrum[k] / reference_spectrum[k] * shift);
    }

    let wrapped: Vec<f64> = transfer.iter().map(|h| h.arg()).collect();
    let phase: Vec<f64> = unwrap_phase(&wrapped).into_iter().map(|p| -p).collect();

    let (fit_f, fit_phase): (Vec<f64>, Vec<f64>) = frequency
        .iter()
        .zip(&phase)
        .filter(|(f, _)| **f >= config.fit_interval.0 && **f <= config.fit_interval.1)
        .map(|(f, p)| (*f, *p))
        .unzip();
    let (_, offset) = linear_fit(&fit_f, &fit_phase).ok_or_else(|| ProcessorError::ThzError {
        message: "not enough frequency points in the fit interval".to_string(),
    })?;

    let mut constants = OpticalConstants::default();
    for (i, &f) in frequency.iter().enumerate() {
        if f < config.output_interval.0 || f > config.output_interval.1 {
            continue;
        }
        let phi = phase[i] - offset;
        let index = 1.0 + SPEED_OF_LIGHT * phi / (2.0 * PI * f * thickness_mm);
        let magnitude = transfer[i].norm();
        let alpha = -(20.0 / thickness_mm)
            * (magnitude * (index + 1.0).powi(2) / (4.0 * index)).ln();

        if index.is_finite() && alpha.is_finite() && index > 0.0 {
            constants.frequency.push(f);
            constants.refractive_index.push(index);
            constants.absorption.push(alpha);
        }
    }

    if constants.is_empty() {
        return Err(ProcessorError::ThzError {
            message: "no usable points in the output frequency interval".to_string(),
        });
    }

    Ok(constants)
}

/// Sample thickness in mm from spectrum metadata (`thickness`, number or numeric string).
pub fn thickness_from_metadata(metadata: &serde_json::Map<String, serde_json::Value>) -> Result<f64> {
    let value = metadata.get("thickness").ok_or_else(|| ProcessorError::ThzError {
        message: "spectrum metadata has no 'thickness'".to_string(),
    })?;

    let thickness = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };

    thickness.ok_or_else(|| ProcessorError::ThzError {
        message: format!("invalid thickness {}", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(t: f64, center: f64) -> f64 {
        let sigma: f64 = 0.2;
        (-(t - center).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    #[test]
    fn test_extracts_index_of_lossless_slab() {
        let n_true = 2.0;
        let thickness = 1.0;
        let delay = (n_true - 1.0) * thickness / SPEED_OF_LIGHT;
        let transmission = 4.0 * n_true / (n_true + 1.0_f64).powi(2);

        let time: Vec<f64> = (0..800).map(|i| i as f64 * 0.05).collect();
        let reference: Vec<f64> = time.iter().map(|&t| pulse(t, 5.0)).collect();
        let sample: Vec<f64> = time
            .iter()
            .map(|&t| transmission * pulse(t, 5.0 + delay))
            .collect();

        let constants = extract_optical_constants(
            Trace::new(&time, &reference),
            Trace::new(&time, &sample),
            thickness,
            &ThzConfig::default(),
        )
        .unwrap();

        assert!(!constants.is_empty());
        assert!(constants.frequency.iter().all(|&f| (0.2..=1.0).contains(&f)));
        for (n, alpha) in constants
            .refractive_index
            .iter()
            .zip(&constants.absorption)
        {
            assert!((n - n_true).abs() < 1e-2, "n = {}", n);
            assert!(alpha.abs() < 1e-1, "alpha = {}", alpha);
        }

        let csv = String::from_utf8(constants.to_csv().unwrap()).unwrap();
        assert_eq!(csv.lines().count(), constants.len());
        assert_eq!(csv.lines().next().unwrap().split(',').count(), 3);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let time: Vec<f64> = (0..16).map(|i| i as f64 * 0.05).collect();
        let signal: Vec<f64> = time.iter().map(|&t| pulse(t, 0.4)).collect();
        let trace = Trace::new(&time, &signal);

        assert!(extract_optical_constants(trace, trace, 0.0, &ThzConfig::default()).is_err());

        let short = Trace::new(&time[..2], &signal[..2]);
        assert!(extract_optical_constants(short, trace, 1.0, &ThzConfig::default()).is_err());

        let coarse_time: Vec<f64> = (0..16).map(|i| i as f64 * 0.1).collect();
        let coarse = Trace::new(&coarse_time, &signal);
        assert!(extract_optical_constants(trace, coarse, 1.0, &ThzConfig::default()).is_err());
    }

    #[test]
    fn test_thickness_from_metadata() {
        let metadata = serde_json::json!({"thickness": "1,5"});
        let metadata = metadata.as_object().unwrap();
        assert_eq!(thickness_from_metadata(metadata).unwrap(), 1.5);

        let metadata = serde_json::json!({"thickness": 0.8});
        assert_eq!(
            thickness_from_metadata(metadata.as_object().unwrap()).unwrap(),
            0.8
        );

        let metadata = serde_json::json!({});
        assert!(thickness_from_metadata(metadata.as_object().unwrap()).is_err());
    }
}
