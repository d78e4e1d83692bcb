//! JSON configuration and report files.

use crate::chart::ModelEvaluation;
use crate::{PipelineError, PipelineParams, PipelineReport};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// One pipeline run as read from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub image_path: String,
    /// Scan of the physical chart used as matching template; the built-in
    /// rendering is used when absent.
    #[serde(default)]
    pub reference_path: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    /// Where to save the calibrated photo, if anywhere.
    #[serde(default)]
    pub calibrated_path: Option<String>,
    #[serde(default)]
    pub params: PipelineParams,
}

impl PipelineConfig {
    pub fn new(image_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            reference_path: None,
            output_path: None,
            calibrated_path: None,
            params: PipelineParams::default(),
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        write_pretty(self, path)
    }

    /// Resolve the output report path.
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("seedcal_report.json"))
    }
}

/// Report of one run, as written by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub image_path: String,
    #[serde(default)]
    pub config_path: Option<String>,
    #[serde(default)]
    pub result: Option<PipelineReport>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(image_path: impl Into<String>, config_path: Option<&Path>) -> Self {
        Self {
            image_path: image_path.into(),
            config_path: config_path.map(|p| p.to_string_lossy().into_owned()),
            result: None,
            error: None,
        }
    }

    pub fn set_result(&mut self, report: PipelineReport) {
        self.result = Some(report);
        self.error = None;
    }

    pub fn set_error(&mut self, err: &PipelineError) {
        self.error = Some(err.to_string());
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        write_pretty(self, path)
    }
}

/// Scores of every candidate model on one chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub image_path: String,
    pub lab_deviation: f64,
    pub models: Vec<ModelEvaluation>,
}

impl EvaluationReport {
    /// Evaluations sorted by remaining Lab error, best first.
    pub fn ranked(&self) -> Vec<&ModelEvaluation> {
        let mut out: Vec<_> = self.models.iter().collect();
        out.sort_by(|a, b| a.lab_change.total_cmp(&b.lab_change));
        out
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        write_pretty(self, path)
    }
}

fn write_pretty<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"image_path": "tray.png"}"#).unwrap();
        assert_eq!(cfg.output_path(), PathBuf::from("seedcal_report.json"));
        assert!(cfg.params.calibrate);
        assert!(cfg.params.central_region);
        assert_eq!(cfg.params.max_chart_area_ratio, 0.15);
    }

    #[test]
    fn partial_params_override_only_named_fields() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"image_path": "a.png", "params": {"calibrate": false, "segment": {"min_area_mm2": 2.0}}}"#,
        )
        .unwrap();
        assert!(!cfg.params.calibrate);
        assert_eq!(cfg.params.segment.min_area_mm2, 2.0);
        assert_eq!(cfg.params.segment.max_area_mm2, 30.0);
        assert_eq!(cfg.params.max_lab_deviation, 25.0);
    }
}
