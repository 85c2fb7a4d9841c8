use anyhow::{Context, Result};
use facerank_vision::PipelineOptions;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACERANK_CONFIG_PATH").unwrap_or("/usr/local/etc/facerank/config.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub detector_model: PathBuf,
    pub classifier_model: PathBuf,
    pub class_names: PathBuf,
    pub det_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub image_size: u32,
    pub crop_scale: f32,
    pub classifier_input_size: u32,
    pub top_k: usize,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7860".to_string(),
            detector_model: PathBuf::from("models/det_10g.onnx"),
            classifier_model: PathBuf::from("models/best_model.onnx"),
            class_names: PathBuf::from("class_names.json"),
            det_size: 640,
            score_threshold: 0.5,
            nms_threshold: 0.4,
            image_size: 224,
            crop_scale: 0.8,
            classifier_input_size: 224,
            top_k: 5,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            detector_model: self.detector_model.clone(),
            classifier_model: self.classifier_model.clone(),
            det_size: self.det_size,
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
            image_size: self.image_size,
            crop_scale: self.crop_scale,
            classifier_input_size: self.classifier_input_size,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.det_size == 0 || self.det_size % 32 != 0 {
            anyhow::bail!("det_size must be a positive multiple of 32, got {}", self.det_size);
        }
        if self.image_size == 0 || self.classifier_input_size == 0 {
            anyhow::bail!("image_size and classifier_input_size must be positive");
        }
        if !(self.crop_scale > 0.0) {
            anyhow::bail!("crop_scale must be positive, got {}", self.crop_scale);
        }
        if self.top_k == 0 {
            anyhow::bail!("top_k must be at least 1");
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("facerank-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/facerank.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.image_size, 224);
        assert_eq!(cfg.crop_scale, 0.8);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = write_temp("partial.toml", "bind = \"127.0.0.1:9000\"\ncrop_scale = 1.0\n");
        let cfg = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.bind, "127.0.0.1:9000");
        assert_eq!(cfg.crop_scale, 1.0);
        assert_eq!(cfg.top_k, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let path = write_temp("invalid.toml", "det_size = 100\n");
        let err = load_config(Some(&path)).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{:#}", err).contains("det_size"));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let cfg = Config::default();
        let raw = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, cfg);
    }
}
