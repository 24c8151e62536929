use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::calibration::Calibration;
use crate::counter::SwingConfig;
use crate::inference::Backend;
use crate::session::ExerciseId;
use crate::signals::HandMode;
use crate::tracker::HandTrackerConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// 保存済みキャリブレーションが無い時の可動域
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub hand_tracker: HandTrackerConfig,
    #[serde(default)]
    pub swing: SwingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// 開始時の種目
    #[serde(default = "default_exercise")]
    pub exercise: ExerciseId,
    /// 省略時は種目の既定値
    #[serde(default)]
    pub hand_mode: Option<HandMode>,
    /// キャリブレーション JSON の保存先
    #[serde(default = "default_calibration_path")]
    pub calibration_path: String,
}

fn default_exercise() -> ExerciseId { ExerciseId::Swing }
fn default_calibration_path() -> String { "calibration.json".to_string() }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exercise: default_exercise(),
            hand_mode: None,
            calibration_path: default_calibration_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// MoveNet ONNX モデルのパス
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// 試行するバックエンド（先頭優先）
    #[serde(default = "default_backends")]
    pub backends: Vec<Backend>,
    /// フレームプールに保持するバッファ数
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_model_path() -> String { "models/movenet_lightning.onnx".to_string() }
fn default_backends() -> Vec<Backend> { Backend::PRIORITY.to_vec() }
fn default_pool_size() -> usize { 4 }

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            backends: default_backends(),
            pool_size: default_pool_size(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// 読めなければ既定値で続行
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "using default config");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 設定された手の選択モード、無ければ種目の既定値
    pub fn hand_mode(&self) -> HandMode {
        self.session
            .hand_mode
            .unwrap_or_else(|| self.session.exercise.default_hand_mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.session.exercise, ExerciseId::Swing);
        assert_eq!(config.hand_mode(), HandMode::Auto);
        assert_eq!(config.calibration, Calibration::default());
        assert_eq!(config.hand_tracker.switch_hold, 6);
        assert_eq!(config.swing.active_timeout_ms, 1500);
        assert_eq!(config.inference.backends, Backend::PRIORITY.to_vec());
    }

    #[test]
    fn test_sections_override() {
        let config = Config::parse(
            r#"
            [calibration]
            hip_angle_min = 100.0

            [session]
            exercise = "long-cycle"

            [hand_tracker]
            enter = 0.5

            [swing]
            idle_velocity = 0.001

            [inference]
            backends = ["coreml", "cpu"]
            "#,
        )
        .unwrap();
        assert_eq!(config.calibration.hip_angle_min, 100.0);
        assert_eq!(config.calibration.hip_angle_max, 175.0);
        assert_eq!(config.session.exercise, ExerciseId::LongCycle);
        assert_eq!(config.hand_mode(), HandMode::Lockout);
        assert_eq!(config.hand_tracker.enter, 0.5);
        assert_eq!(config.hand_tracker.exit, 0.25);
        assert_eq!(config.swing.idle_velocity, 0.001);
        assert_eq!(config.inference.backends, vec![Backend::CoreMl, Backend::Cpu]);
    }

    #[test]
    fn test_explicit_hand_mode() {
        let config = Config::parse("[session]\nexercise = \"snatch\"\nhand_mode = \"right\"\n").unwrap();
        assert_eq!(config.hand_mode(), HandMode::Right);
    }

    #[test]
    fn test_bad_exercise_rejected() {
        assert!(Config::parse("[session]\nexercise = \"deadlift\"\n").is_err());
    }

    #[test]
    fn test_load_from_file_and_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nexercise = \"jerk\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.session.exercise, ExerciseId::Jerk);

        assert!(Config::load("/nonexistent/config.toml").is_err());
        let fallback = Config::load_or_default("/nonexistent/config.toml");
        assert_eq!(fallback.session.exercise, ExerciseId::Swing);
    }
}
