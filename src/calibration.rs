use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::signals::MotionSignals;

/// ヒンジ角レンジの下限（度）
const MIN_HIP_RANGE: f32 = 10.0;
/// 手の高さレンジの下限（胴体長で正規化）
const MIN_HAND_RANGE: f32 = 0.3;
/// 連続カウント防止の最小レップ間隔
pub const MIN_REP_MS: u64 = 400;

// --- データ構造 ---

/// ユーザーごとの可動域
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// 最も深いヒンジ時の股関節角（度）
    #[serde(default = "default_hip_angle_min")]
    pub hip_angle_min: f32,
    /// 直立時の股関節角（度）
    #[serde(default = "default_hip_angle_max")]
    pub hip_angle_max: f32,
    /// 手が腰付近にある時の高さ
    #[serde(default = "default_hand_height_min")]
    pub hand_height_min: f32,
    /// 手が頭上にある時の高さ
    #[serde(default = "default_hand_height_max")]
    pub hand_height_max: f32,
}

fn default_hip_angle_min() -> f32 { 95.0 }
fn default_hip_angle_max() -> f32 { 175.0 }
fn default_hand_height_min() -> f32 { 0.05 }
fn default_hand_height_max() -> f32 { 1.6 }

impl Default for Calibration {
    fn default() -> Self {
        Self {
            hip_angle_min: default_hip_angle_min(),
            hip_angle_max: default_hip_angle_max(),
            hand_height_min: default_hand_height_min(),
            hand_height_max: default_hand_height_max(),
        }
    }
}

/// キャリブレーションから導出した閾値
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedThresholds {
    /// 可動域の80%: ここに達したらカウント
    pub apex_height: f32,
    /// 可動域の35%: ここより下で再アーム
    pub reset_height: f32,
    /// これを超えたら「立ち上がった」とみなす股関節角
    pub hinge_exit: f32,
    pub min_rep_ms: u64,
}

/// ガイド付きキャリブレーション中に集める1サンプル
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub hip_angle: f32,
    pub hand_height_hip: f32,
}

impl From<&MotionSignals> for CalibrationSample {
    fn from(signals: &MotionSignals) -> Self {
        Self {
            hip_angle: signals.hip_angle,
            hand_height_hip: signals.hand_height_hip,
        }
    }
}

pub fn default_calibration() -> Calibration {
    Calibration::default()
}

/// 閾値を導出する。レンジが狭すぎる場合は下限でクランプ
pub fn thresholds_from_calibration(cal: &Calibration) -> DerivedThresholds {
    let hip_range = (cal.hip_angle_max - cal.hip_angle_min).max(MIN_HIP_RANGE);
    let hand_range = (cal.hand_height_max - cal.hand_height_min).max(MIN_HAND_RANGE);

    DerivedThresholds {
        apex_height: cal.hand_height_min + hand_range * 0.8,
        reset_height: cal.hand_height_min + hand_range * 0.35,
        hinge_exit: cal.hip_angle_min + hip_range * 0.65,
        min_rep_ms: MIN_REP_MS,
    }
}

/// サンプル列の min/max 包絡からキャリブレーションを作る
///
/// 有限値が1つもない系列があれば `fallback` をそのまま返す
pub fn calibration_from_samples(samples: &[CalibrationSample], fallback: Calibration) -> Calibration {
    let envelope = |values: &mut dyn Iterator<Item = f32>| -> Option<(f32, f32)> {
        values
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    };

    let hip = envelope(&mut samples.iter().map(|s| s.hip_angle));
    let hand = envelope(&mut samples.iter().map(|s| s.hand_height_hip));

    match (hip, hand) {
        (Some((hip_min, hip_max)), Some((hand_min, hand_max))) => Calibration {
            hip_angle_min: hip_min,
            hip_angle_max: hip_max,
            hand_height_min: hand_min,
            hand_height_max: hand_max,
        },
        _ => fallback,
    }
}

// --- Save / Load ---

pub fn save_calibration<P: AsRef<Path>>(path: P, cal: &Calibration) -> Result<()> {
    let json = serde_json::to_string_pretty(cal)?;
    fs::write(path, json).context("Failed to write calibration file")?;
    Ok(())
}

pub fn load_calibration<P: AsRef<Path>>(path: P) -> Result<Calibration> {
    let content = fs::read_to_string(path).context("Failed to read calibration file")?;
    let cal: Calibration = serde_json::from_str(&content).context("Failed to parse calibration file")?;
    Ok(cal)
}
