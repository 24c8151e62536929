//! Repetition counters, one state machine per movement family.

pub mod lockout;
pub mod swing;

pub use lockout::{LockoutConfig, LockoutRepCounter, Rearm};
pub use swing::{SwingConfig, SwingRepCounter};

use serde::Serialize;

use crate::signals::{FrameSignals, HandUsed};

/// これ未満の信頼度のフレームは使わない
pub const MIN_CONF: f32 = 0.25;
/// 再アーム・ロック解除に必要な連続フレーム数
pub const REARM_FRAMES: u32 = 3;

/// 1フレーム分のカウンタ出力
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterUpdate {
    pub count: u32,
    /// フェーズ名 ("backswing", "lockout" など)
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<&'static str>,
}

pub trait RepCounter: Send {
    fn name(&self) -> &'static str;

    fn reset(&mut self);

    /// 使えないフレームでは `None` を返し、状態は変えない
    fn update(&mut self, signals: &FrameSignals, now_ms: u64) -> Option<CounterUpdate>;

    /// 現在の姿勢ではカウントせず、各手が再アーム姿勢を通ってから受け付ける
    fn require_rearm(&mut self) {}

    fn count(&self) -> u32;

    fn active_hand(&self) -> Option<HandUsed>;
}

/// 股関節角が有限かつフレーム信頼度が十分か
pub(crate) fn usable(signals: &FrameSignals) -> bool {
    signals.hip_angle.is_finite() && signals.confidence >= MIN_CONF
}

/// 前回のレップから `min_rep_ms` を超えて経過したか
pub(crate) fn debounced(last_rep_ms: Option<u64>, now_ms: u64, min_rep_ms: u64) -> bool {
    last_rep_ms.map_or(true, |last| now_ms.saturating_sub(last) > min_rep_ms)
}
