use serde::Deserialize;
use tracing::debug;

use super::{debounced, usable, CounterUpdate, RepCounter, MIN_CONF, REARM_FRAMES};
use crate::calibration::DerivedThresholds;
use crate::signals::{FrameSignals, HandUsed, Side};
use crate::tracker::hold::{Hold, HoldRule};
use crate::tracker::smooth::Ema;

/// 頂点バンドは apex_height のこれだけ下
const APEX_MARGIN: f32 = 0.1;
/// 「立ち上がった」判定は hinge_exit のこれだけ手前
const STOOD_UP_MARGIN: f32 = 10.0;
/// 手がこれより下ならバックスイング
const BOTTOM_BAND: f32 = 0.1;

/// スイングカウンタの調整値
#[derive(Debug, Clone, Deserialize)]
pub struct SwingConfig {
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f32,
    /// カウントに必要な上向き速度（1フレームあたり）
    #[serde(default = "default_velocity_enter")]
    pub velocity_enter: f32,
    /// この角度より深くヒンジしたらアクティブ手を解除
    #[serde(default = "default_hinge_reset")]
    pub hinge_reset: f32,
    /// アクティブ手が停止しているとみなす速度（1フレームあたり）
    #[serde(default = "default_idle_velocity")]
    pub idle_velocity: f32,
    /// 最後のレップからこの時間が経つとアクティブ手は古いとみなす
    #[serde(default = "default_active_timeout_ms")]
    pub active_timeout_ms: u64,
}

fn default_ema_alpha() -> f32 { 0.35 }
fn default_velocity_enter() -> f32 { 0.004 }
fn default_hinge_reset() -> f32 { 150.0 }
fn default_idle_velocity() -> f32 { 0.0005 }
fn default_active_timeout_ms() -> u64 { 1500 }

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            ema_alpha: default_ema_alpha(),
            velocity_enter: default_velocity_enter(),
            hinge_reset: default_hinge_reset(),
            idle_velocity: default_idle_velocity(),
            active_timeout_ms: default_active_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingPhase {
    Backswing,
    Upswing,
    Top,
}

impl SwingPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SwingPhase::Backswing => "backswing",
            SwingPhase::Upswing => "upswing",
            SwingPhase::Top => "top",
        }
    }
}

/// 片手ごとの状態
#[derive(Debug, Clone)]
struct HandState {
    height: Ema,
    /// 前回カウント後、リセットバンドまで下がったか
    ready: bool,
    ready_hold: Hold,
    release_hold: Hold,
}

impl HandState {
    fn new(alpha: f32) -> Self {
        Self { height: Ema::new(alpha), ready: true, ready_hold: Hold::Idle, release_hold: Hold::Idle }
    }
}

/// 両手スイングのカウンタ
///
/// 一度カウントした手を「アクティブ手」としてロックし、その手が下がるまで
/// もう一方の手の通過を無視する。両手持ちで1レップを2回数えないため。
pub struct SwingRepCounter {
    thresholds: DerivedThresholds,
    config: SwingConfig,
    count: u32,
    phase: SwingPhase,
    last_rep_ms: Option<u64>,
    hip_angle: Ema,
    hands: [HandState; 2],
    active: Option<Side>,
}

impl SwingRepCounter {
    pub fn new(thresholds: DerivedThresholds) -> Self {
        Self::with_config(thresholds, SwingConfig::default())
    }

    pub fn with_config(thresholds: DerivedThresholds, config: SwingConfig) -> Self {
        let alpha = config.ema_alpha;
        Self {
            thresholds,
            config,
            count: 0,
            phase: SwingPhase::Backswing,
            last_rep_ms: None,
            hip_angle: Ema::new(alpha),
            hands: [HandState::new(alpha), HandState::new(alpha)],
            active: None,
        }
    }

    pub fn phase(&self) -> SwingPhase {
        self.phase
    }
}

impl RepCounter for SwingRepCounter {
    fn name(&self) -> &'static str {
        "swing"
    }

    fn reset(&mut self) {
        let alpha = self.config.ema_alpha;
        self.count = 0;
        self.phase = SwingPhase::Backswing;
        self.last_rep_ms = None;
        self.hip_angle = Ema::new(alpha);
        self.hands = [HandState::new(alpha), HandState::new(alpha)];
        self.active = None;
    }

    fn update(&mut self, signals: &FrameSignals, now_ms: u64) -> Option<CounterUpdate> {
        if !usable(signals) {
            return None;
        }

        let hip = self.hip_angle.apply(signals.hip_angle);
        let t = self.thresholds;
        let apex_band = t.apex_height - APEX_MARGIN;
        let stood_up = hip > t.hinge_exit - STOOD_UP_MARGIN;
        let reset_band = t.reset_height.max(BOTTOM_BAND);
        let rearm_rule = HoldRule::frames(REARM_FRAMES);
        let mut feedback = None;

        for hand in &signals.hands {
            if !hand.hand_height_hip.is_finite() {
                continue;
            }
            let side = hand.side;
            let state = &mut self.hands[side.index()];
            let prev = state.height.value().unwrap_or(hand.hand_height_hip);
            let smoothed = state.height.apply(hand.hand_height_hip);
            let velocity = smoothed - prev;
            let crossed_apex = prev < apex_band && smoothed >= apex_band;

            state.ready_hold.observe(smoothed < reset_band, now_ms);
            if state.ready_hold.reached(rearm_rule, now_ms) {
                state.ready = true;
            }

            let can_count = state.ready
                && crossed_apex
                && velocity > self.config.velocity_enter
                && stood_up
                && hand.confidence > MIN_CONF
                && debounced(self.last_rep_ms, now_ms, t.min_rep_ms);

            let active_stale = self.active.is_some()
                && self
                    .last_rep_ms
                    .map_or(true, |last| now_ms.saturating_sub(last) > self.config.active_timeout_ms);

            if self.active.is_none() || (active_stale && self.active != Some(side)) {
                if can_count {
                    self.count += 1;
                    self.last_rep_ms = Some(now_ms);
                    self.phase = SwingPhase::Top;
                    self.active = Some(side);
                    state.ready = false;
                    state.ready_hold.clear();
                    state.release_hold.clear();
                    feedback = Some("Rep counted");
                    debug!(count = self.count, side = side.name(), ts = now_ms, "swing rep counted");
                } else if smoothed < BOTTOM_BAND {
                    self.phase = SwingPhase::Backswing;
                } else {
                    self.phase = SwingPhase::Upswing;
                }
            } else if self.active == Some(side) {
                // アクティブ手が下がる・ヒンジする・止まるのを待つ
                let hand_reset = smoothed < reset_band;
                let hinge_reset = hip < self.config.hinge_reset;
                let idle = velocity.abs() < self.config.idle_velocity && active_stale;
                let releasing = hand_reset || hinge_reset || idle;

                state.release_hold.observe(releasing, now_ms);
                if state.release_hold.reached(rearm_rule, now_ms) {
                    self.active = None;
                    self.phase = SwingPhase::Backswing;
                    state.release_hold.clear();
                    state.ready = hand_reset;
                } else if !releasing {
                    self.phase = SwingPhase::Top;
                }
            }
        }

        Some(CounterUpdate { count: self.count, state: self.phase.label(), feedback })
    }

    fn count(&self) -> u32 {
        self.count
    }

    fn active_hand(&self) -> Option<HandUsed> {
        self.active.map(HandUsed::from)
    }
}
