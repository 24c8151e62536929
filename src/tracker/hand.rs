use serde::{Deserialize, Serialize};
use tracing::debug;

use super::hold::{Hold, HoldRule};
use crate::pose::{Keypoint, KeypointIndex, Pose};
use crate::signals::{HandMode, HandUsed, Side};

/// 左右それぞれのスコア (0.0〜1.0)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HandScores {
    pub left: f32,
    pub right: f32,
}

impl HandScores {
    pub fn get(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HandSelection {
    pub active: Option<HandUsed>,
    pub scores: HandScores,
}

/// ヒステリシスのパラメータ。フレーム数はホールドタイマーに変換して使う
#[derive(Debug, Clone, Deserialize)]
pub struct HandTrackerConfig {
    /// 取得に必要なスコア
    #[serde(default = "default_enter")]
    pub enter: f32,
    /// これを下回り続けたら解除
    #[serde(default = "default_exit")]
    pub exit: f32,
    #[serde(default = "default_switch_hold")]
    pub switch_hold: u32,
    #[serde(default = "default_lockout_switch_hold")]
    pub lockout_switch_hold: u32,
    #[serde(default = "default_switch_lead")]
    pub switch_lead: f32,
    #[serde(default = "default_lockout_switch_lead")]
    pub lockout_switch_lead: f32,
    #[serde(default = "default_drop_hold")]
    pub drop_hold: u32,
    #[serde(default = "default_rest_hold")]
    pub rest_hold: u32,
    #[serde(default = "default_rest_thresh")]
    pub rest_thresh: f32,
    /// 取得・切替直後に切替を抑制するフレーム数
    #[serde(default = "default_stick_frames")]
    pub stick_frames: u32,
    /// 手が肩より上にある側へのボーナス
    #[serde(default = "default_height_bias")]
    pub height_bias: f32,
}

fn default_enter() -> f32 { 0.45 }
fn default_exit() -> f32 { 0.25 }
fn default_switch_hold() -> u32 { 6 }
fn default_lockout_switch_hold() -> u32 { 12 }
fn default_switch_lead() -> f32 { 0.07 }
fn default_lockout_switch_lead() -> f32 { 0.14 }
fn default_drop_hold() -> u32 { 10 }
fn default_rest_hold() -> u32 { 24 }
fn default_rest_thresh() -> f32 { 0.2 }
fn default_stick_frames() -> u32 { 20 }
fn default_height_bias() -> f32 { 0.12 }

impl Default for HandTrackerConfig {
    fn default() -> Self {
        Self {
            enter: default_enter(),
            exit: default_exit(),
            switch_hold: default_switch_hold(),
            lockout_switch_hold: default_lockout_switch_hold(),
            switch_lead: default_switch_lead(),
            lockout_switch_lead: default_lockout_switch_lead(),
            drop_hold: default_drop_hold(),
            rest_hold: default_rest_hold(),
            rest_thresh: default_rest_thresh(),
            stick_frames: default_stick_frames(),
            height_bias: default_height_bias(),
        }
    }
}

/// 手首・肘・肩の重み付き平均 + 肩より上ならボーナス
fn score_side(pose: &Pose, side: Side, height_bias: f32) -> f32 {
    let (wrist, elbow, shoulder) = match side {
        Side::Left => (KeypointIndex::LeftWrist, KeypointIndex::LeftElbow, KeypointIndex::LeftShoulder),
        Side::Right => (KeypointIndex::RightWrist, KeypointIndex::RightElbow, KeypointIndex::RightShoulder),
    };
    let wrist = pose.present(wrist);
    let elbow = pose.present(elbow);
    let shoulder = pose.present(shoulder);

    let parts: [(Option<&Keypoint>, f32); 3] = [(wrist, 1.0), (elbow, 0.75), (shoulder, 0.6)];
    let (total, weights) = parts
        .iter()
        .filter_map(|(kp, w)| kp.map(|k| (k.confidence * w, *w)))
        .fold((0.0, 0.0), |(t, ws), (v, w)| (t + v, ws + w));
    let base = if weights > 0.0 { total / weights } else { 0.0 };

    let hand_y = wrist.or(elbow).or(shoulder).map(|k| k.y);
    let bias = match (shoulder, hand_y) {
        (Some(s), Some(y)) if y < s.y => height_bias,
        _ => 0.0,
    };

    (base + bias).clamp(0.0, 1.0)
}

/// どちらの手を追跡対象にするかをヒステリシス付きで決める
pub struct HandTracker {
    config: HandTrackerConfig,
    active: Option<Side>,
    stick: Hold,
    other_high: Hold,
    both_low: Hold,
    rest: Hold,
}

impl HandTracker {
    pub fn new(config: HandTrackerConfig) -> Self {
        Self {
            config,
            active: None,
            stick: Hold::Idle,
            other_high: Hold::Idle,
            both_low: Hold::Idle,
            rest: Hold::Idle,
        }
    }

    pub fn active(&self) -> Option<Side> {
        self.active
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.stick.clear();
        self.other_high.clear();
        self.both_low.clear();
        self.rest.clear();
    }

    fn acquire(&mut self, side: Side, now_ms: u64) {
        if self.active != Some(side) {
            debug!(side = side.name(), "hand acquired");
        }
        self.active = Some(side);
        self.stick.restart(now_ms);
    }

    pub fn update(&mut self, pose: &Pose, mode: HandMode, locked: Option<HandUsed>, now_ms: u64) -> HandSelection {
        let scores = HandScores {
            left: score_side(pose, Side::Left, self.config.height_bias),
            right: score_side(pose, Side::Right, self.config.height_bias),
        };

        // 両手種目は追跡不要
        if mode == HandMode::Both || locked == Some(HandUsed::Both) {
            self.reset();
            return HandSelection { active: Some(HandUsed::Both), scores };
        }

        let best = if scores.left >= scores.right { Side::Left } else { Side::Right };
        let best_score = scores.get(best);
        let lockout = mode == HandMode::Lockout;
        let cfg = &self.config;
        let stick_rule = HoldRule::frames(cfg.stick_frames);
        let switch_rule = HoldRule::frames(if lockout { cfg.lockout_switch_hold } else { cfg.switch_hold });
        let switch_lead = if lockout { cfg.lockout_switch_lead } else { cfg.switch_lead };
        let drop_rule = HoldRule::frames(cfg.drop_hold);
        let rest_rule = HoldRule::frames(cfg.rest_hold);
        let (enter, exit, rest_thresh) = (cfg.enter, cfg.exit, cfg.rest_thresh);

        // 外部ロックを優先
        match locked {
            Some(HandUsed::Left) => self.acquire(Side::Left, now_ms),
            Some(HandUsed::Right) => self.acquire(Side::Right, now_ms),
            _ => {}
        }

        if self.active.is_none() && best_score >= enter {
            self.acquire(best, now_ms);
        }

        if let Some(current) = self.active {
            let other = current.other();
            self.stick.observe(true, now_ms);

            if self.stick.reached(stick_rule, now_ms) {
                let ahead_by = scores.get(other) - scores.get(current);
                let leading = ahead_by > switch_lead && scores.get(other) >= enter;
                self.other_high.observe(leading, now_ms);
                if self.other_high.reached(switch_rule, now_ms) {
                    debug!(from = current.name(), to = other.name(), "hand switched");
                    self.acquire(other, now_ms);
                    self.other_high.clear();
                    self.both_low.clear();
                }
            }
        }

        // 両手とも低い状態が続いたら解除
        self.both_low.observe(scores.left < exit && scores.right < exit, now_ms);
        if self.both_low.reached(drop_rule, now_ms) && self.active.is_some() {
            debug!("hand dropped");
            self.active = None;
            self.other_high.clear();
            self.stick.clear();
        }

        if self.active.is_none() && best_score >= enter {
            self.acquire(best, now_ms);
        }

        // 長時間見えなければ休憩扱いで全リセット
        self.rest.observe(scores.left < rest_thresh && scores.right < rest_thresh, now_ms);
        if self.rest.reached(rest_rule, now_ms) {
            self.reset();
        }

        HandSelection {
            active: self.active.map(HandUsed::from),
            scores,
        }
    }
}

impl Default for HandTracker {
    fn default() -> Self {
        Self::new(HandTrackerConfig::default())
    }
}
