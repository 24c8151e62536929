//! Consumer-side composition of the per-frame pipeline: extraction, hand
//! tracking, gestures and the active exercise's rep counter.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::{thresholds_from_calibration, Calibration, DerivedThresholds};
use crate::counter::{CounterUpdate, LockoutConfig, LockoutRepCounter, RepCounter, SwingConfig, SwingRepCounter};
use crate::gesture::{GestureEngine, GestureEvent, GestureId};
use crate::pose::Pose;
use crate::signals::{extract_frame_signals, HandMode, HandUsed};
use crate::tracker::{HandSelection, HandTracker, HandTrackerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExerciseId {
    Swing,
    Snatch,
    HalfSnatch,
    LongCycle,
    Jerk,
}

/// 動作の系統
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Swing,
    Lockout,
}

impl ExerciseId {
    pub const ALL: [ExerciseId; 5] = [
        ExerciseId::Swing,
        ExerciseId::Snatch,
        ExerciseId::HalfSnatch,
        ExerciseId::LongCycle,
        ExerciseId::Jerk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExerciseId::Swing => "swing",
            ExerciseId::Snatch => "snatch",
            ExerciseId::HalfSnatch => "half-snatch",
            ExerciseId::LongCycle => "long-cycle",
            ExerciseId::Jerk => "jerk",
        }
    }

    pub fn family(self) -> Family {
        match self {
            ExerciseId::Swing => Family::Swing,
            _ => Family::Lockout,
        }
    }

    pub fn default_hand_mode(self) -> HandMode {
        match self.family() {
            Family::Swing => HandMode::Auto,
            Family::Lockout => HandMode::Lockout,
        }
    }

    fn lockout_config(self) -> Option<LockoutConfig> {
        match self {
            ExerciseId::Swing => None,
            ExerciseId::Snatch => Some(LockoutConfig::SNATCH),
            ExerciseId::HalfSnatch => Some(LockoutConfig::HALF_SNATCH),
            ExerciseId::LongCycle => Some(LockoutConfig::LONG_CYCLE),
            ExerciseId::Jerk => Some(LockoutConfig::JERK),
        }
    }
}

impl fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExerciseId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match ExerciseId::ALL.iter().find(|id| id.name() == s) {
            Some(id) => Ok(*id),
            None => bail!(
                "unknown exercise {:?} (expected one of: {})",
                s,
                ExerciseId::ALL.map(|id| id.name()).join(", ")
            ),
        }
    }
}

/// 種目選択 UI 向けの一覧項目
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExerciseOption {
    pub id: ExerciseId,
    pub label: &'static str,
}

pub const EXERCISES: [ExerciseOption; 5] = [
    ExerciseOption { id: ExerciseId::Swing, label: "Kettlebell Swing" },
    ExerciseOption { id: ExerciseId::Snatch, label: "Snatch" },
    ExerciseOption { id: ExerciseId::HalfSnatch, label: "Half Snatch" },
    ExerciseOption { id: ExerciseId::LongCycle, label: "Long Cycle" },
    ExerciseOption { id: ExerciseId::Jerk, label: "Jerk" },
];

/// 種目に対応するカウンタを作る
pub fn create_counter(id: ExerciseId, thresholds: &DerivedThresholds, swing: &SwingConfig) -> Box<dyn RepCounter> {
    match id.lockout_config() {
        Some(config) => Box::new(LockoutRepCounter::new(config)),
        None => Box::new(SwingRepCounter::with_config(*thresholds, swing.clone())),
    }
}

/// 1フレーム分のパイプライン出力
#[derive(Debug, Clone, Serialize)]
pub struct FrameOutput {
    pub exercise: ExerciseId,
    pub selection: HandSelection,
    pub gestures: Vec<GestureEvent>,
    /// 使えないフレームでは `None`
    pub update: Option<CounterUpdate>,
}

pub struct Pipeline {
    exercise: ExerciseId,
    hand_mode: HandMode,
    /// UI から固定された手
    hand_lock: Option<HandUsed>,
    thresholds: DerivedThresholds,
    swing: SwingConfig,
    tracker: HandTracker,
    gestures: GestureEngine,
    counter: Box<dyn RepCounter>,
}

impl Pipeline {
    pub fn new(exercise: ExerciseId, calibration: &Calibration) -> Self {
        Self::with_config(exercise, calibration, HandTrackerConfig::default(), SwingConfig::default())
    }

    pub fn with_config(
        exercise: ExerciseId,
        calibration: &Calibration,
        hand_tracker: HandTrackerConfig,
        swing: SwingConfig,
    ) -> Self {
        let thresholds = thresholds_from_calibration(calibration);
        let counter = create_counter(exercise, &thresholds, &swing);
        Self {
            exercise,
            hand_mode: exercise.default_hand_mode(),
            hand_lock: None,
            thresholds,
            swing,
            tracker: HandTracker::new(hand_tracker),
            gestures: GestureEngine::new(),
            counter,
        }
    }

    pub fn exercise(&self) -> ExerciseId {
        self.exercise
    }

    pub fn hand_mode(&self) -> HandMode {
        self.hand_mode
    }

    pub fn thresholds(&self) -> &DerivedThresholds {
        &self.thresholds
    }

    pub fn counter(&self) -> &dyn RepCounter {
        self.counter.as_ref()
    }

    pub fn count(&self) -> u32 {
        self.counter.count()
    }

    /// 種目を切り替える。カウンタは作り直し、手の追跡もやり直す
    pub fn set_exercise(&mut self, exercise: ExerciseId) {
        info!(from = self.exercise.name(), to = exercise.name(), "exercise changed");
        self.exercise = exercise;
        self.hand_mode = exercise.default_hand_mode();
        self.counter = create_counter(exercise, &self.thresholds, &self.swing);
        self.tracker.reset();
    }

    pub fn set_hand_mode(&mut self, mode: HandMode) {
        self.hand_mode = mode;
        self.tracker.reset();
    }

    pub fn hand_lock(&self) -> Option<HandUsed> {
        self.hand_lock
    }

    /// 追跡する手を固定する。`None` で自動選択に戻す
    pub fn set_hand_lock(&mut self, lock: Option<HandUsed>) {
        self.hand_lock = lock;
        self.tracker.reset();
    }

    /// 閾値を再計算してカウンタを作り直す
    pub fn set_calibration(&mut self, calibration: &Calibration) {
        self.thresholds = thresholds_from_calibration(calibration);
        self.counter = create_counter(self.exercise, &self.thresholds, &self.swing);
    }

    pub fn reset(&mut self) {
        self.counter.reset();
        self.tracker.reset();
        self.gestures.reset();
    }

    pub fn process(&mut self, pose: &Pose, now_ms: u64) -> FrameOutput {
        let signals = extract_frame_signals(pose);
        let selection = self.tracker.update(pose, self.hand_mode, self.hand_lock, now_ms);
        let gestures = self.gestures.update(&signals, &self.thresholds, now_ms);

        for event in &gestures {
            self.apply_gesture(event);
        }

        let update = self.counter.update(&signals, now_ms);
        FrameOutput { exercise: self.exercise, selection, gestures, update }
    }

    /// ジェスチャーを反映する。リセットや種目切替の直後は、
    /// ジェスチャーの姿勢そのものをレップとして数えない
    fn apply_gesture(&mut self, event: &GestureEvent) {
        debug!(gesture = event.id.name(), ts = event.ts, "applying gesture");
        let changed = match event.id {
            GestureId::Reset => {
                self.counter.reset();
                self.tracker.reset();
                true
            }
            GestureId::SwingMode if self.exercise.family() != Family::Swing => {
                self.set_exercise(ExerciseId::Swing);
                true
            }
            GestureId::LockoutMode if self.exercise.family() == Family::Swing => {
                self.set_exercise(ExerciseId::Snatch);
                true
            }
            _ => false,
        };
        if changed {
            self.counter.require_rearm();
        }
    }
}
