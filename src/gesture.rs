//! Hold-to-confirm posture gestures used for hands-free mode switching.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::DerivedThresholds;
use crate::signals::{FrameSignals, HandSignal, Side};
use crate::tracker::hold::{Hold, HoldRule};

/// これ未満の信頼度のフレームは「ニュートラル」扱い
const MIN_CONF: f32 = 0.25;
/// 静止判定の速度上限（胴体長 / ms）
const MAX_VEL: f32 = 0.006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureId {
    Reset,
    SwingMode,
    LockoutMode,
}

impl GestureId {
    pub fn name(&self) -> &'static str {
        match self {
            GestureId::Reset => "reset",
            GestureId::SwingMode => "swing_mode",
            GestureId::LockoutMode => "lockout_mode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GestureEvent {
    pub id: GestureId,
    pub ts: u64,
}

type Velocities = [f32; 2];
type GestureCheck = fn(&FrameSignals, &DerivedThresholds, &Velocities) -> bool;

struct Gesture {
    id: GestureId,
    hold_ms: u64,
    cooldown_ms: u64,
    check: GestureCheck,
    hold: Hold,
    last_trigger: Option<u64>,
}

impl Gesture {
    fn new(id: GestureId, hold_ms: u64, cooldown_ms: u64, check: GestureCheck) -> Self {
        Self { id, hold_ms, cooldown_ms, check, hold: Hold::Idle, last_trigger: None }
    }

    fn cooling_down(&self, now_ms: u64) -> bool {
        self.last_trigger
            .is_some_and(|t| now_ms.saturating_sub(t) < self.cooldown_ms)
    }
}

/// 3つのジェスチャーを独立に判定するエンジン
pub struct GestureEngine {
    gestures: [Gesture; 3],
    last_heights: [Option<f32>; 2],
    last_ts: Option<u64>,
}

impl GestureEngine {
    pub fn new() -> Self {
        Self {
            gestures: [
                Gesture::new(GestureId::Reset, 900, 2000, is_t_pose_reset),
                Gesture::new(GestureId::SwingMode, 1000, 2000, is_swing_park),
                Gesture::new(GestureId::LockoutMode, 1000, 2000, is_lockout_hold),
            ],
            last_heights: [None; 2],
            last_ts: None,
        }
    }

    pub fn reset(&mut self) {
        for g in &mut self.gestures {
            g.hold.clear();
            g.last_trigger = None;
        }
        self.last_heights = [None; 2];
        self.last_ts = None;
    }

    /// このフレームで新たに成立したジェスチャーを返す
    pub fn update(&mut self, frame: &FrameSignals, thresholds: &DerivedThresholds, now_ms: u64) -> Vec<GestureEvent> {
        if !frame.hip_angle.is_finite() || frame.confidence < MIN_CONF {
            self.update_history(frame, now_ms);
            return Vec::new();
        }

        let velocities = self.compute_velocities(frame, now_ms);
        let mut events = Vec::new();

        for g in &mut self.gestures {
            if g.cooling_down(now_ms) {
                continue;
            }

            let satisfied = (g.check)(frame, thresholds, &velocities);
            g.hold.observe(satisfied, now_ms);

            if g.hold.reached(HoldRule::millis(g.hold_ms), now_ms) {
                debug!(gesture = g.id.name(), ts = now_ms, "gesture fired");
                events.push(GestureEvent { id: g.id, ts: now_ms });
                g.last_trigger = Some(now_ms);
                g.hold.clear();
            }
        }

        self.update_history(frame, now_ms);
        events
    }

    fn update_history(&mut self, frame: &FrameSignals, now_ms: u64) {
        for hand in &frame.hands {
            if hand.hand_height_hip.is_finite() {
                self.last_heights[hand.side.index()] = Some(hand.hand_height_hip);
            }
        }
        self.last_ts = Some(now_ms);
    }

    fn compute_velocities(&self, frame: &FrameSignals, now_ms: u64) -> Velocities {
        let mut velocities = [0.0; 2];
        let Some(last_ts) = self.last_ts else {
            return velocities;
        };
        if now_ms <= last_ts {
            return velocities;
        }
        let dt = (now_ms - last_ts) as f32;
        for hand in &frame.hands {
            if let (true, Some(prev)) = (hand.hand_height_hip.is_finite(), self.last_heights[hand.side.index()]) {
                velocities[hand.side.index()] = (hand.hand_height_hip - prev).abs() / dt;
            }
        }
        velocities
    }
}

impl Default for GestureEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn slow(hand: &HandSignal, velocities: &Velocities) -> bool {
    velocities[hand.side.index()] <= MAX_VEL
}

/// 両手が揃っていて、全員が条件を満たすか
fn both_hands(frame: &FrameSignals, pred: impl Fn(&HandSignal) -> bool) -> bool {
    Side::BOTH.iter().all(|&side| {
        frame
            .hand(side)
            .is_some_and(|h| h.confidence >= MIN_CONF && pred(h))
    })
}

/// Tポーズ: 両手が肩の高さ、肘伸展、直立、静止
fn is_t_pose_reset(frame: &FrameSignals, t: &DerivedThresholds, v: &Velocities) -> bool {
    let upright = frame.hip_angle > t.hinge_exit - 12.0;
    upright
        && both_hands(frame, |h| {
            h.hand_above_shoulder.is_finite()
                && h.hand_above_head.is_finite()
                && h.elbow_angle.is_finite()
                && h.hand_above_shoulder > -0.16
                && h.hand_above_shoulder < 0.16
                && h.hand_above_head < 0.08
                && h.elbow_angle > 150.0
                && slow(h, v)
        })
}

/// スイングパーク: ヒンジした状態で両手を腰より下に静止
fn is_swing_park(frame: &FrameSignals, t: &DerivedThresholds, v: &Velocities) -> bool {
    let hinged = frame.hip_angle < t.hinge_exit - 15.0;
    hinged
        && both_hands(frame, |h| {
            h.hand_height_hip.is_finite()
                && h.elbow_angle.is_finite()
                && h.hand_height_hip < -0.35
                && h.elbow_angle > 140.0
                && slow(h, v)
        })
}

/// 両手頭上ロックアウトで静止
fn is_lockout_hold(frame: &FrameSignals, t: &DerivedThresholds, v: &Velocities) -> bool {
    let upright = frame.hip_angle > t.hinge_exit - 5.0;
    upright
        && both_hands(frame, |h| {
            h.hand_above_head.is_finite()
                && h.elbow_angle.is_finite()
                && h.hand_above_head > 0.45
                && h.elbow_angle > 150.0
                && slow(h, v)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{default_calibration, thresholds_from_calibration};

    fn thresholds() -> DerivedThresholds {
        thresholds_from_calibration(&default_calibration())
    }

    fn frame(hip_angle: f32, confidence: f32, hand: impl Fn(Side) -> HandSignal) -> FrameSignals {
        FrameSignals { hip_angle, confidence, hands: vec![hand(Side::Left), hand(Side::Right)] }
    }

    fn t_pose() -> FrameSignals {
        frame(175.0, 0.9, |side| HandSignal {
            side,
            hand_height_hip: 1.0,
            hand_above_shoulder: 0.0,
            hand_above_head: -0.3,
            elbow_angle: 175.0,
            confidence: 0.9,
        })
    }

    fn overhead() -> FrameSignals {
        frame(175.0, 0.9, |side| HandSignal {
            side,
            hand_height_hip: 2.0,
            hand_above_shoulder: 1.0,
            hand_above_head: 0.7,
            elbow_angle: 170.0,
            confidence: 0.9,
        })
    }

    fn parked() -> FrameSignals {
        frame(110.0, 0.9, |side| HandSignal {
            side,
            hand_height_hip: -0.5,
            hand_above_shoulder: -1.5,
            hand_above_head: -1.8,
            elbow_angle: 165.0,
            confidence: 0.9,
        })
    }

    fn neutral() -> FrameSignals {
        frame(175.0, 0.9, |side| HandSignal {
            side,
            hand_height_hip: 0.1,
            hand_above_shoulder: -0.9,
            hand_above_head: -1.2,
            elbow_angle: 178.0,
            confidence: 0.9,
        })
    }

    fn run(engine: &mut GestureEngine, f: &FrameSignals, from: u64, to: u64, step: u64) -> Vec<GestureEvent> {
        let t = thresholds();
        let mut events = Vec::new();
        let mut now = from;
        while now <= to {
            events.extend(engine.update(f, &t, now));
            now += step;
        }
        events
    }

    #[test]
    fn test_reset_fires_after_hold() {
        let mut engine = GestureEngine::new();
        assert!(run(&mut engine, &t_pose(), 0, 890, 10).is_empty());
        let events = run(&mut engine, &t_pose(), 900, 900, 10);
        assert_eq!(events, vec![GestureEvent { id: GestureId::Reset, ts: 900 }]);
    }

    #[test]
    fn test_lockout_and_swing_gestures() {
        let mut engine = GestureEngine::new();
        let events = run(&mut engine, &overhead(), 0, 1200, 20);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, GestureId::LockoutMode);

        let events = run(&mut engine, &parked(), 1220, 2500, 20);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, GestureId::SwingMode);
    }

    #[test]
    fn test_break_clears_hold() {
        let mut engine = GestureEngine::new();
        assert!(run(&mut engine, &t_pose(), 0, 800, 20).is_empty());
        assert!(run(&mut engine, &neutral(), 820, 820, 20).is_empty());
        // 840 は移動直後で速度超過、ホールドは 860 から
        assert!(run(&mut engine, &t_pose(), 840, 1740, 20).is_empty());
        assert_eq!(run(&mut engine, &t_pose(), 1760, 1760, 20).len(), 1);
    }

    #[test]
    fn test_low_confidence_is_neutral_not_broken() {
        let mut engine = GestureEngine::new();
        let t = thresholds();
        assert!(run(&mut engine, &t_pose(), 0, 500, 20).is_empty());
        let mut glitch = t_pose();
        glitch.confidence = 0.1;
        assert!(engine.update(&glitch, &t, 520).is_empty());
        // ホールドは継続している
        assert_eq!(run(&mut engine, &t_pose(), 540, 900, 20).len(), 1);
    }

    #[test]
    fn test_moving_hands_do_not_count() {
        let mut engine = GestureEngine::new();
        let t = thresholds();
        let mut now = 0;
        let mut events = Vec::new();
        for i in 0..100 {
            let mut f = t_pose();
            let offset = if i % 2 == 0 { 0.0 } else { 0.15 };
            for h in &mut f.hands {
                h.hand_height_hip += offset;
                h.hand_above_shoulder = offset - 0.07;
            }
            events.extend(engine.update(&f, &t, now));
            now += 20;
        }
        assert!(events.is_empty());
    }

    #[test]
    fn test_debounce_fires_exactly_twice() {
        let mut engine = GestureEngine::new();
        // hold + cooldown + 1ms 連続保持
        let mut events = run(&mut engine, &t_pose(), 0, 2900, 10);
        events.extend(run(&mut engine, &t_pose(), 2901, 2901, 10));
        events.extend(run(&mut engine, &neutral(), 2911, 3000, 10));
        events.extend(run(&mut engine, &t_pose(), 3010, 4500, 10));
        let resets: Vec<_> = events.iter().filter(|e| e.id == GestureId::Reset).collect();
        assert_eq!(resets.len(), 2);
        assert_eq!(resets[0].ts, 900);
        assert_eq!(resets[1].ts, 3920);
    }

    #[test]
    fn test_reset_clears_cooldown() {
        let mut engine = GestureEngine::new();
        assert_eq!(run(&mut engine, &t_pose(), 0, 900, 10).len(), 1);
        engine.reset();
        assert_eq!(run(&mut engine, &t_pose(), 1000, 1900, 10).len(), 1);
    }
}
