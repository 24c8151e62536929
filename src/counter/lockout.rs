use tracing::debug;

use super::{debounced, usable, CounterUpdate, RepCounter, MIN_CONF, REARM_FRAMES};
use crate::signals::{FrameSignals, HandSignal, HandUsed, Side};
use crate::tracker::hold::{Hold, HoldRule};

/// 次のレップを受け付ける姿勢
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rearm {
    /// 手が肩から `low_band` 未満まで下りた
    BelowBand,
    /// ラック位置（肩の少し上）に戻った
    RackBand { min: f32, max: f32 },
}

/// ロックアウト系種目ごとの定数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockoutConfig {
    pub name: &'static str,
    pub low_band: f32,
    pub head_thresh: f32,
    pub hold_ms: u64,
    pub min_rep_ms: u64,
    pub rearm: Rearm,
}

impl LockoutConfig {
    pub const SNATCH: LockoutConfig = LockoutConfig {
        name: "snatch",
        low_band: 0.28,
        head_thresh: 0.5,
        hold_ms: 100,
        min_rep_ms: 400,
        rearm: Rearm::BelowBand,
    };

    pub const HALF_SNATCH: LockoutConfig = LockoutConfig {
        name: "half-snatch",
        low_band: 0.25,
        head_thresh: 0.5,
        hold_ms: 100,
        min_rep_ms: 400,
        rearm: Rearm::BelowBand,
    };

    pub const LONG_CYCLE: LockoutConfig = LockoutConfig {
        name: "long-cycle",
        low_band: 0.30,
        head_thresh: 0.5,
        hold_ms: 100,
        min_rep_ms: 500,
        rearm: Rearm::BelowBand,
    };

    pub const JERK: LockoutConfig = LockoutConfig {
        name: "jerk",
        low_band: 0.15,
        head_thresh: 0.5,
        hold_ms: 100,
        min_rep_ms: 400,
        rearm: Rearm::RackBand { min: 0.05, max: 0.9 },
    };

    fn rearmed(&self, hand: &HandSignal) -> bool {
        match self.rearm {
            Rearm::BelowBand => hand.hand_above_shoulder < self.low_band,
            Rearm::RackBand { min, max } => {
                hand.hand_above_shoulder > min && hand.hand_above_shoulder < max
            }
        }
    }

    fn in_lockout(&self, hand: &HandSignal) -> bool {
        hand.hand_above_head > self.head_thresh && hand.confidence > MIN_CONF
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutPhase {
    Ready,
    Lockout,
    Counted,
}

impl LockoutPhase {
    pub fn label(&self) -> &'static str {
        match self {
            LockoutPhase::Ready => "ready",
            LockoutPhase::Lockout => "lockout",
            LockoutPhase::Counted => "counted",
        }
    }
}

fn well_formed(hand: &HandSignal) -> bool {
    hand.hand_above_head.is_finite()
        && hand.hand_above_shoulder.is_finite()
        && hand.elbow_angle.is_finite()
}

/// 片手頭上ロックアウトのカウンタ（スナッチ、ジャーク等）
pub struct LockoutRepCounter {
    config: LockoutConfig,
    count: u32,
    phase: LockoutPhase,
    last_rep_ms: Option<u64>,
    lockout: [Hold; 2],
    rearm: Hold,
    active: Option<Side>,
    /// 再アームするまでロックアウトを受け付けない側
    blocked: [bool; 2],
    unblock: [Hold; 2],
}

impl LockoutRepCounter {
    pub fn new(config: LockoutConfig) -> Self {
        Self {
            config,
            count: 0,
            phase: LockoutPhase::Ready,
            last_rep_ms: None,
            lockout: [Hold::Idle; 2],
            rearm: Hold::Idle,
            active: None,
            blocked: [false; 2],
            unblock: [Hold::Idle; 2],
        }
    }

    pub fn snatch() -> Self {
        Self::new(LockoutConfig::SNATCH)
    }

    pub fn half_snatch() -> Self {
        Self::new(LockoutConfig::HALF_SNATCH)
    }

    pub fn long_cycle() -> Self {
        Self::new(LockoutConfig::LONG_CYCLE)
    }

    pub fn jerk() -> Self {
        Self::new(LockoutConfig::JERK)
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    pub fn phase(&self) -> LockoutPhase {
        self.phase
    }

    fn update_ready(&mut self, signals: &FrameSignals, now_ms: u64) -> Option<&'static str> {
        let hold_rule = HoldRule::longer_than(self.config.hold_ms);
        let mut any_holding = false;

        for side in Side::BOTH {
            let hand = signals.hand(side).filter(|h| well_formed(h));
            let i = side.index();
            let hold = &mut self.lockout[i];
            let Some(hand) = hand else {
                hold.clear();
                self.unblock[i].clear();
                continue;
            };

            if self.blocked[i] {
                hold.clear();
                self.unblock[i].observe(self.config.rearmed(hand), now_ms);
                if self.unblock[i].reached(HoldRule::frames(REARM_FRAMES), now_ms) {
                    debug!(exercise = self.config.name, side = side.name(), "side re-armed");
                    self.blocked[i] = false;
                    self.unblock[i].clear();
                }
                continue;
            }

            hold.observe(self.config.in_lockout(hand), now_ms);

            if hold.reached(hold_rule, now_ms)
                && debounced(self.last_rep_ms, now_ms, self.config.min_rep_ms)
            {
                self.count += 1;
                self.last_rep_ms = Some(now_ms);
                self.active = Some(side);
                self.phase = LockoutPhase::Counted;
                self.lockout = [Hold::Idle; 2];
                self.rearm.clear();
                debug!(
                    exercise = self.config.name,
                    count = self.count,
                    side = side.name(),
                    ts = now_ms,
                    "lockout rep counted"
                );
                return Some("Rep counted");
            }
            any_holding |= hold.is_holding();
        }

        self.phase = if any_holding { LockoutPhase::Lockout } else { LockoutPhase::Ready };
        None
    }

    fn update_active(&mut self, side: Side, signals: &FrameSignals, now_ms: u64) {
        // アクティブでない手のロックアウト計測は持ち越さない
        self.lockout = [Hold::Idle; 2];

        let Some(hand) = signals.hand(side).filter(|h| well_formed(h)) else {
            return;
        };
        self.rearm.observe(self.config.rearmed(hand), now_ms);
        if self.rearm.reached(HoldRule::frames(REARM_FRAMES), now_ms) {
            self.active = None;
            self.phase = LockoutPhase::Ready;
            self.rearm.clear();
        }
    }
}

impl RepCounter for LockoutRepCounter {
    fn name(&self) -> &'static str {
        self.config.name
    }

    fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    fn update(&mut self, signals: &FrameSignals, now_ms: u64) -> Option<CounterUpdate> {
        if !usable(signals) {
            return None;
        }

        let feedback = match self.active {
            None => self.update_ready(signals, now_ms),
            Some(side) => {
                self.update_active(side, signals, now_ms);
                None
            }
        };

        Some(CounterUpdate { count: self.count, state: self.phase.label(), feedback })
    }

    fn require_rearm(&mut self) {
        self.active = None;
        self.phase = LockoutPhase::Ready;
        self.rearm.clear();
        self.lockout = [Hold::Idle; 2];
        self.blocked = [true; 2];
        self.unblock = [Hold::Idle; 2];
    }

    fn count(&self) -> u32 {
        self.count
    }

    fn active_hand(&self) -> Option<HandUsed> {
        self.active.map(HandUsed::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: u64 = 33;

    #[derive(Clone, Copy)]
    enum Arm {
        Low,
        Rack,
        Overhead,
    }

    fn hand(side: Side, arm: Arm) -> HandSignal {
        let (above_shoulder, above_head) = match arm {
            Arm::Low => (0.0, -0.3),
            Arm::Rack => (0.3, 0.0),
            Arm::Overhead => (1.0, 0.7),
        };
        HandSignal {
            side,
            hand_height_hip: above_shoulder + 1.0,
            hand_above_shoulder: above_shoulder,
            hand_above_head: above_head,
            elbow_angle: 170.0,
            confidence: 0.9,
        }
    }

    fn frame(left: Arm, right: Arm) -> FrameSignals {
        FrameSignals {
            hip_angle: 170.0,
            confidence: 0.9,
            hands: vec![hand(Side::Left, left), hand(Side::Right, right)],
        }
    }

    struct Driver {
        counter: LockoutRepCounter,
        now: u64,
    }

    impl Driver {
        fn new(counter: LockoutRepCounter) -> Self {
            Self { counter, now: 0 }
        }

        fn step(&mut self, f: &FrameSignals) -> Option<CounterUpdate> {
            let out = self.counter.update(f, self.now);
            self.now += FRAME_MS;
            out
        }

        fn repeat(&mut self, f: &FrameSignals, n: usize) {
            for _ in 0..n {
                self.step(f);
            }
        }
    }

    #[test]
    fn test_variant_table() {
        assert_eq!(LockoutConfig::SNATCH.low_band, 0.28);
        assert_eq!(LockoutConfig::HALF_SNATCH.low_band, 0.25);
        assert_eq!(LockoutConfig::LONG_CYCLE.min_rep_ms, 500);
        assert_eq!(LockoutConfig::JERK.low_band, 0.15);
        assert_eq!(LockoutRepCounter::half_snatch().name(), "half-snatch");
        assert_eq!(LockoutRepCounter::long_cycle().name(), "long-cycle");
    }

    #[test]
    fn test_hold_then_count() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.repeat(&frame(Arm::Low, Arm::Low), 3);
        for _ in 0..3 {
            let out = d.step(&frame(Arm::Overhead, Arm::Low)).unwrap();
            assert_eq!(out.count, 0);
            assert_eq!(out.state, "lockout");
        }
        // 4フレーム目は 99ms で hold_ms 未満
        assert_eq!(d.step(&frame(Arm::Overhead, Arm::Low)).unwrap().count, 0);
        let out = d.step(&frame(Arm::Overhead, Arm::Low)).unwrap();
        assert_eq!(out.count, 1);
        assert_eq!(out.state, "counted");
        assert_eq!(out.feedback, Some("Rep counted"));
        assert_eq!(d.counter.active_hand(), Some(HandUsed::Left));
    }

    #[test]
    fn test_five_lockouts_scenario() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.repeat(&frame(Arm::Low, Arm::Low), 3);
        for rep in 0..5 {
            d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
            assert_eq!(d.counter.count(), rep + 1);
            d.repeat(&frame(Arm::Low, Arm::Low), 2);
            assert!(d.counter.active_hand().is_some());
            d.step(&frame(Arm::Low, Arm::Low));
            assert_eq!(d.counter.active_hand(), None);
            assert_eq!(d.counter.phase(), LockoutPhase::Ready);
            d.repeat(&frame(Arm::Low, Arm::Low), 8);
        }
        assert_eq!(d.counter.count(), 5);
    }

    #[test]
    fn test_long_cycle_scenario() {
        let mut d = Driver::new(LockoutRepCounter::long_cycle());
        for _ in 0..5 {
            d.repeat(&frame(Arm::Low, Arm::Overhead), 5);
            d.repeat(&frame(Arm::Low, Arm::Low), 11);
        }
        assert_eq!(d.counter.count(), 5);
    }

    #[test]
    fn test_staying_overhead_counts_once() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.repeat(&frame(Arm::Overhead, Arm::Low), 60);
        assert_eq!(d.counter.count(), 1);
    }

    #[test]
    fn test_brief_overhead_does_not_count() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        for _ in 0..10 {
            d.repeat(&frame(Arm::Overhead, Arm::Low), 3);
            d.repeat(&frame(Arm::Low, Arm::Low), 3);
        }
        assert_eq!(d.counter.count(), 0);
    }

    #[test]
    fn test_other_hand_ignored_until_rearm() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        assert_eq!(d.counter.count(), 1);
        // 左は頭上のまま右も頭上へ
        d.repeat(&frame(Arm::Overhead, Arm::Overhead), 30);
        assert_eq!(d.counter.count(), 1);
        assert_eq!(d.counter.active_hand(), Some(HandUsed::Left));
    }

    #[test]
    fn test_hand_switch_after_rearm() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        d.repeat(&frame(Arm::Low, Arm::Low), 11);
        d.repeat(&frame(Arm::Low, Arm::Overhead), 5);
        assert_eq!(d.counter.count(), 2);
        assert_eq!(d.counter.active_hand(), Some(HandUsed::Right));
    }

    #[test]
    fn test_jerk_rearms_in_rack() {
        let mut d = Driver::new(LockoutRepCounter::jerk());
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        assert_eq!(d.counter.count(), 1);
        // 腕を下ろし切っても再アームしない
        d.repeat(&frame(Arm::Low, Arm::Low), 10);
        assert_eq!(d.counter.active_hand(), Some(HandUsed::Left));
        d.repeat(&frame(Arm::Rack, Arm::Low), 3);
        assert_eq!(d.counter.active_hand(), None);
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        assert_eq!(d.counter.count(), 2);
    }

    #[test]
    fn test_malformed_hand_ignored() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        let mut f = frame(Arm::Overhead, Arm::Low);
        f.hands[0].elbow_angle = f32::NAN;
        d.repeat(&f, 20);
        assert_eq!(d.counter.count(), 0);
        assert_eq!(d.counter.phase(), LockoutPhase::Ready);
    }

    #[test]
    fn test_low_confidence_hand_does_not_start_hold() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        let mut f = frame(Arm::Overhead, Arm::Low);
        f.hands[0].confidence = 0.2;
        d.repeat(&f, 20);
        assert_eq!(d.counter.count(), 0);
    }

    #[test]
    fn test_unusable_frame_keeps_state() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        let mut blank = frame(Arm::Low, Arm::Low);
        blank.confidence = 0.0;
        for _ in 0..20 {
            assert!(d.step(&blank).is_none());
        }
        assert_eq!(d.counter.count(), 1);
        assert_eq!(d.counter.active_hand(), Some(HandUsed::Left));
    }

    #[test]
    fn test_hold_must_exceed_hold_ms() {
        let mut counter = LockoutRepCounter::snatch();
        let up = frame(Arm::Overhead, Arm::Low);
        for now in [0, 50, 100] {
            assert_eq!(counter.update(&up, now).unwrap().count, 0);
        }
        assert_eq!(counter.update(&up, 150).unwrap().count, 1);
    }

    #[test]
    fn test_require_rearm_ignores_held_lockout() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.counter.require_rearm();
        d.repeat(&frame(Arm::Overhead, Arm::Overhead), 45);
        assert_eq!(d.counter.count(), 0);
        assert_eq!(d.counter.phase(), LockoutPhase::Ready);

        d.repeat(&frame(Arm::Low, Arm::Low), 3);
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        assert_eq!(d.counter.count(), 1);
        assert_eq!(d.counter.active_hand(), Some(HandUsed::Left));
    }

    #[test]
    fn test_require_rearm_is_per_hand() {
        let mut d = Driver::new(LockoutRepCounter::jerk());
        d.counter.require_rearm();
        // 右手は下げたまま、左手だけラックに戻す
        d.repeat(&frame(Arm::Rack, Arm::Low), 3);
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        assert_eq!(d.counter.count(), 1);

        let mut d = Driver::new(LockoutRepCounter::jerk());
        d.counter.require_rearm();
        d.repeat(&frame(Arm::Rack, Arm::Low), 3);
        // 再アームしていない右手は数えない
        d.repeat(&frame(Arm::Low, Arm::Overhead), 20);
        assert_eq!(d.counter.count(), 0);
    }

    #[test]
    fn test_reset_clears_rearm_requirement() {
        let mut d = Driver::new(LockoutRepCounter::snatch());
        d.counter.require_rearm();
        d.counter.reset();
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        assert_eq!(d.counter.count(), 1);
    }

    #[test]
    fn test_reset() {
        let mut d = Driver::new(LockoutRepCounter::jerk());
        d.repeat(&frame(Arm::Overhead, Arm::Low), 5);
        d.counter.reset();
        assert_eq!(d.counter.count(), 0);
        assert_eq!(d.counter.active_hand(), None);
        assert_eq!(d.counter.config().name, "jerk");
    }
}
