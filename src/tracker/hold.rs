use serde::{Deserialize, Serialize};

/// フレーム数ルールに付随する時間下限の基準（60fps 相当）
///
/// 高フレームレートで「Nフレーム継続」が短時間に満たされないようにする
pub const FAST_FRAME_MS: u64 = 16;

/// 「Nフレーム かつ T ミリ秒」継続すれば成立するルール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRule {
    pub frames: u32,
    pub min_ms: u64,
}

impl HoldRule {
    /// フレーム数から作成。時間下限は `(n - 1) * FAST_FRAME_MS`
    pub const fn frames(n: u32) -> Self {
        Self {
            frames: n,
            min_ms: n.saturating_sub(1) as u64 * FAST_FRAME_MS,
        }
    }

    /// 時間のみのルール（`ms` 以上）
    pub const fn millis(ms: u64) -> Self {
        Self { frames: 0, min_ms: ms }
    }

    /// 時間のみのルール（`ms` を超える）。時刻はミリ秒整数
    pub const fn longer_than(ms: u64) -> Self {
        Self { frames: 0, min_ms: ms.saturating_add(1) }
    }
}

/// 条件の継続を追跡するホールドタイマー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hold {
    #[default]
    Idle,
    Holding { since_ms: u64, frames: u32 },
}

impl Hold {
    /// 1フレーム分の観測。条件が崩れたら Idle に戻る
    pub fn observe(&mut self, active: bool, now_ms: u64) {
        *self = match (*self, active) {
            (_, false) => Hold::Idle,
            (Hold::Idle, true) => Hold::Holding { since_ms: now_ms, frames: 1 },
            (Hold::Holding { since_ms, frames }, true) => Hold::Holding {
                since_ms,
                frames: frames.saturating_add(1),
            },
        };
    }

    /// 現時刻から計測し直す（このフレームはまだ数えない）
    pub fn restart(&mut self, now_ms: u64) {
        *self = Hold::Holding { since_ms: now_ms, frames: 0 };
    }

    pub fn clear(&mut self) {
        *self = Hold::Idle;
    }

    pub fn is_holding(&self) -> bool {
        matches!(self, Hold::Holding { .. })
    }

    pub fn reached(&self, rule: HoldRule, now_ms: u64) -> bool {
        match *self {
            Hold::Idle => false,
            Hold::Holding { since_ms, frames } => {
                frames >= rule.frames && now_ms.saturating_sub(since_ms) >= rule.min_ms
            }
        }
    }
}
