/// スカラー値のEMA平滑化フィルタ
///
/// NaN は前回値として扱わず、次の有限値をそのまま採用する
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f32,
    prev: Option<f32>,
}

impl Ema {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, prev: None }
    }

    /// 平滑化せずに次の値を計算する
    pub fn peek(&self, value: f32) -> f32 {
        match self.prev {
            Some(prev) if !prev.is_nan() => prev * (1.0 - self.alpha) + value * self.alpha,
            _ => value,
        }
    }

    pub fn apply(&mut self, value: f32) -> f32 {
        let result = self.peek(value);
        self.prev = Some(result);
        result
    }

    pub fn value(&self) -> Option<f32> {
        self.prev
    }
}
