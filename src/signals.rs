//! Per-frame geometric signals.
//!
//! All heights are torso-normalized and "up" is positive, so the values stay
//! comparable across camera distances. Missing geometry shows up as `NaN`;
//! extraction itself never fails.

use serde::{Deserialize, Serialize};

use crate::pose::{Keypoint, KeypointIndex, Pose};

/// 胴体長の下限（正規化座標）。退化した姿勢でのゼロ除算防止
const MIN_TORSO: f32 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    fn joints(self) -> (KeypointIndex, KeypointIndex, KeypointIndex) {
        match self {
            Side::Left => (KeypointIndex::LeftShoulder, KeypointIndex::LeftElbow, KeypointIndex::LeftWrist),
            Side::Right => (KeypointIndex::RightShoulder, KeypointIndex::RightElbow, KeypointIndex::RightWrist),
        }
    }
}

/// 左右どちらか、または両手
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandUsed {
    Left,
    Right,
    Both,
}

impl From<Side> for HandUsed {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => HandUsed::Left,
            Side::Right => HandUsed::Right,
        }
    }
}

/// 種目ごとの手の選び方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandMode {
    Left,
    Right,
    #[default]
    Auto,
    Both,
    Highest,
    Lockout,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HandSignal {
    pub side: Side,
    pub hand_height_hip: f32,
    pub hand_above_shoulder: f32,
    pub hand_above_head: f32,
    pub elbow_angle: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSignals {
    pub hip_angle: f32,
    pub confidence: f32,
    pub hands: Vec<HandSignal>,
}

impl FrameSignals {
    pub fn hand(&self, side: Side) -> Option<&HandSignal> {
        self.hands.iter().find(|h| h.side == side)
    }
}

/// 選択した片手（または両手平均）から見たシグナル
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionSignals {
    pub hip_angle: f32,
    pub hand_height_hip: f32,
    pub hand_above_shoulder: f32,
    pub hand_above_head: f32,
    pub elbow_angle: f32,
    pub confidence: f32,
    pub hand_used: HandUsed,
}

fn distance(a: Option<&Keypoint>, b: Option<&Keypoint>) -> f32 {
    match (a, b) {
        (Some(a), Some(b)) => ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt(),
        _ => 0.0,
    }
}

/// 3点 a-b-c の b における角度（度）。欠損・退化時は NaN
pub fn angle_deg(a: Option<&Keypoint>, b: Option<&Keypoint>, c: Option<&Keypoint>) -> f32 {
    let (Some(a), Some(b), Some(c)) = (a, b, c) else {
        return f32::NAN;
    };
    let ab = (a.x - b.x, a.y - b.y);
    let cb = (c.x - b.x, c.y - b.y);
    let dot = ab.0 * cb.0 + ab.1 * cb.1;
    let mag = ((ab.0 * ab.0 + ab.1 * ab.1) * (cb.0 * cb.0 + cb.1 * cb.1)).sqrt();
    if mag == 0.0 {
        return f32::NAN;
    }
    (dot / mag).clamp(-1.0, 1.0).acos().to_degrees()
}

fn average_point(a: Option<&Keypoint>, b: Option<&Keypoint>) -> Option<Keypoint> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Keypoint::new(
            (a.x + b.x) / 2.0,
            (a.y + b.y) / 2.0,
            (a.confidence + b.confidence) / 2.0,
        )),
        (Some(p), None) | (None, Some(p)) => Some(*p),
        (None, None) => None,
    }
}

fn average_score(a: Option<&Keypoint>, b: Option<&Keypoint>) -> f32 {
    match (a, b) {
        (Some(a), Some(b)) => (a.confidence + b.confidence) / 2.0,
        (Some(p), None) | (None, Some(p)) => p.confidence,
        (None, None) => 0.0,
    }
}

fn mean_finite(values: &[f32]) -> f32 {
    let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        f32::NAN
    } else {
        finite.iter().sum::<f32>() / finite.len() as f32
    }
}

/// 1フレーム分の共通ジオメトリ
struct BodyFrame<'a> {
    pose: &'a Pose,
    torso: f32,
    hips: Option<Keypoint>,
    shoulders: Option<Keypoint>,
    head: Option<Keypoint>,
    hip_score: f32,
    shoulder_score: f32,
    hip_angle: f32,
}

impl<'a> BodyFrame<'a> {
    fn new(pose: &'a Pose) -> Self {
        use KeypointIndex::*;
        let p = |i| pose.present(i);

        let torso_left = distance(p(LeftShoulder), p(LeftHip));
        let torso_right = distance(p(RightShoulder), p(RightHip));
        let torso = ((torso_left + torso_right) / 2.0).max(MIN_TORSO);

        let eyes = average_point(p(LeftEye), p(RightEye));
        let hip_angle = mean_finite(&[
            angle_deg(p(LeftShoulder), p(LeftHip), p(LeftKnee)),
            angle_deg(p(RightShoulder), p(RightHip), p(RightKnee)),
        ]);

        Self {
            pose,
            torso,
            hips: average_point(p(LeftHip), p(RightHip)),
            shoulders: average_point(p(LeftShoulder), p(RightShoulder)),
            head: average_point(p(Nose), eyes.as_ref()),
            hip_score: average_score(p(LeftHip), p(RightHip)),
            shoulder_score: average_score(p(LeftShoulder), p(RightShoulder)),
            hip_angle,
        }
    }

    /// (hip相対, 肩相対, 頭相対) の高さ
    fn heights(&self, hand: Option<&Keypoint>) -> (f32, f32, f32) {
        let rel = |reference: Option<Keypoint>| match (hand, reference) {
            (Some(hand), Some(r)) => (r.y - hand.y) / self.torso,
            _ => f32::NAN,
        };
        (rel(self.hips), rel(self.shoulders), rel(self.head))
    }

    fn hand(&self, side: Side) -> HandSignal {
        let (s, e, w) = side.joints();
        let shoulder = self.pose.present(s);
        let elbow = self.pose.present(e);
        let wrist = self.pose.present(w);

        // 手首が隠れていたら肘、さらに肩で代用
        let hand_point = wrist.or(elbow).or(shoulder);
        let (hand_height_hip, hand_above_shoulder, hand_above_head) = self.heights(hand_point);

        let mut elbow_angle = angle_deg(shoulder, elbow, wrist);
        if !elbow_angle.is_finite() && shoulder.is_some() && elbow.is_some() {
            // 手首欠損は腕を伸ばしているとみなす
            elbow_angle = 180.0;
        }

        let hand_score = hand_point.map_or(0.0, |k| k.confidence);
        HandSignal {
            side,
            hand_height_hip,
            hand_above_shoulder,
            hand_above_head,
            elbow_angle,
            confidence: hand_score.min(self.shoulder_score),
        }
    }
}

/// 姿勢から両手分のフレームシグナルを抽出
pub fn extract_frame_signals(pose: &Pose) -> FrameSignals {
    let body = BodyFrame::new(pose);
    FrameSignals {
        hip_angle: body.hip_angle,
        confidence: body.hip_score.min(body.shoulder_score),
        hands: Side::BOTH.iter().map(|&side| body.hand(side)).collect(),
    }
}

/// 左右のキーポイントから1点を選ぶ
fn choose_point(
    left: Option<&Keypoint>,
    right: Option<&Keypoint>,
    mode: HandMode,
    forced: Option<HandUsed>,
) -> (Option<Keypoint>, HandUsed) {
    let by_confidence = || {
        let ls = left.map_or(0.0, |k| k.confidence);
        let rs = right.map_or(0.0, |k| k.confidence);
        if ls >= rs {
            (left.copied(), HandUsed::Left)
        } else {
            (right.copied(), HandUsed::Right)
        }
    };

    match forced {
        Some(HandUsed::Both) => match (left, right) {
            (Some(_), Some(_)) => return (average_point(left, right), HandUsed::Both),
            (Some(l), None) => return (Some(*l), HandUsed::Left),
            (None, Some(r)) => return (Some(*r), HandUsed::Right),
            (None, None) => {}
        },
        Some(HandUsed::Left) => return (left.copied(), HandUsed::Left),
        Some(HandUsed::Right) => return (right.copied(), HandUsed::Right),
        None => {}
    }

    match mode {
        HandMode::Left => (left.copied(), HandUsed::Left),
        HandMode::Right => (right.copied(), HandUsed::Right),
        HandMode::Both => match (left, right) {
            (Some(_), Some(_)) => (average_point(left, right), HandUsed::Both),
            _ => by_confidence(),
        },
        HandMode::Highest => {
            // 画像座標はyが小さいほど上
            let ly = left.map_or(f32::INFINITY, |k| k.y);
            let ry = right.map_or(f32::INFINITY, |k| k.y);
            if left.is_none() && right.is_none() {
                (None, HandUsed::Left)
            } else if ly <= ry {
                (left.copied(), HandUsed::Left)
            } else {
                (right.copied(), HandUsed::Right)
            }
        }
        HandMode::Lockout | HandMode::Auto => by_confidence(),
    }
}

/// `HandMode` に従って片手分のシグナルを抽出（キャリブレーション用）
pub fn extract_motion_signals(pose: &Pose, mode: HandMode, forced: Option<HandUsed>) -> MotionSignals {
    use KeypointIndex::*;
    let body = BodyFrame::new(pose);
    let p = |i| pose.present(i);

    let (wrist, wrist_used) = choose_point(p(LeftWrist), p(RightWrist), mode, forced);
    let follow = forced.or(Some(wrist_used));
    let (elbow, _) = choose_point(p(LeftElbow), p(RightElbow), mode, follow);
    let (shoulder, _) = choose_point(p(LeftShoulder), p(RightShoulder), mode, follow);

    let hand_point = wrist.or(elbow).or(shoulder);
    let (hand_height_hip, hand_above_shoulder, hand_above_head) = body.heights(hand_point.as_ref());
    let elbow_angle = angle_deg(shoulder.as_ref(), elbow.as_ref(), wrist.as_ref());
    let wrist_score = wrist.map_or(0.0, |k| k.confidence);

    MotionSignals {
        hip_angle: body.hip_angle,
        hand_height_hip,
        hand_above_shoulder,
        hand_above_head,
        elbow_angle,
        confidence: body.hip_score.min(body.shoulder_score).min(wrist_score),
        hand_used: forced.unwrap_or(wrist_used),
    }
}
