use serde::{Deserialize, Serialize};

/// キーポイントを「存在する」とみなす最低信頼度
///
/// これ未満は遮蔽・未検出として扱う
pub const PRESENT_THRESHOLD: f32 = 0.1;

/// MoveNet の 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Keypoint {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0, 下向き正)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

/// 17キーポイントからなる姿勢
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl Pose {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { keypoints }
    }

    /// `[x, y, confidence]` の行から作成。足りない行は信頼度0
    pub fn from_rows(rows: &[[f32; 3]]) -> Self {
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for (kp, row) in keypoints.iter_mut().zip(rows) {
            *kp = Keypoint::new(row[0], row[1], row[2]);
        }
        Self { keypoints }
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    /// 検出されているキーポイントのみ返す
    pub fn present(&self, index: KeypointIndex) -> Option<&Keypoint> {
        let kp = self.get(index);
        kp.is_valid(PRESENT_THRESHOLD).then_some(kp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_index_count() {
        assert_eq!(KeypointIndex::COUNT, 17);
    }

    #[test]
    fn test_keypoint_is_valid() {
        let kp = Keypoint::new(0.5, 0.5, 0.7);
        assert!(kp.is_valid(0.5));
        assert!(!kp.is_valid(0.8));
    }

    #[test]
    fn test_pose_present_hides_occluded() {
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        keypoints[KeypointIndex::Nose as usize] = Keypoint::new(0.5, 0.3, 0.9);
        keypoints[KeypointIndex::LeftWrist as usize] = Keypoint::new(0.4, 0.6, 0.05);

        let pose = Pose::new(keypoints);
        assert!(pose.present(KeypointIndex::Nose).is_some());
        assert!(pose.present(KeypointIndex::LeftWrist).is_none());
        assert!(pose.present(KeypointIndex::RightWrist).is_none());
    }

    #[test]
    fn test_pose_from_rows_pads_missing() {
        let pose = Pose::from_rows(&[[0.5, 0.3, 0.9], [0.4, 0.2, 0.8]]);
        assert_eq!(pose.get(KeypointIndex::Nose).x, 0.5);
        assert_eq!(pose.get(KeypointIndex::LeftEye).confidence, 0.8);
        assert_eq!(pose.get(KeypointIndex::RightAnkle).confidence, 0.0);
    }
}
