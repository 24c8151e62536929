//! Inference boundary: a worker thread owns the pose model, the consumer
//! exchanges pooled frames and decoded poses with it over channels.

pub mod client;
pub mod frame;
pub mod movenet;
pub mod worker;

pub use client::PoseClient;
pub use frame::{FrameBuffer, FramePool};
pub use movenet::MoveNetFactory;
pub use worker::{PoseEvent, PoseWorker, WorkerCommand};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::pose::Pose;

/// 推論バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cuda,
    CoreMl,
    Cpu,
}

impl Backend {
    /// 既定の試行順
    pub const PRIORITY: [Backend; 3] = [Backend::Cuda, Backend::CoreMl, Backend::Cpu];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Cuda => "cuda",
            Backend::CoreMl => "coreml",
            Backend::Cpu => "cpu",
        }
    }
}

/// 1フレームから姿勢を推定する
pub trait PoseEstimator {
    fn estimate(&mut self, frame: &FrameBuffer) -> Result<Vec<Pose>>;
}

/// バックエンドを指定して推定器を作る。ワーカースレッド上で呼ばれる
pub trait EstimatorFactory: Send {
    fn create(&self, backend: Backend) -> Result<Box<dyn PoseEstimator>>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::{bail, Result};

    use super::{Backend, EstimatorFactory, FrameBuffer, PoseEstimator};
    use crate::pose::{Keypoint, Pose};

    /// テスト用: 指定バックエンドで失敗し、`fail_frames` なら推定も失敗する
    #[derive(Clone, Default)]
    pub struct FakeFactory {
        pub failing: Vec<Backend>,
        pub fail_frames: bool,
        pub created: Arc<AtomicUsize>,
    }

    impl EstimatorFactory for FakeFactory {
        fn create(&self, backend: Backend) -> Result<Box<dyn PoseEstimator>> {
            if self.failing.contains(&backend) {
                bail!("{} unavailable", backend.name());
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeEstimator { fail: self.fail_frames }))
        }
    }

    struct FakeEstimator {
        fail: bool,
    }

    impl PoseEstimator for FakeEstimator {
        fn estimate(&mut self, frame: &FrameBuffer) -> Result<Vec<Pose>> {
            if self.fail {
                bail!("inference failed at {}", frame.ts_ms());
            }
            let mut pose = Pose::default();
            pose.keypoints[0] = Keypoint::new(0.5, 0.5, frame.data()[0] as f32 / 255.0);
            Ok(vec![pose])
        }
    }
}
