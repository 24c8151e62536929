use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array4, ArrayViewD};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;

use super::{Backend, EstimatorFactory, FrameBuffer, PoseEstimator};
use crate::pose::{Keypoint, KeypointIndex, Pose};

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: u32 = 192;

const INPUT_NAME: &str = "serving_default_input_0";
const OUTPUT_NAME: &str = "StatefulPartitionedCall_0";

/// MoveNet single-pose の ONNX モデルから推定器を作る
pub struct MoveNetFactory {
    model_path: PathBuf,
}

impl MoveNetFactory {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
        Self { model_path: model_path.as_ref().to_path_buf() }
    }
}

impl EstimatorFactory for MoveNetFactory {
    fn create(&self, backend: Backend) -> Result<Box<dyn PoseEstimator>> {
        let session = build_session(&self.model_path, backend)?;
        Ok(Box::new(MoveNetEstimator { session }))
    }
}

fn build_session(model_path: &Path, backend: Backend) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let builder = register_backend(builder, backend)?;
    builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {} on {}", model_path.display(), backend.name()))
}

/// 実行プロバイダを登録する。登録に失敗したら CPU に黙って落ちずにエラーにする
fn register_backend(builder: SessionBuilder, backend: Backend) -> Result<SessionBuilder> {
    match backend {
        Backend::Cpu => {
            let ep = ort::execution_providers::CPUExecutionProvider::default().build().error_on_failure();
            Ok(builder.with_execution_providers([ep])?)
        }
        #[cfg(feature = "cuda")]
        Backend::Cuda => {
            let ep = ort::execution_providers::CUDAExecutionProvider::default().build().error_on_failure();
            Ok(builder.with_execution_providers([ep])?)
        }
        #[cfg(feature = "coreml")]
        Backend::CoreMl => {
            let ep = ort::execution_providers::CoreMLExecutionProvider::default().build().error_on_failure();
            Ok(builder.with_execution_providers([ep])?)
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("built without the `{}` feature", other.name()),
    }
}

struct MoveNetEstimator {
    session: Session,
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&mut self, frame: &FrameBuffer) -> Result<Vec<Pose>> {
        let input = preprocess(frame)?;
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![INPUT_NAME => input_tensor])
            .context("Inference failed")?;

        let output: ArrayViewD<f32> = outputs[OUTPUT_NAME]
            .try_extract_array()
            .context("Failed to extract output tensor")?;

        Ok(vec![decode_output(&output)?])
    }
}

/// RGB フレームを MoveNet用の入力テンソルに変換
///
/// - 192x192 にリサイズ
/// - [1, 192, 192, 3] の f32 テンソル (0.0-255.0)
pub fn preprocess(frame: &FrameBuffer) -> Result<Array4<f32>> {
    let image = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
        .context("Frame buffer does not match its dimensions")?;
    let resized = imageops::resize(&image, MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE, FilterType::Triangle);

    let size = MOVENET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
        }
    }
    Ok(tensor)
}

/// MoveNet の出力 [1, 1, 17, 3] (y, x, confidence) を Pose にする
pub fn decode_output(output: &ArrayViewD<f32>) -> Result<Pose> {
    ensure!(
        output.shape() == &[1, 1, KeypointIndex::COUNT, 3][..],
        "unexpected MoveNet output shape {:?}",
        output.shape()
    );

    let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
    for (i, kp) in keypoints.iter_mut().enumerate() {
        let y = output[[0, 0, i, 0]];
        let x = output[[0, 0, i, 1]];
        let confidence = output[[0, 0, i, 2]];
        *kp = Keypoint::new(x, y, confidence);
    }
    Ok(Pose::new(keypoints))
}
