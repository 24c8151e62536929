use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{Backend, EstimatorFactory, FrameBuffer, PoseEstimator};
use crate::pose::Pose;

/// コンシューマ → ワーカー
#[derive(Debug)]
pub enum WorkerCommand {
    Init,
    Frame(FrameBuffer),
}

/// ワーカー → コンシューマ
#[derive(Debug, Clone, PartialEq)]
pub enum PoseEvent {
    Ready { backend: Backend },
    Poses { poses: Vec<Pose>, ts_ms: u64 },
    Error { message: String },
}

/// 推論スレッドのハンドル
pub struct PoseWorker {
    commands: Option<Sender<WorkerCommand>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PoseWorker {
    /// 推論スレッドを起動する。推定器は `Init` を受けるまで作らない
    pub fn spawn(
        factory: Box<dyn EstimatorFactory>,
        backends: Vec<Backend>,
        events: Sender<PoseEvent>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("pose-worker".into())
            .spawn(move || run(factory, backends, rx, events, worker_stop))
            .context("Failed to spawn pose worker thread")?;

        Ok(Self { commands: Some(tx), stop, handle: Some(handle) })
    }

    /// ワーカーが終了済みなら `false`
    pub fn send(&self, command: WorkerCommand) -> bool {
        match &self.commands {
            // 送れなかったコマンドはここで drop され、フレームはプールに戻る
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    /// 未処理のコマンドを捨ててスレッドを止める
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.commands = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("pose worker panicked");
            }
        }
    }
}

impl Drop for PoseWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn init_estimator(
    factory: &dyn EstimatorFactory,
    backends: &[Backend],
) -> Option<(Backend, Box<dyn PoseEstimator>)> {
    for &backend in backends {
        match factory.create(backend) {
            Ok(estimator) => {
                info!(backend = backend.name(), "pose estimator ready");
                return Some((backend, estimator));
            }
            Err(e) => warn!(backend = backend.name(), error = %format!("{e:#}"), "backend unavailable, trying next"),
        }
    }
    None
}

fn run(
    factory: Box<dyn EstimatorFactory>,
    backends: Vec<Backend>,
    commands: Receiver<WorkerCommand>,
    events: Sender<PoseEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut estimator: Option<Box<dyn PoseEstimator>> = None;

    while let Ok(command) = commands.recv() {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let event = match command {
            WorkerCommand::Init => {
                if estimator.is_some() {
                    debug!("pose worker already initialized");
                    continue;
                }
                match init_estimator(factory.as_ref(), &backends) {
                    Some((backend, created)) => {
                        estimator = Some(created);
                        PoseEvent::Ready { backend }
                    }
                    None => PoseEvent::Error {
                        message: format!(
                            "no usable inference backend (tried {})",
                            backends.iter().map(|b| b.name()).collect::<Vec<_>>().join(", ")
                        ),
                    },
                }
            }
            WorkerCommand::Frame(frame) => {
                let Some(estimator) = estimator.as_mut() else {
                    debug!(ts = frame.ts_ms(), "frame before init, dropped");
                    continue;
                };
                let ts_ms = frame.ts_ms();
                let result = estimator.estimate(&frame);
                drop(frame);
                match result {
                    Ok(poses) => PoseEvent::Poses { poses, ts_ms },
                    Err(e) => {
                        warn!(ts = ts_ms, error = %format!("{e:#}"), "pose inference failed");
                        PoseEvent::Error { message: format!("{e:#}") }
                    }
                }
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }
    debug!("pose worker stopped");
}
