use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::Result;

use super::{Backend, EstimatorFactory, FrameBuffer, PoseEvent, PoseWorker, WorkerCommand};
use crate::pose::Pose;

type ReadyFn = Box<dyn FnMut(Backend)>;
type PosesFn = Box<dyn FnMut(&[Pose], u64)>;
type ErrorFn = Box<dyn FnMut(&str)>;

/// 推論ワーカーのコンシューマ側
///
/// コールバックは `poll` を呼んだスレッド上で実行される
pub struct PoseClient {
    worker: PoseWorker,
    events: Receiver<PoseEvent>,
    init_sent: bool,
    ready: Option<Backend>,
    on_ready: Option<ReadyFn>,
    on_poses: Option<PosesFn>,
    on_error: Option<ErrorFn>,
}

impl PoseClient {
    pub fn spawn(factory: Box<dyn EstimatorFactory>, backends: Vec<Backend>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = PoseWorker::spawn(factory, backends, tx)?;
        Ok(Self {
            worker,
            events: rx,
            init_sent: false,
            ready: None,
            on_ready: None,
            on_poses: None,
            on_error: None,
        })
    }

    pub fn on_ready(&mut self, f: impl FnMut(Backend) + 'static) {
        self.on_ready = Some(Box::new(f));
    }

    pub fn on_poses(&mut self, f: impl FnMut(&[Pose], u64) + 'static) {
        self.on_poses = Some(Box::new(f));
    }

    pub fn on_error(&mut self, f: impl FnMut(&str) + 'static) {
        self.on_error = Some(Box::new(f));
    }

    /// モデルの読み込みを要求する。2回目以降は何もしない
    pub fn init(&mut self) {
        if self.init_sent {
            return;
        }
        self.init_sent = self.worker.send(WorkerCommand::Init);
    }

    /// 準備完了したバックエンド
    pub fn backend(&self) -> Option<Backend> {
        self.ready
    }

    /// フレームを送る。ワーカー停止後ならその場でプールに戻る
    pub fn send_frame(&self, frame: FrameBuffer) {
        self.worker.send(WorkerCommand::Frame(frame));
    }

    /// 溜まったイベントを処理し、処理した数を返す
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// 最初のイベントを最大 `timeout` 待ち、その後は `poll` と同じ
    pub fn poll_timeout(&mut self, timeout: Duration) -> usize {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event);
                1 + self.poll()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }

    fn dispatch(&mut self, event: PoseEvent) {
        match event {
            PoseEvent::Ready { backend } => {
                self.ready = Some(backend);
                if let Some(f) = self.on_ready.as_mut() {
                    f(backend);
                }
            }
            PoseEvent::Poses { poses, ts_ms } => {
                if let Some(f) = self.on_poses.as_mut() {
                    f(&poses, ts_ms);
                }
            }
            PoseEvent::Error { message } => {
                if let Some(f) = self.on_error.as_mut() {
                    f(&message);
                }
            }
        }
    }
}
