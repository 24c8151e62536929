use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{ensure, Result};

/// RGB8 の1ピクセルあたりバイト数
pub const CHANNELS: usize = 3;

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_free: usize,
    outstanding: AtomicUsize,
}

/// フレームバッファのプール
///
/// 貸し出したバッファは `FrameBuffer` の drop でちょうど1回だけ返却される
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// `max_free` 個まで返却済みバッファを保持する
    pub fn new(max_free: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_free)),
                max_free,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// ゼロ埋めのバッファを借りる
    pub fn lease(&self, width: u32, height: u32, ts_ms: u64) -> FrameBuffer {
        let len = width as usize * height as usize * CHANNELS;
        let mut data = self
            .inner
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_default();
        data.clear();
        data.resize(len, 0);

        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        FrameBuffer { pool: Arc::clone(&self.inner), data, width, height, ts_ms }
    }

    /// RGB8 のピクセル列をコピーして借りる
    pub fn lease_rgb(&self, width: u32, height: u32, ts_ms: u64, rgb: &[u8]) -> Result<FrameBuffer> {
        let expected = width as usize * height as usize * CHANNELS;
        ensure!(
            rgb.len() == expected,
            "frame size mismatch: {}x{} needs {} bytes, got {}",
            width,
            height,
            expected,
            rgb.len()
        );
        let mut frame = self.lease(width, height, ts_ms);
        frame.data.copy_from_slice(rgb);
        Ok(frame)
    }

    /// 未返却のバッファ数
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }
}

/// プールから借りた RGB8 フレーム
pub struct FrameBuffer {
    pool: Arc<PoolInner>,
    data: Vec<u8>,
    width: u32,
    height: u32,
    ts_ms: u64,
}

impl FrameBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn ts_ms(&self) -> u64 {
        self.ts_ms
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("ts_ms", &self.ts_ms)
            .finish()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        if let Ok(mut free) = self.pool.free.lock() {
            if free.len() < self.pool.max_free {
                free.push(data);
            }
        }
        self.pool.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(pool: &FramePool) -> usize {
        pool.inner.free.lock().unwrap().len()
    }

    #[test]
    fn test_lease_and_release() {
        let pool = FramePool::new(2);
        let a = pool.lease(4, 2, 0);
        let b = pool.lease(4, 2, 33);
        assert_eq!(a.data().len(), 24);
        assert_eq!(pool.outstanding(), 2);
        drop(a);
        assert_eq!(pool.outstanding(), 1);
        drop(b);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(idle(&pool), 2);
    }

    #[test]
    fn test_buffer_reused() {
        let pool = FramePool::new(1);
        let mut a = pool.lease(2, 2, 0);
        a.data_mut()[0] = 255;
        drop(a);
        let b = pool.lease(2, 2, 0);
        assert_eq!(idle(&pool), 0);
        assert!(b.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_idle_capped() {
        let pool = FramePool::new(1);
        let frames: Vec<_> = (0..3).map(|i| pool.lease(1, 1, i)).collect();
        drop(frames);
        assert_eq!(idle(&pool), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_lease_rgb_size_check() {
        let pool = FramePool::new(1);
        assert!(pool.lease_rgb(2, 2, 0, &[0; 11]).is_err());
        assert_eq!(pool.outstanding(), 0);
        let frame = pool.lease_rgb(2, 2, 7, &[9; 12]).unwrap();
        assert_eq!(frame.ts_ms(), 7);
        assert_eq!(frame.data()[11], 9);
    }

    #[test]
    fn test_released_across_threads() {
        let pool = FramePool::new(4);
        let frame = pool.lease(8, 8, 0);
        std::thread::spawn(move || drop(frame)).join().unwrap();
        assert_eq!(pool.outstanding(), 0);
    }
}
