//! 串行化的共享传输句柄
//!
//! 板卡一次只允许一个寄存器访问在途。采集线程与参数访问方共享同一个
//! [`SharedTransport`]，每次访问都经过同一把锁；需要连续多步独占
//! （例如手动清除脉冲）时用 [`SharedTransport::lock`] 持有守卫。

use crate::{RegisterTransport, TransportError};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

type BoxedTransport = Box<dyn RegisterTransport + Send>;

/// 可克隆的共享传输句柄
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<BoxedTransport>>,
}

impl SharedTransport {
    pub fn new(transport: impl RegisterTransport + Send + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: BoxedTransport) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// 独占传输，直到守卫释放
    pub fn lock(&self) -> MutexGuard<'_, BoxedTransport> {
        self.inner.lock()
    }

    /// 在锁内执行一次（或一组）访问
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn RegisterTransport) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut **guard)
    }

    pub fn read_u32(&self, offset: u32) -> Result<u32, TransportError> {
        self.inner.lock().read_u32(offset)
    }

    pub fn write_u32(&self, offset: u32, value: u32) -> Result<(), TransportError> {
        self.inner.lock().write_u32(offset, value)
    }

    /// 批量读取（整个读取过程持有锁）
    pub fn read_bulk(&self, offset: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        self.inner.lock().read_bulk(offset, buf)
    }

    /// 当前持有该句柄的克隆数
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport")
            .field("handles", &self.handle_count())
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedBoard;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clones_share_state() {
        let board = SimulatedBoard::new();
        let a = SharedTransport::new(board.transport());
        let b = a.clone();
        a.write_u32(0x10, 0xCAFE).unwrap();
        assert_eq!(b.read_u32(0x10).unwrap(), 0xCAFE);
        assert_eq!(a.handle_count(), 2);
    }

    #[test]
    fn test_lock_blocks_other_access() {
        let board = SimulatedBoard::new();
        let shared = SharedTransport::new(board.transport());
        let other = shared.clone();

        let guard = shared.lock();
        let handle = thread::spawn(move || {
            other.write_u32(0x20, 7).unwrap();
        });
        thread::sleep(Duration::from_millis(50));
        // 守卫持有期间另一线程的写入尚未发生
        assert_eq!(board.peek_u32(0x20), 0);
        drop(guard);
        handle.join().unwrap();
        assert_eq!(board.peek_u32(0x20), 7);
    }

    #[test]
    fn test_with_runs_sequence_atomically() {
        let board = SimulatedBoard::new();
        let shared = SharedTransport::new(board.transport());
        let value = shared
            .with(|t| {
                t.write_u32(0x30, 1)?;
                t.write_u32(0x30, 0)?;
                t.read_u32(0x30)
            })
            .unwrap();
        assert_eq!(value, 0);
        assert_eq!(board.write_log().len(), 2);
    }
}
