//! 发布钩子（Hook System）
//!
//! 每次遥测提交之后在采集线程中触发回调。
//!
//! # 设计原则
//!
//! - **非阻塞**: 回调在采集线程上执行，必须立即返回；耗时处理交给 Channel 另一端
//! - **职责分离**: HookManager 管理运行时回调，PipelineConfig 保持为 POD 数据
//!
//! # 使用示例
//!
//! ```rust
//! use llrf_driver::hooks::{ChannelHook, HookManager, TelemetryCallback};
//! use std::sync::Arc;
//!
//! let mut hooks = HookManager::new();
//! let (hook, rx) = ChannelHook::new(4);
//! hooks.add_callback(Arc::new(hook) as Arc<dyn TelemetryCallback>);
//! assert_eq!(hooks.len(), 1);
//! # drop(rx);
//! ```

use crate::error::DriverError;
use crate::telemetry::TelemetrySnapshot;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 遥测回调 Trait
///
/// # 性能要求
///
/// - **非阻塞**: 禁止 I/O 和长时间持锁
/// - **Channel 模式**: 推荐使用 `crossbeam_channel::Sender::try_send`
pub trait TelemetryCallback: Send + Sync {
    /// 新一帧提交之后调用
    fn on_publish(&self, snapshot: &Arc<TelemetrySnapshot>);

    /// 某个周期被丢弃时调用（可选）
    ///
    /// 默认为空操作。
    fn on_cycle_failed(&self, error: &DriverError) {
        let _ = error;
    }
}

/// 钩子管理器
///
/// 回调列表本身不是线程安全的，需要外部同步（通常通过 `RwLock<HookManager>`）。
#[derive(Default)]
pub struct HookManager {
    callbacks: Vec<Arc<dyn TelemetryCallback>>,
}

impl HookManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback(&mut self, callback: Arc<dyn TelemetryCallback>) {
        self.callbacks.push(callback);
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    /// 触发所有发布回调（在采集循环提交之后调用）
    pub fn trigger_all(&self, snapshot: &Arc<TelemetrySnapshot>) {
        for callback in self.callbacks.iter() {
            callback.on_publish(snapshot);
        }
    }

    /// 触发所有失败回调
    pub fn trigger_all_failed(&self, error: &DriverError) {
        for callback in self.callbacks.iter() {
            callback.on_cycle_failed(error);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// 通过有界 Channel 转发快照的钩子
///
/// 队列满或接收端已关闭时丢弃该帧并计数，不阻塞采集线程。
pub struct ChannelHook {
    tx: Sender<Arc<TelemetrySnapshot>>,
    dropped: AtomicU64,
}

impl ChannelHook {
    /// 创建钩子与对应的接收端
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<TelemetrySnapshot>>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// 被丢弃的帧数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetryCallback for ChannelHook {
    fn on_publish(&self, snapshot: &Arc<TelemetrySnapshot>) {
        match self.tx.try_send(snapshot.clone()) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}
