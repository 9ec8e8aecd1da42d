//! 采集性能指标
//!
//! 原子计数器，可以在任何线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 采集循环实时指标
///
/// # 使用示例
///
/// ```rust
/// use llrf_driver::AcquisitionMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = AcquisitionMetrics::default();
/// metrics.cycles_ok.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().cycles_ok, 1);
/// ```
#[derive(Debug, Default)]
pub struct AcquisitionMetrics {
    /// 成功发布的周期数
    pub cycles_ok: AtomicU64,

    /// 因传输失败而丢弃的周期数
    pub cycles_failed: AtomicU64,

    /// 因波形未就绪而跳过的周期数（仅在启用就绪握手时）
    pub cycles_skipped: AtomicU64,

    /// 累计的无定义采样点数（VSWR 分母为零等）
    pub domain_faults: AtomicU64,

    /// 最近一个周期的耗时（微秒）
    pub last_cycle_us: AtomicU64,

    /// 最长周期耗时（微秒）
    pub max_cycle_us: AtomicU64,
}

impl AcquisitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个周期的耗时
    pub fn record_cycle_time(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.last_cycle_us.store(us, Ordering::Relaxed);
        self.max_cycle_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_ok: self.cycles_ok.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            domain_faults: self.domain_faults.load(Ordering::Relaxed),
            last_cycle_us: self.last_cycle_us.load(Ordering::Relaxed),
            max_cycle_us: self.max_cycle_us.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.cycles_ok.store(0, Ordering::Relaxed);
        self.cycles_failed.store(0, Ordering::Relaxed);
        self.cycles_skipped.store(0, Ordering::Relaxed);
        self.domain_faults.store(0, Ordering::Relaxed);
        self.last_cycle_us.store(0, Ordering::Relaxed);
        self.max_cycle_us.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub domain_faults: u64,
    pub last_cycle_us: u64,
    pub max_cycle_us: u64,
}

impl MetricsSnapshot {
    /// 失败周期占比（百分比）
    ///
    /// 没有任何周期完成时返回 0.0。
    pub fn failure_rate(&self) -> f64 {
        let total = self.cycles_ok + self.cycles_failed;
        if total == 0 {
            return 0.0;
        }
        (self.cycles_failed as f64 / total as f64) * 100.0
    }

    pub fn is_healthy(&self) -> bool {
        self.failure_rate() < 10.0
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycles ok={} failed={} skipped={} | domain faults={} | cycle last={}us max={}us",
            self.cycles_ok,
            self.cycles_failed,
            self.cycles_skipped,
            self.domain_faults,
            self.last_cycle_us,
            self.max_cycle_us
        )
    }
}
