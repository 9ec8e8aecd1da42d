//! Board 对外 API
//!
//! 持有共享传输、参数集合与后台采集线程。Drop 时通知采集线程退出并等待。

use crate::error::DriverError;
use crate::hooks::TelemetryCallback;
use crate::metrics::MetricsSnapshot;
use crate::params::{ParamValue, Parameters};
use crate::pipeline::{AcquisitionContext, PipelineConfig, acquisition_loop};
use crate::state::AcquisitionState;
use crate::telemetry::{DerivedChannel, ProbeSnapshot, TelemetrySnapshot};
use llrf_transport::SharedTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// 采集线程停止的最长等待时间
///
/// 覆盖一次进行中的批量读取以及可能的手动清除脉冲（500 ms）。
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// 采集线程的回收结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Joined,
    Panicked,
    /// 超时未退出，线程被分离，会在下一次检查运行标志时自行结束
    Detached,
}

/// 在 `timeout` 内回收采集线程
///
/// join 由单独的看门狗线程执行，本线程只等待结果。
fn reap_acquisition_thread(handle: JoinHandle<()>, timeout: Duration) -> Shutdown {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let watchdog = std::thread::Builder::new()
        .name("llrf-reaper".to_string())
        .spawn(move || {
            let _ = tx.send(handle.join().is_ok());
        });
    if watchdog.is_err() {
        return Shutdown::Detached;
    }

    match rx.recv_timeout(timeout) {
        Ok(true) => Shutdown::Joined,
        Ok(false) => Shutdown::Panicked,
        Err(_) => Shutdown::Detached,
    }
}

/// LLRF 板卡（对外 API）
pub struct Board {
    ctx: Arc<AcquisitionContext>,
    params: Parameters,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
    acquisition_thread: Option<JoinHandle<()>>,
}

impl Board {
    /// 启动采集线程
    ///
    /// 第一个周期立即开始。
    pub fn new(ctx: Arc<AcquisitionContext>, params: Parameters, config: PipelineConfig) -> Result<Self, DriverError> {
        let is_running = Arc::new(AtomicBool::new(true));

        let thread = {
            let ctx = ctx.clone();
            let config = config.clone();
            let is_running = is_running.clone();
            std::thread::Builder::new()
                .name("llrf-acquisition".to_string())
                .spawn(move || acquisition_loop(ctx, config, is_running))
                .map_err(|e| DriverError::IoThread(e.to_string()))?
        };

        info!("Board started (period {} ms)", config.period_ms);
        Ok(Self {
            ctx,
            params,
            config,
            is_running,
            acquisition_thread: Some(thread),
        })
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// 按名称读取参数
    pub fn read(&self, name: &str) -> Result<ParamValue, DriverError> {
        self.params.read(name)
    }

    /// 按名称写入参数
    pub fn write(&self, name: &str, value: impl Into<ParamValue>) -> Result<(), DriverError> {
        self.params.write(name, value)
    }

    /// 最新一帧派生波形（无锁）
    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.ctx.store.load()
    }

    /// 某一路派生波形的拷贝
    pub fn waveform(&self, channel: DerivedChannel) -> Vec<f64> {
        self.snapshot().channel(channel).to_vec()
    }

    /// 最新单点投影
    pub fn probe(&self) -> Option<Arc<ProbeSnapshot>> {
        self.ctx.store.probe()
    }

    pub fn probe_index(&self) -> i64 {
        self.ctx.store.probe_index()
    }

    pub fn set_probe_index(&self, index: i64) {
        self.ctx.store.set_probe_index(index);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn state(&self) -> AcquisitionState {
        self.ctx.state()
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 采集线程是否存活
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
            && self.acquisition_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 注册发布回调
    pub fn add_hook(&self, callback: Arc<dyn TelemetryCallback>) {
        self.ctx.hooks.write().add_callback(callback);
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.ctx.transport
    }

    /// 等待发布序号达到 `cycle`
    ///
    /// # Errors
    /// - `DriverError::Timeout`: 超时
    pub fn wait_for_cycle(&self, cycle: u64, timeout: Duration) -> Result<Arc<TelemetrySnapshot>, DriverError> {
        let start = Instant::now();
        loop {
            let snapshot = self.snapshot();
            if snapshot.cycle >= cycle {
                return Ok(snapshot);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout);
            }
            spin_sleep::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        // Release: 采集线程看到 false 时，之前的写入都已可见
        self.is_running.store(false, Ordering::Release);

        let Some(handle) = self.acquisition_thread.take() else {
            return;
        };
        match reap_acquisition_thread(handle, SHUTDOWN_TIMEOUT) {
            Shutdown::Joined => info!("Board stopped after {} cycles", self.ctx.store.cycle()),
            Shutdown::Panicked => error!("Acquisition thread panicked"),
            Shutdown::Detached => error!(
                "Acquisition thread did not stop within {:?}, detaching",
                SHUTDOWN_TIMEOUT
            ),
        }
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("cycle", &self.ctx.store.cycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Shutdown, reap_acquisition_thread};
    use crate::BoardBuilder;
    use crate::PipelineConfig;
    use llrf_transport::SimulatedBoard;
    use std::time::Duration;

    fn fast() -> PipelineConfig {
        PipelineConfig {
            period_ms: 5,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_board_publishes_and_drops() {
        let sim = SimulatedBoard::new();
        let board = BoardBuilder::new()
            .transport(sim.transport())
            .pipeline_config(fast())
            .build()
            .unwrap();
        let snapshot = board.wait_for_cycle(2, Duration::from_secs(5)).unwrap();
        assert!(snapshot.cycle >= 2);
        assert!(board.is_running());
        drop(board);
    }

    #[test]
    fn test_wait_for_cycle_timeout() {
        let sim = SimulatedBoard::new();
        sim.set_offline(true);
        let board = BoardBuilder::new()
            .transport(sim.transport())
            .pipeline_config(fast())
            .build()
            .unwrap();
        let err = board.wait_for_cycle(1, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, crate::DriverError::Timeout));
        assert_eq!(board.snapshot().cycle, 0);
    }

    #[test]
    fn test_reap_outcomes() {
        let quick = std::thread::spawn(|| {});
        assert_eq!(reap_acquisition_thread(quick, Duration::from_secs(2)), Shutdown::Joined);

        let panicking = std::thread::spawn(|| panic!("acquisition failure"));
        assert_eq!(reap_acquisition_thread(panicking, Duration::from_secs(2)), Shutdown::Panicked);

        let stuck = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(300)));
        assert_eq!(reap_acquisition_thread(stuck, Duration::from_millis(20)), Shutdown::Detached);
    }
}
