//! Pipeline 采集循环模块
//!
//! 后台采集线程：周期性批量读取波形区、计算派生通道并发布到遥测存储。
//!
//! 单个周期的任何失败都只会丢弃该周期（存储保持不变），下一周期照常进行，
//! 不在周期内重试，也不会让线程退出。

use crate::calibration::Calibration;
use crate::error::{DomainError, DriverError};
use crate::hooks::HookManager;
use crate::metrics::AcquisitionMetrics;
use crate::state::{AcquisitionState, AtomicAcquisitionState};
use crate::telemetry::{DERIVED_CHANNELS, DerivedChannel, TelemetrySnapshot, TelemetryStore};
use llrf_protocol::{RawChannel, RawWaveform, WAVEFORM_LENGTH, WAVEFORM_OFFSET, WAVEFORM_POINT};
use llrf_transport::SharedTransport;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, trace, warn};

/// 波形就绪标志寄存器（`rd_reg_state`）
pub const READY_FLAG_OFFSET: u32 = 508;

/// 停止检查的最大间隔
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use llrf_driver::PipelineConfig;
///
/// // 默认：1 s 周期，完整波形区
/// let config = PipelineConfig::default();
/// assert_eq!(config.period_ms, 1000);
///
/// let fast = PipelineConfig {
///     period_ms: 100,
///     ..PipelineConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 两次周期开始之间的最小间隔（毫秒）
    ///
    /// 周期耗时超过该值时，下一周期在上一周期结束后立即开始（不补偿）。
    pub period_ms: u64,
    /// 波形区偏移
    pub waveform_offset: u32,
    /// 读取前检查就绪标志（为 0 时跳过本周期，非 0 时清零后读取）
    pub ready_handshake: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            waveform_offset: WAVEFORM_OFFSET,
            ready_handshake: false,
        }
    }
}

impl PipelineConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// 采集线程与参数访问方共享的上下文
pub struct AcquisitionContext {
    pub transport: SharedTransport,
    pub calibration: Calibration,
    pub store: Arc<TelemetryStore>,
    pub hooks: RwLock<HookManager>,
    pub metrics: AcquisitionMetrics,
    pub state: AtomicAcquisitionState,
}

impl AcquisitionContext {
    pub fn new(transport: SharedTransport, calibration: Calibration, store: Arc<TelemetryStore>) -> Self {
        Self {
            transport,
            calibration,
            store,
            hooks: RwLock::new(HookManager::new()),
            metrics: AcquisitionMetrics::new(),
            state: AtomicAcquisitionState::default(),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state.get(Ordering::Acquire)
    }

    fn enter(&self, state: AcquisitionState) {
        self.state.set(state, Ordering::Release);
    }
}

/// 单个周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 新一帧已发布
    Published { cycle: u64, domain_faults: u32 },
    /// 就绪标志为 0，本周期跳过
    NotReady,
}

/// 跨周期复用的缓冲区
///
/// 原始字节与原始波形一次分配；派生帧在上一帧无人持有时回收。
pub struct CycleBuffers {
    bytes: Vec<u8>,
    raw: RawWaveform,
    spare: Option<TelemetrySnapshot>,
}

impl CycleBuffers {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; WAVEFORM_LENGTH],
            raw: RawWaveform::zeroed(),
            spare: Some(TelemetrySnapshot::zeroed()),
        }
    }

    /// 最近一次成功读取的原始波形
    pub fn raw(&self) -> &RawWaveform {
        &self.raw
    }
}

impl Default for CycleBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// 幅度 `sqrt(I² + Q²)`
pub fn amplitude(i: f64, q: f64) -> f64 {
    (i * i + q * q).sqrt()
}

/// 相位（度）`atan2(Q, I) · 180 / π`
pub fn phase_degrees(i: f64, q: f64) -> f64 {
    q.atan2(i) * 180.0 / std::f64::consts::PI
}

/// FPGA 相位字转角度 `raw / 32768 · 180`
pub fn word_to_degrees(raw: f64) -> f64 {
    raw / 32768.0 * 180.0
}

/// 电压驻波比 `(√fwd + √rfl) / (√fwd − √rfl)`
///
/// 前向功率等于反射功率时分母为零，返回 [`DomainError::DivisionByZero`]。
pub fn vswr(fwd_power: f64, rfl_power: f64) -> Result<f64, DomainError> {
    const QUANTITY: &str = "VSWR";
    if fwd_power == rfl_power {
        return Err(DomainError::DivisionByZero { quantity: QUANTITY });
    }
    let (sf, sr) = (fwd_power.sqrt(), rfl_power.sqrt());
    let value = (sf + sr) / (sf - sr);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DomainError::NotFinite { quantity: QUANTITY })
    }
}

/// 由 14 路原始波形计算 23 路派生通道
///
/// 无定义的采样点（VSWR 分母为零）写入 NaN 并按通道计数，返回总数。
pub fn convert(raw: &RawWaveform, calibration: &Calibration, out: &mut TelemetrySnapshot) -> u32 {
    use DerivedChannel as D;

    let channels: [&[i16]; 14] = RawChannel::ALL.map(|c| raw.channel(c));
    let [fwd1_cal, fwd2_cal, ..] = calibration.fwd;
    let [rfl1_cal, rfl2_cal, ..] = calibration.rfl;
    let mut faults = [0u32; DERIVED_CHANNELS];

    let mut checked_vswr = |fwd: f64, rfl: f64, channel: DerivedChannel| match vswr(fwd, rfl) {
        Ok(v) => v,
        Err(_) => {
            faults[channel.index()] += 1;
            f64::NAN
        },
    };

    for i in 0..WAVEFORM_POINT {
        let s = |c: RawChannel| channels[c.index()][i] as f64;
        let mut values = [0.0; DERIVED_CHANNELS];

        // 拾取与 DAC：FPGA 直接给出幅度/相位字
        values[D::Cav2Amp.index()] = s(RawChannel::Pickup2I);
        values[D::Cav2Phase.index()] = word_to_degrees(s(RawChannel::Pickup2Q));
        values[D::Cav1Amp.index()] = s(RawChannel::Pickup1I);
        values[D::Cav1Phase.index()] = word_to_degrees(s(RawChannel::Pickup1Q));
        values[D::DacAmp.index()] = s(RawChannel::DacI);
        values[D::DacPhase.index()] = word_to_degrees(s(RawChannel::DacQ));

        // 第 1 路射频链
        let (fi, fq) = (s(RawChannel::Fwd1I), s(RawChannel::Fwd1Q));
        let (ri, rq) = (s(RawChannel::Rfl1I), s(RawChannel::Rfl1Q));
        let fwd1 = fwd1_cal.power(fi, fq);
        let rfl1 = rfl1_cal.power(ri, rq);
        values[D::Fwd1Amp.index()] = amplitude(fi, fq);
        values[D::Fwd1Phase.index()] = phase_degrees(fi, fq);
        values[D::Fwd1Power.index()] = fwd1;
        values[D::Rfl1Amp.index()] = amplitude(ri, rq);
        values[D::Rfl1Phase.index()] = phase_degrees(ri, rq);
        values[D::Rfl1Power.index()] = rfl1;
        values[D::Vswr1.index()] = checked_vswr(fwd1, rfl1, D::Vswr1);

        // 第 2 路射频链
        let (fi, fq) = (s(RawChannel::Fwd2I), s(RawChannel::Fwd2Q));
        let (ri, rq) = (s(RawChannel::Rfl2I), s(RawChannel::Rfl2Q));
        let fwd2 = fwd2_cal.power(fi, fq);
        let rfl2 = rfl2_cal.power(ri, rq);
        values[D::Fwd2Amp.index()] = amplitude(fi, fq);
        values[D::Fwd2Phase.index()] = phase_degrees(fi, fq);
        values[D::Fwd2Power.index()] = fwd2;
        values[D::Rfl2Amp.index()] = amplitude(ri, rq);
        values[D::Rfl2Phase.index()] = phase_degrees(ri, rq);
        values[D::Rfl2Power.index()] = rfl2;
        values[D::Vswr2.index()] = checked_vswr(fwd2, rfl2, D::Vswr2);

        // 两路合计
        values[D::InPower.index()] = fwd1 + fwd2 - rfl1 - rfl2;
        values[D::FwdPower.index()] = fwd1 + fwd2;
        values[D::RflPower.index()] = rfl1 + rfl2;

        out.set_point(i, &values);
    }

    for channel in DerivedChannel::ALL {
        out.set_domain_faults(channel, faults[channel.index()]);
    }
    faults.iter().sum()
}

/// 执行一个采集周期
///
/// 读取失败时立即返回错误，遥测存储保持不变。
pub fn run_cycle(
    ctx: &AcquisitionContext,
    config: &PipelineConfig,
    buffers: &mut CycleBuffers,
) -> Result<CycleOutcome, DriverError> {
    // ============================================================
    // 1. Fetching
    // ============================================================
    ctx.enter(AcquisitionState::Fetching);
    if config.ready_handshake {
        let ready = ctx.transport.read_u32(READY_FLAG_OFFSET)?;
        if ready == 0 {
            trace!("Waveform not ready, skipping cycle");
            return Ok(CycleOutcome::NotReady);
        }
        ctx.transport.write_u32(READY_FLAG_OFFSET, 0)?;
    }
    ctx.transport.read_bulk(config.waveform_offset, &mut buffers.bytes)?;
    buffers.raw.decode_from(&buffers.bytes)?;
    let acquired_at = SystemTime::now();

    // ============================================================
    // 2. Converting
    // ============================================================
    ctx.enter(AcquisitionState::Converting);
    let mut work = buffers.spare.take().unwrap_or_else(TelemetrySnapshot::zeroed);
    let domain_faults = convert(&buffers.raw, &ctx.calibration, &mut work);
    let cycle = ctx.store.cycle() + 1;
    work.cycle = cycle;
    work.acquired_at = acquired_at;

    if domain_faults > 0 {
        warn!(
            "Cycle {}: {} undefined samples (VSWR1: {}, VSWR2: {}), stored as NaN",
            cycle,
            domain_faults,
            work.domain_faults(DerivedChannel::Vswr1),
            work.domain_faults(DerivedChannel::Vswr2)
        );
    }

    // ============================================================
    // 3. Publishing
    // ============================================================
    ctx.enter(AcquisitionState::Publishing);
    let previous = ctx.store.publish(work);
    buffers.spare = Arc::try_unwrap(previous).ok();

    let published = ctx.store.load();
    ctx.hooks.read().trigger_all(&published);

    Ok(CycleOutcome::Published {
        cycle,
        domain_faults,
    })
}

/// 睡眠到 `deadline`，期间周期性检查运行标志
///
/// 运行标志被清除时返回 false。
fn sleep_until(deadline: Instant, is_running: &AtomicBool) -> bool {
    loop {
        if !is_running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        spin_sleep::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

/// 采集线程主循环
///
/// # 参数
/// - `ctx`: 共享上下文（传输、标定、存储、钩子、指标）
/// - `config`: Pipeline 配置
/// - `is_running`: 运行标志（清除后在当前周期结束时退出）
pub fn acquisition_loop(ctx: Arc<AcquisitionContext>, config: PipelineConfig, is_running: Arc<AtomicBool>) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Acquisition thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set acquisition thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    let period = config.period();
    let mut buffers = CycleBuffers::new();
    info!(
        "Acquisition loop started (period {:?}, offset 0x{:X}, handshake {})",
        period, config.waveform_offset, config.ready_handshake
    );

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Acquisition thread: is_running flag is false, exiting");
            break;
        }

        let started = Instant::now();
        match run_cycle(&ctx, &config, &mut buffers) {
            Ok(CycleOutcome::Published {
                cycle,
                domain_faults,
            }) => {
                ctx.metrics.cycles_ok.fetch_add(1, Ordering::Relaxed);
                ctx.metrics
                    .domain_faults
                    .fetch_add(domain_faults as u64, Ordering::Relaxed);
                debug!("Published cycle {} in {:?}", cycle, started.elapsed());
            },
            Ok(CycleOutcome::NotReady) => {
                ctx.metrics.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                ctx.metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
                error!("Acquisition cycle dropped: {}", e);
                ctx.hooks.read().trigger_all_failed(&e);
            },
        }
        ctx.enter(AcquisitionState::Idle);
        ctx.metrics.record_cycle_time(started.elapsed());

        if !sleep_until(started + period, &is_running) {
            break;
        }
    }

    info!("Acquisition loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use llrf_transport::SimulatedBoard;

    fn context(board: &SimulatedBoard) -> AcquisitionContext {
        AcquisitionContext::new(
            SharedTransport::new(board.transport()),
            Calibration::default(),
            Arc::new(TelemetryStore::default()),
        )
    }

    fn constant_waveform(values: [i16; 14]) -> RawWaveform {
        let mut raw = RawWaveform::zeroed();
        for channel in RawChannel::ALL {
            raw.channel_mut(channel).fill(values[channel.index()]);
        }
        raw
    }

    #[test]
    fn test_amplitude_and_phase() {
        assert_eq!(amplitude(3000.0, 4000.0), 5000.0);
        let phase = phase_degrees(3000.0, 4000.0);
        assert!((phase - 53.130_102_354_155_98).abs() < 1e-9, "{}", phase);
        assert_eq!(word_to_degrees(-16384.0), -90.0);
    }

    #[test]
    fn test_vswr_domain_error() {
        assert_eq!(
            vswr(2.0, 2.0),
            Err(DomainError::DivisionByZero { quantity: "VSWR" })
        );
        assert_eq!(
            vswr(0.0, 0.0),
            Err(DomainError::DivisionByZero { quantity: "VSWR" })
        );
        // fwd = 4, rfl = 1 → (2 + 1) / (2 − 1)
        assert_eq!(vswr(4.0, 1.0).unwrap(), 3.0);
    }

    #[test]
    fn test_convert_closed_form() {
        let cal = Calibration::default();
        let mut values = [0i16; 14];
        values[RawChannel::Fwd1I.index()] = 3000;
        values[RawChannel::Fwd1Q.index()] = 4000;
        values[RawChannel::Rfl1I.index()] = 300;
        values[RawChannel::Rfl1Q.index()] = 400;
        values[RawChannel::Pickup2Q.index()] = 16384;
        values[RawChannel::DacI.index()] = -7;
        let raw = constant_waveform(values);

        let mut out = TelemetrySnapshot::zeroed();
        let faults = convert(&raw, &cal, &mut out);

        let expected_power = (3000.0f64 * 3000.0 + 4000.0 * 4000.0) * 1.5818e-10 * 10f64.powf(7.41) / 1000.0;
        let p = out.channel(DerivedChannel::Fwd1Power)[100];
        assert!((p - expected_power).abs() <= expected_power * 1e-12);
        assert_eq!(out.channel(DerivedChannel::Fwd1Amp)[0], 5000.0);
        assert!((out.channel(DerivedChannel::Fwd1Phase)[4095] - 53.13).abs() < 0.01);
        assert_eq!(out.channel(DerivedChannel::Cav2Phase)[7], 90.0);
        assert_eq!(out.channel(DerivedChannel::DacAmp)[7], -7.0);

        let rfl1 = out.channel(DerivedChannel::Rfl1Power)[0];
        assert_eq!(out.channel(DerivedChannel::FwdPower)[0], p);
        assert_eq!(out.channel(DerivedChannel::InPower)[0], p - rfl1);
        assert!(out.channel(DerivedChannel::Vswr1)[0].is_finite());

        // 第 2 路全零：fwd2 == rfl2，VSWR2 每个点都无定义
        assert_eq!(faults, WAVEFORM_POINT as u32);
        assert_eq!(out.domain_faults(DerivedChannel::Vswr2), WAVEFORM_POINT as u32);
        assert!(out.channel(DerivedChannel::Vswr2).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_run_cycle_publishes() {
        let board = SimulatedBoard::new();
        board.load_waveform(&llrf_transport::sim::pulse_waveform(0));
        let ctx = context(&board);
        let mut buffers = CycleBuffers::new();

        let outcome = run_cycle(&ctx, &PipelineConfig::default(), &mut buffers).unwrap();
        assert!(matches!(outcome, CycleOutcome::Published { cycle: 1, .. }));
        let snapshot = ctx.store.load();
        assert_eq!(snapshot.cycle, 1);
        assert!(snapshot.channel(DerivedChannel::Fwd1Power)[2000] > 0.0);
        assert_eq!(ctx.store.probe().unwrap().cycle, 1);
    }

    #[test]
    fn test_failed_cycle_leaves_store_unchanged() {
        let board = SimulatedBoard::new();
        board.load_waveform(&llrf_transport::sim::pulse_waveform(0));
        let ctx = context(&board);
        let mut buffers = CycleBuffers::new();
        run_cycle(&ctx, &PipelineConfig::default(), &mut buffers).unwrap();
        let before = ctx.store.load();

        board.fail_next(1);
        let err = run_cycle(&ctx, &PipelineConfig::default(), &mut buffers).unwrap_err();
        assert!(err.is_transport());
        assert!(Arc::ptr_eq(&before, &ctx.store.load()));

        run_cycle(&ctx, &PipelineConfig::default(), &mut buffers).unwrap();
        assert_eq!(ctx.store.cycle(), 2);
    }

    #[test]
    fn test_ready_handshake() {
        let board = SimulatedBoard::new();
        let ctx = context(&board);
        let config = PipelineConfig {
            ready_handshake: true,
            ..PipelineConfig::default()
        };
        let mut buffers = CycleBuffers::new();

        assert_eq!(run_cycle(&ctx, &config, &mut buffers).unwrap(), CycleOutcome::NotReady);
        assert_eq!(ctx.store.cycle(), 0);

        board.poke_u32(READY_FLAG_OFFSET, 1);
        assert!(matches!(
            run_cycle(&ctx, &config, &mut buffers).unwrap(),
            CycleOutcome::Published { cycle: 1, .. }
        ));
        // 就绪标志被清零
        assert_eq!(board.peek_u32(READY_FLAG_OFFSET), 0);
    }

    #[test]
    fn test_buffers_are_recycled() {
        let board = SimulatedBoard::new();
        let ctx = context(&board);
        let mut buffers = CycleBuffers::new();
        run_cycle(&ctx, &PipelineConfig::default(), &mut buffers).unwrap();
        run_cycle(&ctx, &PipelineConfig::default(), &mut buffers).unwrap();
        // 没有读者持有上一帧，它被回收为下一周期的工作缓冲
        assert!(buffers.spare.is_some());
    }

    #[test]
    fn test_loop_stops_on_flag() {
        let board = SimulatedBoard::new();
        let ctx = Arc::new(context(&board));
        let is_running = Arc::new(AtomicBool::new(true));
        let config = PipelineConfig {
            period_ms: 5,
            ..PipelineConfig::default()
        };

        let handle = {
            let ctx = ctx.clone();
            let is_running = is_running.clone();
            std::thread::spawn(move || acquisition_loop(ctx, config, is_running))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.store.cycle() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        is_running.store(false, Ordering::Release);
        handle.join().unwrap();

        assert!(ctx.store.cycle() >= 3);
        assert_eq!(ctx.state(), AcquisitionState::Idle);
        assert!(ctx.metrics.snapshot().cycles_ok >= 3);
    }
}
