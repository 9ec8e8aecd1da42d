//! LLRF 采集监视器
//!
//! 打开板卡（或模拟板卡），启动采集线程，按周期输出单点投影与采集指标。
//!
//! ```text
//! llrf-monitor --simulate --period-ms 200 --probe 2000
//! llrf-monitor --config /etc/llrf/board.toml --log-dir /var/log/llrf
//! llrf-monitor --simulate --set sp_phase=45 --dump
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use llrf_driver::{
    Board, BoardBuilder, BoardConfig, ChannelHook, ParamValue, ProbeSnapshot, READY_FLAG_OFFSET,
};
use llrf_transport::SimulatedBoard;
use llrf_transport::sim::pulse_waveform;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// LLRF 采集监视器
#[derive(Parser, Debug)]
#[command(name = "llrf-monitor")]
#[command(about = "Acquire and display LLRF waveforms", long_about = None)]
struct Args {
    /// 板卡配置文件（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 设备节点（覆盖配置文件）
    #[arg(long)]
    device: Option<PathBuf>,

    /// 使用模拟板卡（不需要硬件）
    #[arg(long)]
    simulate: bool,

    /// 采集周期（毫秒，覆盖配置文件）
    #[arg(long)]
    period_ms: Option<u64>,

    /// 单点投影位置（覆盖配置文件）
    #[arg(long)]
    probe: Option<i64>,

    /// 启动时写入的参数（可重复）：`--set sp_phase=45`
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// 读取全部寄存器参数后退出
    #[arg(long)]
    dump: bool,

    /// 每 N 个周期输出一次
    #[arg(long, default_value = "1")]
    report_every: u64,

    /// 以 JSON 行输出单点投影
    #[arg(long)]
    json: bool,

    /// 日志文件目录（每日轮转）
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// 初始化日志：终端输出 + 可选的每日轮转文件
///
/// 返回的守卫必须存活到进程退出，否则文件日志会丢失尾部。
fn init_logging(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "llrf-monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn parse_assignment(text: &str) -> Result<(&str, ParamValue)> {
    let Some((name, value)) = text.split_once('=') else {
        bail!("expected NAME=VALUE, got {:?}", text);
    };
    let value = value.trim();
    let value = match value.parse::<i64>() {
        Ok(v) => ParamValue::Int(v),
        Err(_) => ParamValue::Float(
            value
                .parse::<f64>()
                .with_context(|| format!("invalid value for {}: {:?}", name, value))?,
        ),
    };
    Ok((name.trim(), value))
}

fn load_config(args: &Args) -> Result<BoardConfig> {
    let mut config = match &args.config {
        Some(path) => BoardConfig::load(path)?,
        None => BoardConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(period_ms) = args.period_ms {
        config.acquisition.period_ms = period_ms;
    }
    if let Some(probe) = args.probe {
        config.acquisition.probe_index = probe;
    }
    config.validate()?;
    Ok(config)
}

fn report(probe: &ProbeSnapshot, json: bool) {
    if json {
        let values: serde_json::Map<String, serde_json::Value> = probe
            .named_values()
            .map(|(name, value)| (name.to_string(), serde_json::json!(value)))
            .collect();
        let line = serde_json::json!({
            "cycle": probe.cycle,
            "index": probe.index,
            "values": values,
        });
        println!("{}", line);
    } else {
        println!("cycle {} @ point {}", probe.cycle, probe.index);
        for (name, value) in probe.named_values() {
            println!("  {:<40} {:>16.6}", name, value);
        }
    }
}

/// 向模拟板卡装入第 `cycle` 帧波形
///
/// 启用就绪握手时同时置位就绪标志，否则采集线程会跳过每个周期。
fn refresh_simulation(sim: &SimulatedBoard, cycle: u64, ready_handshake: bool) {
    sim.load_waveform(&pulse_waveform(cycle));
    if ready_handshake {
        sim.poke_u32(READY_FLAG_OFFSET, 1);
    }
}

fn dump(board: &Board) {
    for (name, result) in board.params().read_all() {
        match result {
            Ok(value) => println!("{:<32} {}", name, value),
            Err(e) => println!("{:<32} <{}>", name, e),
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let ready_handshake = config.acquisition.ready_handshake;
    let sim = args.simulate.then(|| {
        let sim = SimulatedBoard::new();
        refresh_simulation(&sim, 0, ready_handshake);
        sim
    });
    let builder = BoardBuilder::from_config(&config);
    let board = match &sim {
        Some(sim) => {
            info!("Using simulated board");
            builder.transport(sim.transport()).build()?
        },
        None => builder
            .build()
            .with_context(|| format!("failed to open {}", config.device.display()))?,
    };

    for assignment in &args.set {
        let (name, value) = parse_assignment(assignment)?;
        board.write(name, value)?;
        info!("{} = {}", name, value);
    }

    if args.dump {
        dump(&board);
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })
        .context("failed to set Ctrl+C handler")?;
    }

    let (hook, rx) = ChannelHook::new(4);
    let hook = Arc::new(hook);
    board.add_hook(hook.clone());

    let poll = Duration::from_millis(config.acquisition.period_ms.clamp(50, 1000));
    let report_every = args.report_every.max(1);
    info!("Monitoring (Ctrl+C to stop)");

    while running.load(Ordering::Acquire) {
        let snapshot = match rx.recv_timeout(poll) {
            Ok(snapshot) => snapshot,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                error!("Acquisition hook disconnected");
                break;
            },
        };

        if let Some(sim) = &sim {
            refresh_simulation(sim, snapshot.cycle, ready_handshake);
        }

        if snapshot.cycle % report_every == 0 {
            match board.probe() {
                Some(probe) => report(&probe, args.json),
                None => warn!(
                    "No projection available (probe index {})",
                    board.probe_index()
                ),
            }
            info!("{}", board.metrics());
        }
    }

    let metrics = board.metrics();
    info!("Stopped: {} (hook dropped {} frames)", metrics, hook.dropped());
    if !metrics.is_healthy() {
        warn!("Failure rate {:.1}% exceeds 10%", metrics.failure_rate());
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    let guard = init_logging(args.log_dir.as_ref());

    if let Err(e) = run(args) {
        error!("{:#}", e);
        // 退出前刷新文件日志
        drop(guard);
        std::process::exit(1);
    }
}
