//! 驱动层模块
//!
//! 本模块提供 LLRF 板卡的参数访问与周期采集功能，包括：
//! - 参数读写（寄存器表解析 + 单位换算 + 参数缓存）
//! - 后台采集线程（批量读取波形区 → 23 路派生通道）
//! - 遥测存储（ArcSwap 无锁读取，整帧原子替换）
//! - 钩子系统：每次发布后的回调
//!
//! # 快速开始
//!
//! ```no_run
//! use llrf_driver::{BoardBuilder, DerivedChannel};
//! use std::time::Duration;
//!
//! let board = BoardBuilder::new().build()?;
//! board.write("sp_phase", 45.0)?;
//! let snapshot = board.wait_for_cycle(1, Duration::from_secs(3))?;
//! let vswr = snapshot.channel(DerivedChannel::Vswr1);
//! # Ok::<(), llrf_driver::DriverError>(())
//! ```

mod board;
mod builder;
pub mod calibration;
pub mod config;
pub mod convert;
mod error;
pub mod hooks;
pub mod metrics;
pub mod params;
pub mod pipeline;
pub mod state;
pub mod telemetry;

pub use board::Board;
pub use builder::BoardBuilder;
pub use calibration::{Calibration, ChannelCalibration};
pub use config::{AcquisitionConfig, BoardConfig};
pub use convert::{Conversion, ConversionTable};
pub use error::{DomainError, DriverError};
pub use hooks::{ChannelHook, HookManager, TelemetryCallback};
pub use metrics::{AcquisitionMetrics, MetricsSnapshot};
pub use params::{MANUAL_CLEAR_HOLD, ParamValue, Parameters};
pub use pipeline::{
    AcquisitionContext, CycleBuffers, CycleOutcome, PipelineConfig, READY_FLAG_OFFSET, acquisition_loop, run_cycle,
};
pub use state::{AcquisitionState, AtomicAcquisitionState};
pub use telemetry::{DERIVED_CHANNELS, DerivedChannel, PROBE_INDEX_PARAM, ProbeSnapshot, TelemetrySnapshot, TelemetryStore};
