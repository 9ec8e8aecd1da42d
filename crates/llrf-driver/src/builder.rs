//! Builder 模式实现
//!
//! 提供链式构造 [`Board`] 实例的便捷方式。

use crate::board::Board;
use crate::calibration::Calibration;
use crate::config::{BoardConfig, DEFAULT_DEVICE};
use crate::convert::ConversionTable;
use crate::error::DriverError;
use crate::params::Parameters;
use crate::pipeline::{AcquisitionContext, PipelineConfig};
use crate::telemetry::TelemetryStore;
use llrf_protocol::RegisterMap;
use llrf_transport::{RegisterTransport, SharedTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Board Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use llrf_driver::{BoardBuilder, PipelineConfig};
///
/// // 使用默认设备与配置
/// let board = BoardBuilder::new().build().unwrap();
///
/// // 自定义设备节点与采集周期
/// let board = BoardBuilder::new()
///     .device("/dev/pci_llrf1")
///     .pipeline_config(PipelineConfig {
///         period_ms: 200,
///         ..PipelineConfig::default()
///     })
///     .build()
///     .unwrap();
/// ```
pub struct BoardBuilder {
    /// 设备节点（默认 `/dev/pci_llrf`）
    device: Option<PathBuf>,
    /// 直接注入的传输（优先于 `device`）
    transport: Option<SharedTransport>,
    pipeline_config: Option<PipelineConfig>,
    calibration: Option<Calibration>,
    probe_index: Option<i64>,
    register_map: Option<RegisterMap>,
}

impl BoardBuilder {
    pub fn new() -> Self {
        Self {
            device: None,
            transport: None,
            pipeline_config: None,
            calibration: None,
            probe_index: None,
            register_map: None,
        }
    }

    /// 从配置文件内容初始化
    pub fn from_config(config: &BoardConfig) -> Self {
        Self::new()
            .device(config.device.clone())
            .pipeline_config(config.acquisition.pipeline())
            .calibration(config.calibration)
            .probe_index(config.acquisition.probe_index)
    }

    /// 设置设备节点
    pub fn device(mut self, path: impl Into<PathBuf>) -> Self {
        self.device = Some(path.into());
        self
    }

    /// 使用给定的传输（如模拟板卡），不再打开设备节点
    pub fn transport(mut self, transport: impl RegisterTransport + Send + 'static) -> Self {
        self.transport = Some(SharedTransport::new(transport));
        self
    }

    /// 与其他组件共享同一个传输句柄
    pub fn shared_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config);
        self
    }

    pub fn calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// 初始投影位置
    pub fn probe_index(mut self, index: i64) -> Self {
        self.probe_index = Some(index);
        self
    }

    pub fn register_map(mut self, map: RegisterMap) -> Self {
        self.register_map = Some(map);
        self
    }

    /// 构建 Board 实例并启动采集线程
    ///
    /// # Errors
    /// - `DriverError::Transport`: 设备节点打开失败
    /// - `DriverError::IoThread`: 采集线程创建失败
    pub fn build(self) -> Result<Board, DriverError> {
        let calibration = self.calibration.unwrap_or_default();
        if !calibration.is_valid() {
            return Err(DriverError::Config(
                "calibration constants must be finite and positive".to_string(),
            ));
        }
        let config = self.pipeline_config.unwrap_or_default();
        if config.period_ms == 0 {
            return Err(DriverError::Config("period_ms must be > 0".to_string()));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => open_device(self.device.unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE)))?,
        };

        let store = Arc::new(TelemetryStore::new(self.probe_index.unwrap_or(0)));
        let conversions = Arc::new(ConversionTable::standard(calibration));
        let params = Parameters::new(
            transport.clone(),
            self.register_map.unwrap_or_default(),
            conversions,
            store.clone(),
        );
        let ctx = Arc::new(AcquisitionContext::new(transport, calibration, store));

        Board::new(ctx, params, config)
    }
}

impl Default for BoardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn open_device(path: PathBuf) -> Result<SharedTransport, DriverError> {
    let transport = llrf_transport::CharDeviceTransport::open(&path)?;
    info!("Opened {}", path.display());
    Ok(SharedTransport::new(transport))
}

#[cfg(not(target_os = "linux"))]
fn open_device(path: PathBuf) -> Result<SharedTransport, DriverError> {
    info!("Character device {} requested on a non-Linux host", path.display());
    Err(DriverError::Config(format!(
        "{}: character device access is only available on Linux",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use llrf_transport::SimulatedBoard;

    #[test]
    fn test_builder_rejects_invalid_settings() {
        let sim = SimulatedBoard::new();
        let result = BoardBuilder::new()
            .transport(sim.transport())
            .pipeline_config(PipelineConfig {
                period_ms: 0,
                ..PipelineConfig::default()
            })
            .build();
        assert!(matches!(result, Err(DriverError::Config(_))));

        let mut calibration = Calibration::default();
        calibration.rfl[1].k = f64::NAN;
        let result = BoardBuilder::new()
            .transport(sim.transport())
            .calibration(calibration)
            .build();
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_missing_device() {
        let result = BoardBuilder::new().device("/dev/__no_such_llrf__").build();
        let err = result.unwrap_err();
        assert!(err.is_transport(), "{}", err);
    }

    #[test]
    fn test_from_config() {
        let sim = SimulatedBoard::new();
        let mut config = BoardConfig::default();
        config.acquisition.probe_index = 77;
        let board = BoardBuilder::from_config(&config)
            .transport(sim.transport())
            .build()
            .unwrap();
        assert_eq!(board.probe_index(), 77);
        assert_eq!(board.pipeline_config().period_ms, 1000);
    }
}
