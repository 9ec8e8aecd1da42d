//! 板卡配置文件
//!
//! TOML 格式，所有字段都有默认值：
//!
//! ```toml
//! device = "/dev/pci_llrf"
//!
//! [acquisition]
//! period_ms = 1000
//! probe_index = 0
//! waveform_offset = 0x40000
//! ready_handshake = false
//!
//! [calibration]
//! fwd = [{ k = 1.5818e-10, b = 74.1 }, ...]
//! rfl = [{ k = 1.6526e-10, b = 74.1 }, ...]
//! ```

use crate::calibration::Calibration;
use crate::error::DriverError;
use crate::pipeline::PipelineConfig;
use llrf_protocol::WAVEFORM_OFFSET;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 默认设备节点
pub const DEFAULT_DEVICE: &str = "/dev/pci_llrf";

/// 采集配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub period_ms: u64,
    /// 初始投影位置（`waveform_single_point_position`）
    pub probe_index: i64,
    pub waveform_offset: u32,
    pub ready_handshake: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            probe_index: 0,
            waveform_offset: WAVEFORM_OFFSET,
            ready_handshake: false,
        }
    }
}

impl AcquisitionConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            period_ms: self.period_ms,
            waveform_offset: self.waveform_offset,
            ready_handshake: self.ready_handshake,
        }
    }
}

/// 板卡配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub device: PathBuf,
    pub acquisition: AcquisitionConfig,
    pub calibration: Calibration,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            acquisition: AcquisitionConfig::default(),
            calibration: Calibration::default(),
        }
    }
}

impl BoardConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        let config: Self = toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DriverError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.acquisition.period_ms == 0 {
            return Err(DriverError::Config("acquisition.period_ms must be > 0".to_string()));
        }
        if self.acquisition.waveform_offset % 4 != 0 {
            return Err(DriverError::Config(format!(
                "acquisition.waveform_offset 0x{:X} is not word aligned",
                self.acquisition.waveform_offset
            )));
        }
        if !self.calibration.is_valid() {
            return Err(DriverError::Config(
                "calibration constants must be finite and positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = BoardConfig::from_toml_str("").unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.acquisition.pipeline(), PipelineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = BoardConfig::from_toml_str(
            r#"
            device = "/dev/pci_llrf1"

            [acquisition]
            period_ms = 200
            probe_index = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.device, PathBuf::from("/dev/pci_llrf1"));
        assert_eq!(config.acquisition.period_ms, 200);
        assert_eq!(config.acquisition.probe_index, 1024);
        assert_eq!(config.acquisition.waveform_offset, WAVEFORM_OFFSET);
        assert_eq!(config.calibration, Calibration::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            BoardConfig::from_toml_str("[acquisition]\nperiod_ms = 0"),
            Err(DriverError::Config(_))
        ));
        assert!(matches!(
            BoardConfig::from_toml_str("[acquisition]\nwaveform_offset = 2"),
            Err(DriverError::Config(_))
        ));
        assert!(matches!(
            BoardConfig::from_toml_str("device = 3"),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn test_load_and_save_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.toml");
        let mut config = BoardConfig::default();
        config.acquisition.period_ms = 250;
        config.save(&path).unwrap();
        assert_eq!(BoardConfig::load(&path).unwrap(), config);

        let missing = BoardConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = BoardConfig::default();
        config.acquisition.ready_handshake = true;
        let text = config.to_toml_string().unwrap();
        assert_eq!(BoardConfig::from_toml_str(&text).unwrap(), config);
    }
}
