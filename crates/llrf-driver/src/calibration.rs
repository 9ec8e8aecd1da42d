//! 板卡标定常数
//!
//! 每个前向/反射检波通道一对 `(k, b)`：
//! `power = (I² + Q²) · k · 10^(b/10) / 1000`。

use serde::{Deserialize, Serialize};

/// 检波通道数（前向与反射各 4 路）
pub const CALIBRATED_CHANNELS: usize = 4;

/// 单个通道的标定常数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    /// 线性功率系数
    pub k: f64,
    /// 对数偏置（dB）
    pub b: f64,
}

impl ChannelCalibration {
    pub const fn new(k: f64, b: f64) -> Self {
        Self { k, b }
    }

    /// `k · 10^(b/10)`
    pub fn scale(&self) -> f64 {
        self.k * 10f64.powf(self.b / 10.0)
    }

    /// 由 I/Q 计算功率
    pub fn power(&self, i: f64, q: f64) -> f64 {
        (i * i + q * q) * self.scale() / 1000.0
    }
}

/// 整板标定
///
/// `fwd[n]`/`rfl[n]` 对应第 `n + 1` 路射频链。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub fwd: [ChannelCalibration; CALIBRATED_CHANNELS],
    pub rfl: [ChannelCalibration; CALIBRATED_CHANNELS],
}

const DEFAULT_B: f64 = 74.1;

impl Default for Calibration {
    fn default() -> Self {
        Self {
            fwd: [
                ChannelCalibration::new(1.5818e-10, DEFAULT_B),
                ChannelCalibration::new(1.5652e-10, DEFAULT_B),
                ChannelCalibration::new(1.5818e-10, DEFAULT_B),
                ChannelCalibration::new(1.5818e-10, DEFAULT_B),
            ],
            rfl: [
                ChannelCalibration::new(1.6526e-10, DEFAULT_B),
                ChannelCalibration::new(1.5767e-10, DEFAULT_B),
                ChannelCalibration::new(1.5818e-10, DEFAULT_B),
                ChannelCalibration::new(1.5818e-10, DEFAULT_B),
            ],
        }
    }
}

impl Calibration {
    /// 第 `pair` 路（0 起）的前向/反射标定
    pub fn pair(&self, pair: usize) -> Option<(ChannelCalibration, ChannelCalibration)> {
        Some((*self.fwd.get(pair)?, *self.rfl.get(pair)?))
    }

    /// 所有常数均为有限正数
    pub fn is_valid(&self) -> bool {
        self.fwd
            .iter()
            .chain(self.rfl.iter())
            .all(|c| c.k.is_finite() && c.k > 0.0 && c.b.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        let cal = Calibration::default();
        assert_eq!(cal.fwd[0].k, 1.5818e-10);
        assert_eq!(cal.fwd[1].k, 1.5652e-10);
        assert_eq!(cal.rfl[0].k, 1.6526e-10);
        assert_eq!(cal.rfl[1].k, 1.5767e-10);
        assert!(cal.fwd.iter().chain(cal.rfl.iter()).all(|c| c.b == 74.1));
        assert!(cal.is_valid());
    }

    #[test]
    fn test_power_closed_form() {
        let fwd1 = Calibration::default().fwd[0];
        let expected = (3000.0f64 * 3000.0 + 4000.0 * 4000.0) * 1.5818e-10 * 10f64.powf(7.41) / 1000.0;
        let power = fwd1.power(3000.0, 4000.0);
        assert!((power - expected).abs() <= expected * 1e-12, "{} vs {}", power, expected);
    }

    #[test]
    fn test_pair_bounds() {
        let cal = Calibration::default();
        assert!(cal.pair(3).is_some());
        assert!(cal.pair(4).is_none());
    }

    #[test]
    fn test_invalid_calibration() {
        let mut cal = Calibration::default();
        cal.rfl[2].k = 0.0;
        assert!(!cal.is_valid());
    }
}
