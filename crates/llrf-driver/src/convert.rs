//! 单位换算
//!
//! 参数名 → 换算方式的查表，未登记的参数使用恒等换算。
//! 正向：寄存器原始字 → 工程量；反向：工程量 → 寄存器原始字（四舍五入）。
//! 所有换算都是原始值与静态标定常数的纯函数。

use crate::calibration::{Calibration, ChannelCalibration};
use crate::error::DomainError;
use std::collections::HashMap;

/// 2^32
const TWO_POW_32: f64 = 4_294_967_296.0;

/// 换算方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// 原样透传（按有符号字解读）
    Identity,
    /// `eng = raw · numerator / denominator + offset`
    Scale {
        numerator: f64,
        denominator: f64,
        offset: f64,
        /// 原始字按 `i32`（true）还是 `u32`（false）解读
        signed: bool,
    },
    /// 反射系数设定（`SP_P*`），`pair` 为 0 起的射频链序号
    ReflectionCoefficient { pair: usize },
    /// VSWR 保护阈值（`Ch_VSWR_Hold`），使用第 1 路前向标定
    VswrHold,
}

impl Conversion {
    const fn scale(numerator: f64, denominator: f64) -> Self {
        Conversion::Scale {
            numerator,
            denominator,
            offset: 0.0,
            signed: true,
        }
    }

    /// 相位字：`raw / 32768 · 180`
    pub const PHASE: Conversion = Conversion::scale(180.0, 32768.0);
    /// 复增益实部：`raw / 4096`
    pub const GAIN: Conversion = Conversion::scale(1.0, 4096.0);
    /// 升降功率时间：`raw · 20 · 2^16 / 1e9`
    pub const RAMP_TIME: Conversion = Conversion::scale(20.0 * 65536.0, 1e9);
    /// PRT 计数：`raw · 6.25 / 1000`
    pub const PRT_COUNT: Conversion = Conversion::scale(6.25, 1000.0);
    /// 频率设定：`raw / 2^32 · 480 MHz − 180 MHz`
    pub const SET_FREQUENCY: Conversion = Conversion::Scale {
        numerator: 480_000_000.0,
        denominator: TWO_POW_32,
        offset: -180_000_000.0,
        signed: false,
    };
    /// 频率测量：`raw · 480 / 2^32`
    pub const MEASURED_FREQUENCY: Conversion = Conversion::Scale {
        numerator: 480.0,
        denominator: TWO_POW_32,
        offset: 0.0,
        signed: false,
    };

    /// 正向换算
    pub fn forward(&self, raw: u32, calibration: &Calibration, quantity: &'static str) -> Result<f64, DomainError> {
        let value = match *self {
            Conversion::Identity => raw as i32 as f64,
            Conversion::Scale {
                numerator,
                denominator,
                offset,
                signed,
            } => from_raw(raw, signed) * numerator / denominator + offset,
            Conversion::ReflectionCoefficient { pair } => {
                let (fwd, rfl) = pair_of(calibration, pair, quantity)?;
                let t = (raw as i32 as f64 / 1024.0 * fwd.k / rfl.k).sqrt();
                if t == 1.0 {
                    return Err(DomainError::DivisionByZero { quantity });
                }
                (t + 1.0) / (t - 1.0)
            },
            Conversion::VswrHold => raw as i32 as f64 * 8192.0 * calibration.fwd[0].scale(),
        };
        finite(value, quantity)
    }

    /// 反向换算（结果四舍五入到整数并检查位宽）
    pub fn inverse(&self, value: f64, calibration: &Calibration, quantity: &'static str) -> Result<u32, DomainError> {
        finite(value, quantity)?;
        match *self {
            Conversion::Identity => to_raw(value, true, quantity),
            Conversion::Scale {
                numerator,
                denominator,
                offset,
                signed,
            } => to_raw((value - offset) * denominator / numerator, signed, quantity),
            Conversion::ReflectionCoefficient { pair } => {
                let (fwd, rfl) = pair_of(calibration, pair, quantity)?;
                if value == 1.0 {
                    return Err(DomainError::DivisionByZero { quantity });
                }
                let t = (value + 1.0) / (value - 1.0);
                to_raw(t * t * rfl.k / fwd.k * 1024.0, true, quantity)
            },
            Conversion::VswrHold => {
                to_raw(value / calibration.fwd[0].scale() / 8192.0, true, quantity)
            },
        }
    }

    /// 是否为恒等换算
    pub fn is_identity(&self) -> bool {
        matches!(self, Conversion::Identity)
    }
}

fn pair_of(
    calibration: &Calibration,
    pair: usize,
    quantity: &'static str,
) -> Result<(ChannelCalibration, ChannelCalibration), DomainError> {
    calibration.pair(pair).ok_or(DomainError::OutOfRange {
        quantity,
        value: pair as f64,
    })
}

fn from_raw(raw: u32, signed: bool) -> f64 {
    if signed { raw as i32 as f64 } else { raw as f64 }
}

fn finite(value: f64, quantity: &'static str) -> Result<f64, DomainError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DomainError::NotFinite { quantity })
    }
}

fn to_raw(value: f64, signed: bool, quantity: &'static str) -> Result<u32, DomainError> {
    let rounded = finite(value, quantity)?.round();
    let (min, max) = if signed {
        (i32::MIN as f64, i32::MAX as f64)
    } else {
        (0.0, u32::MAX as f64)
    };
    if rounded < min || rounded > max {
        return Err(DomainError::OutOfRange { quantity, value });
    }
    Ok(if signed {
        rounded as i32 as u32
    } else {
        rounded as u32
    })
}

/// 参数名 → 换算方式
#[derive(Debug, Clone)]
pub struct ConversionTable {
    entries: HashMap<&'static str, Conversion>,
    calibration: Calibration,
}

impl ConversionTable {
    /// 空表（全部恒等）
    pub fn identity(calibration: Calibration) -> Self {
        Self {
            entries: HashMap::new(),
            calibration,
        }
    }

    /// 板卡的标准换算表
    pub fn standard(calibration: Calibration) -> Self {
        let mut table = Self::identity(calibration);
        table.insert("sp_freq", Conversion::SET_FREQUENCY);
        table.insert("Qset", Conversion::scale(1.0, 1000.0));
        for name in [
            "powup_time",
            "powdown_time",
            "powup_hold_time",
            "powdown_hold_time",
        ] {
            table.insert(name, Conversion::RAMP_TIME);
        }
        table.insert("PRT_Start_count", Conversion::PRT_COUNT);
        table.insert("PRT_End_count", Conversion::PRT_COUNT);
        for name in [
            "sp_phase",
            "beam_phase",
            "ad_adj_imag",
            "da_adj_imag",
            "da_adj_imag2",
            "sp_phase_state",
        ] {
            table.insert(name, Conversion::PHASE);
        }
        for name in ["ad_adj_real", "da_adj_real", "da_adj_real2"] {
            table.insert(name, Conversion::GAIN);
        }
        table.insert("Overdrive", Conversion::scale(1.0, 100_000.0));
        for (pair, name) in ["SP_P", "SP_P_1", "SP_P_2", "SP_P_3"].into_iter().enumerate() {
            table.insert(name, Conversion::ReflectionCoefficient { pair });
        }
        table.insert("Ch_VSWR_Hold", Conversion::VswrHold);
        table.insert("freq_cal_state", Conversion::MEASURED_FREQUENCY);
        table
    }

    pub fn insert(&mut self, name: &'static str, conversion: Conversion) {
        self.entries.insert(name, conversion);
    }

    /// 查换算方式（未登记返回恒等）
    pub fn get(&self, name: &str) -> Conversion {
        self.entries.get(name).copied().unwrap_or(Conversion::Identity)
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// 已登记的参数名
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn forward(&self, name: &'static str, raw: u32) -> Result<f64, DomainError> {
        self.get(name).forward(raw, &self.calibration, name)
    }

    pub fn inverse(&self, name: &'static str, value: f64) -> Result<u32, DomainError> {
        self.get(name).inverse(value, &self.calibration, name)
    }
}

impl Default for ConversionTable {
    fn default() -> Self {
        Self::standard(Calibration::default())
    }
}
