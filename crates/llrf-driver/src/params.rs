//! 参数访问
//!
//! 按名称读写板卡参数：寄存器表解析偏移，换算表完成工程量换算，
//! 每次成功访问后更新参数缓存。
//!
//! 两类参数不经过寄存器：
//! - `waveform_single_point_position`：投影位置，保存在遥测存储中
//! - `waveform_single_point_*`：最新一次单点投影的值（只读）

use crate::convert::ConversionTable;
use crate::error::DriverError;
use crate::telemetry::{DerivedChannel, PROBE_INDEX_PARAM, TelemetryStore};
use llrf_protocol::{MANUAL_CLEAR, RegisterDescriptor, RegisterKind, RegisterMap};
use llrf_transport::{RegisterTransport, SharedTransport};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// 手动清除脉冲的保持时间
pub const MANUAL_CLEAR_HOLD: Duration = Duration::from_millis(500);

/// 参数值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Int(v) => v as f64,
            ParamValue::Float(v) => v,
        }
    }

    /// 整数值（浮点向零截断）
    pub fn as_i64(self) -> i64 {
        match self {
            ParamValue::Int(v) => v,
            ParamValue::Float(v) => v.trunc() as i64,
        }
    }

    fn of_kind(kind: RegisterKind, value: f64) -> Self {
        match kind {
            RegisterKind::Int => ParamValue::Int(value.trunc() as i64),
            RegisterKind::Float => ParamValue::Float(value),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// 按名称访问的参数集合
pub struct Parameters {
    transport: SharedTransport,
    map: RegisterMap,
    conversions: Arc<ConversionTable>,
    cache: RwLock<HashMap<&'static str, ParamValue>>,
    store: Arc<TelemetryStore>,
}

impl Parameters {
    pub fn new(
        transport: SharedTransport,
        map: RegisterMap,
        conversions: Arc<ConversionTable>,
        store: Arc<TelemetryStore>,
    ) -> Self {
        Self {
            transport,
            map,
            conversions,
            cache: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn conversions(&self) -> &ConversionTable {
        &self.conversions
    }

    fn descriptor(&self, name: &str) -> Result<&'static RegisterDescriptor, DriverError> {
        self.map
            .lookup(name)
            .ok_or_else(|| DriverError::UnknownParameter(name.to_string()))
    }

    /// 读取参数（每次都访问硬件）
    ///
    /// 整数类参数的换算结果向零截断。
    pub fn read(&self, name: &str) -> Result<ParamValue, DriverError> {
        if name == PROBE_INDEX_PARAM {
            return Ok(ParamValue::Int(self.store.probe_index()));
        }
        if let Some(channel) = DerivedChannel::from_name(name).filter(|ch| ch.probe_name() == name) {
            let value = self.store.probe().map_or(0.0, |probe| probe.value(channel));
            return Ok(ParamValue::Float(value));
        }

        let desc = self.descriptor(name)?;
        let raw = self.transport.with(|t| t.read(desc.width, desc.offset))?;
        let value = ParamValue::of_kind(desc.kind, self.conversions.forward(desc.name, raw)?);
        self.cache.write().insert(desc.name, value);
        debug!("read {} @0x{:X}: raw 0x{:08X} -> {}", desc.name, desc.offset, raw, value);
        Ok(value)
    }

    /// 写入参数
    ///
    /// `manual_Clear` 写 1 时产生 500 ms 脉冲：期间独占传输，其他访问全部等待。
    pub fn write(&self, name: &str, value: impl Into<ParamValue>) -> Result<(), DriverError> {
        let value = value.into();
        if name == PROBE_INDEX_PARAM {
            self.store.set_probe_index(value.as_i64());
            debug!("probe index set to {}", value.as_i64());
            return Ok(());
        }
        if DerivedChannel::from_name(name).is_some() {
            return Err(DriverError::ReadOnly(name.to_string()));
        }

        let desc = self.descriptor(name)?;
        if !desc.is_writable() {
            return Err(DriverError::ReadOnly(desc.name.to_string()));
        }
        if desc.name == MANUAL_CLEAR && value.as_i64() == 1 {
            return self.pulse_manual_clear(desc);
        }

        let raw = self.conversions.inverse(desc.name, value.as_f64())?;
        self.transport.with(|t| t.write(desc.width, desc.offset, raw))?;
        // 缓存寄存器中实际保存的值（反向换算已取整）
        let cached = ParamValue::of_kind(desc.kind, self.conversions.forward(desc.name, raw)?);
        self.cache.write().insert(desc.name, cached);
        debug!("write {} @0x{:X}: {} -> raw 0x{:08X}", desc.name, desc.offset, cached, raw);
        Ok(())
    }

    fn pulse_manual_clear(&self, desc: &'static RegisterDescriptor) -> Result<(), DriverError> {
        let mut transport = self.transport.lock();
        let started = Instant::now();

        transport.write(desc.width, desc.offset, 1)?;
        self.cache.write().insert(desc.name, ParamValue::Int(1));
        spin_sleep::sleep(MANUAL_CLEAR_HOLD);
        if let Err(e) = transport.write(desc.width, desc.offset, 0) {
            error!("Manual clear pulse could not be released: {}", e);
            return Err(e.into());
        }
        self.cache.write().insert(desc.name, ParamValue::Int(0));
        let held = started.elapsed();
        drop(transport);

        info!("Manual clear pulse held for {:?}", held);
        Ok(())
    }

    /// 最近一次成功读写的值（不访问硬件）
    pub fn cached(&self, name: &str) -> Option<ParamValue> {
        self.cache.read().get(name).copied()
    }

    /// 读取寄存器表中的全部参数
    ///
    /// 单个参数失败不影响其余参数。
    pub fn read_all(&self) -> Vec<(&'static str, Result<ParamValue, DriverError>)> {
        self.map.iter().map(|desc| (desc.name, self.read(desc.name))).collect()
    }
}

impl fmt::Debug for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("registers", &self.map.len())
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetrySnapshot;
    use llrf_transport::SimulatedBoard;
    use std::thread;

    fn params(board: &SimulatedBoard) -> Arc<Parameters> {
        Arc::new(Parameters::new(
            SharedTransport::new(board.transport()),
            RegisterMap::standard(),
            Arc::new(ConversionTable::default()),
            Arc::new(TelemetryStore::new(10)),
        ))
    }

    fn offset(name: &str) -> u32 {
        RegisterMap::standard().resolve(name).unwrap()
    }

    #[test]
    fn test_read_applies_conversion() {
        let board = SimulatedBoard::new();
        let params = params(&board);

        board.poke_u32(offset("sp_phase"), 16384);
        assert_eq!(params.read("sp_phase").unwrap(), ParamValue::Float(90.0));
        assert_eq!(params.cached("sp_phase"), Some(ParamValue::Float(90.0)));

        board.poke_u32(offset("lock_en"), (-3i32) as u32);
        assert_eq!(params.read("lock_en").unwrap(), ParamValue::Int(-3));
    }

    #[test]
    fn test_int_kind_truncates() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        // 3 · 6.25 / 1000 = 0.01875 → 0
        board.poke_u32(offset("PRT_Start_count"), 3);
        assert_eq!(params.read("PRT_Start_count").unwrap(), ParamValue::Int(0));
        board.poke_u32(offset("PRT_Start_count"), 400);
        assert_eq!(params.read("PRT_Start_count").unwrap(), ParamValue::Int(2));
    }

    #[test]
    fn test_write_inverse_rounds() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        params.write("sp_phase", -90.0).unwrap();
        assert_eq!(board.peek_u32(offset("sp_phase")), (-16384i32) as u32);
        params.write("Qset", 12.3456).unwrap();
        assert_eq!(board.peek_u32(offset("Qset")), 12346);
        assert_eq!(params.cached("Qset"), Some(ParamValue::Int(12)));
    }

    #[test]
    fn test_write_caches_register_value() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        // 45.001° → round(8192.18) = 8192 → 45.0°
        params.write("sp_phase", 45.001).unwrap();
        assert_eq!(board.peek_u32(offset("sp_phase")), 8192);
        assert_eq!(params.cached("sp_phase"), Some(ParamValue::Float(45.0)));
        assert_eq!(params.read("sp_phase").unwrap(), params.cached("sp_phase").unwrap());
    }

    #[test]
    fn test_unknown_and_read_only() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        assert!(matches!(
            params.read("__missing__"),
            Err(DriverError::UnknownParameter(_))
        ));
        assert!(matches!(
            params.write("rd_reg_state", 1),
            Err(DriverError::ReadOnly(_))
        ));
        assert!(matches!(
            params.write("waveform_single_point_CAV_VSWR1", 1.0),
            Err(DriverError::ReadOnly(_))
        ));
        assert!(board.write_log().is_empty());
    }

    #[test]
    fn test_probe_parameters_served_from_store() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        assert_eq!(params.read(PROBE_INDEX_PARAM).unwrap(), ParamValue::Int(10));

        params.write(PROBE_INDEX_PARAM, 4096).unwrap();
        assert_eq!(params.read(PROBE_INDEX_PARAM).unwrap(), ParamValue::Int(4096));
        params.write(PROBE_INDEX_PARAM, 3).unwrap();

        let mut snapshot = TelemetrySnapshot::zeroed();
        snapshot.cycle = 1;
        snapshot.channel_mut(DerivedChannel::DacAmp)[3] = 42.0;
        params.store.publish(snapshot);
        assert_eq!(
            params.read("waveform_single_point_DAC_amp").unwrap(),
            ParamValue::Float(42.0)
        );
        // 投影位置不占寄存器
        assert!(board.write_log().is_empty());
    }

    #[test]
    fn test_transport_failure_propagates() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        board.set_offline(true);
        let err = params.read("lock_en").unwrap_err();
        assert!(err.is_transport());
        assert_eq!(params.cached("lock_en"), None);
    }

    #[test]
    fn test_manual_clear_pulse_is_exclusive() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        let clear = offset(MANUAL_CLEAR);
        let lock_en = offset("lock_en");

        let pulse = {
            let params = params.clone();
            thread::spawn(move || params.write(MANUAL_CLEAR, 1))
        };
        // 等待脉冲开始
        while board.write_log().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        params.write("lock_en", 1).unwrap();
        pulse.join().unwrap().unwrap();

        let log = board.write_log();
        let entries: Vec<_> = log.iter().map(|w| (w.offset, w.value)).collect();
        assert_eq!(entries, vec![(clear, 1), (clear, 0), (lock_en, 1)]);
        assert!(log[1].at.duration_since(log[0].at) >= MANUAL_CLEAR_HOLD);
        assert_eq!(params.cached(MANUAL_CLEAR), Some(ParamValue::Int(0)));
    }

    #[test]
    fn test_manual_clear_zero_is_plain_write() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        params.write(MANUAL_CLEAR, 0).unwrap();
        assert_eq!(board.write_log().len(), 1);
    }

    #[test]
    fn test_read_all() {
        let board = SimulatedBoard::new();
        let params = params(&board);
        let all = params.read_all();
        assert_eq!(all.len(), 91);
        assert!(all.iter().all(|(_, r)| r.is_ok()));
    }
}
