//! 遥测存储
//!
//! 最新一帧的 23 路派生波形与单点投影。
//!
//! - 写：只有采集线程，每个周期整帧替换一次（[`ArcSwap`] 原子提交）
//! - 读：任意数量的消费者，拿到的要么是上一帧、要么是新一帧，不会混合
//!
//! 上一帧在没有读者持有时会被采集线程回收复用，稳态下不重新分配。

use arc_swap::{ArcSwap, ArcSwapOption};
use llrf_protocol::WAVEFORM_POINT;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;
use tracing::trace;

/// 派生通道数
pub const DERIVED_CHANNELS: usize = 23;

/// 单点投影位置参数名
pub const PROBE_INDEX_PARAM: &str = "waveform_single_point_position";

/// 派生通道
///
/// 判别值即在快照中的序号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum DerivedChannel {
    Cav2Amp,
    Cav2Phase,
    Cav1Amp,
    Cav1Phase,
    Fwd1Amp,
    Fwd1Phase,
    Fwd1Power,
    Rfl1Amp,
    Rfl1Phase,
    Rfl1Power,
    Vswr1,
    Fwd2Amp,
    Fwd2Phase,
    Fwd2Power,
    Rfl2Amp,
    Rfl2Phase,
    Rfl2Power,
    Vswr2,
    InPower,
    FwdPower,
    RflPower,
    DacAmp,
    DacPhase,
}

const WAVEFORM_NAMES: [&str; DERIVED_CHANNELS] = [
    "waveform_CAV2_amp",
    "waveform_CAV2_phase",
    "waveform_CAV1_amp",
    "waveform_CAV1_phase",
    "waveform_fwd1_amp",
    "waveform_fwd1_phase",
    "waveform_fwd1_power",
    "waveform_rfl1_amp",
    "waveform_rfl1_phase",
    "waveform_rfl1_power",
    "waveform_CAV_VSWR1",
    "waveform_fwd2_amp",
    "waveform_fwd2_phase",
    "waveform_fwd2_power",
    "waveform_rfl2_amp",
    "waveform_rfl2_phase",
    "waveform_rfl2_power",
    "waveform_CAV_VSWR2",
    "waveform_CAV_inpower",
    "waveform_CAV_fwdpower",
    "waveform_CAV_rflpower",
    "waveform_DAC_amp",
    "waveform_DAC_phase",
];

const PROBE_NAMES: [&str; DERIVED_CHANNELS] = [
    "waveform_single_point_CAV2_amp",
    "waveform_single_point_CAV2_phase",
    "waveform_single_point_CAV1_amp",
    "waveform_single_point_CAV1_phase",
    "waveform_single_point_fwd1_amp",
    "waveform_single_point_fwd1_phase",
    "waveform_single_point_fwd1_power",
    "waveform_single_point_rfl1_amp",
    "waveform_single_point_rfl1_phase",
    "waveform_single_point_rfl1_power",
    "waveform_single_point_CAV_VSWR1",
    "waveform_single_point_fwd2_amp",
    "waveform_single_point_fwd2_phase",
    "waveform_single_point_fwd2_power",
    "waveform_single_point_rfl2_amp",
    "waveform_single_point_rfl2_phase",
    "waveform_single_point_rfl2_power",
    "waveform_single_point_CAV_VSWR2",
    "waveform_single_point_CAV_inpower",
    "waveform_single_point_CAV_fwdpower",
    "waveform_single_point_CAV_rflpower",
    "waveform_single_point_DAC_amp",
    "waveform_single_point_DAC_phase",
];

impl DerivedChannel {
    pub const ALL: [DerivedChannel; DERIVED_CHANNELS] = [
        DerivedChannel::Cav2Amp,
        DerivedChannel::Cav2Phase,
        DerivedChannel::Cav1Amp,
        DerivedChannel::Cav1Phase,
        DerivedChannel::Fwd1Amp,
        DerivedChannel::Fwd1Phase,
        DerivedChannel::Fwd1Power,
        DerivedChannel::Rfl1Amp,
        DerivedChannel::Rfl1Phase,
        DerivedChannel::Rfl1Power,
        DerivedChannel::Vswr1,
        DerivedChannel::Fwd2Amp,
        DerivedChannel::Fwd2Phase,
        DerivedChannel::Fwd2Power,
        DerivedChannel::Rfl2Amp,
        DerivedChannel::Rfl2Phase,
        DerivedChannel::Rfl2Power,
        DerivedChannel::Vswr2,
        DerivedChannel::InPower,
        DerivedChannel::FwdPower,
        DerivedChannel::RflPower,
        DerivedChannel::DacAmp,
        DerivedChannel::DacPhase,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// 波形参数名（如 `waveform_CAV_VSWR1`）
    pub const fn name(self) -> &'static str {
        WAVEFORM_NAMES[self.index()]
    }

    /// 单点投影参数名（如 `waveform_single_point_CAV_VSWR1`）
    pub const fn probe_name(self) -> &'static str {
        PROBE_NAMES[self.index()]
    }

    /// 按波形参数名或单点参数名查找
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ch| ch.name() == name || ch.probe_name() == name)
    }
}

/// 一帧完整的派生波形
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    /// 发布序号（第一次发布为 1，启动时的全零帧为 0）
    pub cycle: u64,
    /// 波形读取完成的时间
    pub acquired_at: SystemTime,
    channels: Vec<f64>,
    domain_faults: [u32; DERIVED_CHANNELS],
}

impl TelemetrySnapshot {
    /// 启动时的全零帧
    pub fn zeroed() -> Self {
        Self {
            cycle: 0,
            acquired_at: SystemTime::UNIX_EPOCH,
            channels: vec![0.0; DERIVED_CHANNELS * WAVEFORM_POINT],
            domain_faults: [0; DERIVED_CHANNELS],
        }
    }

    pub fn channel(&self, channel: DerivedChannel) -> &[f64] {
        let start = channel.index() * WAVEFORM_POINT;
        &self.channels[start..start + WAVEFORM_POINT]
    }

    pub fn channel_mut(&mut self, channel: DerivedChannel) -> &mut [f64] {
        let start = channel.index() * WAVEFORM_POINT;
        &mut self.channels[start..start + WAVEFORM_POINT]
    }

    /// 该通道本帧无定义（NaN）的点数
    pub fn domain_faults(&self, channel: DerivedChannel) -> u32 {
        self.domain_faults[channel.index()]
    }

    pub fn total_domain_faults(&self) -> u32 {
        self.domain_faults.iter().sum()
    }

    pub(crate) fn set_domain_faults(&mut self, channel: DerivedChannel, count: u32) {
        self.domain_faults[channel.index()] = count;
    }

    /// 写入第 `index` 个采样点的全部通道值
    pub(crate) fn set_point(&mut self, index: usize, values: &[f64; DERIVED_CHANNELS]) {
        for (channel, &value) in values.iter().enumerate() {
            self.channels[channel * WAVEFORM_POINT + index] = value;
        }
    }

    /// 是否已经过至少一次发布
    pub fn is_published(&self) -> bool {
        self.cycle > 0
    }

    /// 在 `index` 处对全部通道取值
    pub fn project(&self, index: usize) -> Option<ProbeSnapshot> {
        if index >= WAVEFORM_POINT {
            return None;
        }
        let mut values = [0.0; DERIVED_CHANNELS];
        for channel in DerivedChannel::ALL {
            values[channel.index()] = self.channel(channel)[index];
        }
        Some(ProbeSnapshot {
            index,
            cycle: self.cycle,
            values,
        })
    }
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// 单点投影
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSnapshot {
    pub index: usize,
    /// 来源帧的发布序号
    pub cycle: u64,
    pub values: [f64; DERIVED_CHANNELS],
}

impl ProbeSnapshot {
    pub fn value(&self, channel: DerivedChannel) -> f64 {
        self.values[channel.index()]
    }

    /// `(单点参数名, 值)` 列表
    pub fn named_values(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        DerivedChannel::ALL
            .into_iter()
            .map(|ch| (ch.probe_name(), self.value(ch)))
    }
}

/// 遥测存储
#[derive(Debug)]
pub struct TelemetryStore {
    snapshot: ArcSwap<TelemetrySnapshot>,
    probe: ArcSwapOption<ProbeSnapshot>,
    probe_index: AtomicI64,
}

impl TelemetryStore {
    pub fn new(probe_index: i64) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(TelemetrySnapshot::zeroed()),
            probe: ArcSwapOption::empty(),
            probe_index: AtomicI64::new(probe_index),
        }
    }

    /// 最新一帧（无锁读取）
    pub fn load(&self) -> Arc<TelemetrySnapshot> {
        self.snapshot.load_full()
    }

    /// 最新发布序号
    pub fn cycle(&self) -> u64 {
        self.snapshot.load().cycle
    }

    /// 最新单点投影（从未投影过时为 `None`）
    pub fn probe(&self) -> Option<Arc<ProbeSnapshot>> {
        self.probe.load_full()
    }

    pub fn probe_index(&self) -> i64 {
        self.probe_index.load(Ordering::Acquire)
    }

    /// 设置投影位置
    ///
    /// 任何值都接受；超出 `[0, 4095]` 时后续周期跳过投影（不钳位）。
    pub fn set_probe_index(&self, index: i64) {
        self.probe_index.store(index, Ordering::Release);
    }

    /// 提交新一帧并重算单点投影，返回被替换的上一帧
    pub fn publish(&self, snapshot: TelemetrySnapshot) -> Arc<TelemetrySnapshot> {
        let next = Arc::new(snapshot);
        let previous = self.snapshot.swap(next.clone());
        self.project(&next);
        previous
    }

    fn project(&self, snapshot: &TelemetrySnapshot) {
        let index = self.probe_index();
        match usize::try_from(index).ok().and_then(|i| snapshot.project(i)) {
            Some(probe) => self.probe.store(Some(Arc::new(probe))),
            None => trace!("Probe index {} outside waveform, projection skipped", index),
        }
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(cycle: u64) -> TelemetrySnapshot {
        let mut snapshot = TelemetrySnapshot::zeroed();
        snapshot.cycle = cycle;
        for channel in DerivedChannel::ALL {
            for (i, v) in snapshot.channel_mut(channel).iter_mut().enumerate() {
                *v = (channel.index() * 10_000 + i) as f64;
            }
        }
        snapshot
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(DerivedChannel::ALL.len(), 23);
        assert_eq!(DerivedChannel::Cav2Amp.name(), "waveform_CAV2_amp");
        assert_eq!(DerivedChannel::Vswr1.name(), "waveform_CAV_VSWR1");
        assert_eq!(DerivedChannel::DacPhase.probe_name(), "waveform_single_point_DAC_phase");
        for (i, ch) in DerivedChannel::ALL.iter().enumerate() {
            assert_eq!(ch.index(), i);
            assert_eq!(
                ch.probe_name(),
                ch.name().replace("waveform_", "waveform_single_point_")
            );
            assert_eq!(DerivedChannel::from_name(ch.name()), Some(*ch));
            assert_eq!(DerivedChannel::from_name(ch.probe_name()), Some(*ch));
        }
        assert_eq!(DerivedChannel::from_name(PROBE_INDEX_PARAM), None);
    }

    #[test]
    fn test_initial_store_is_zeroed() {
        let store = TelemetryStore::default();
        let snapshot = store.load();
        assert_eq!(snapshot.cycle, 0);
        assert!(!snapshot.is_published());
        assert!(snapshot.channel(DerivedChannel::InPower).iter().all(|&v| v == 0.0));
        assert!(store.probe().is_none());
    }

    #[test]
    fn test_publish_projects_probe() {
        let store = TelemetryStore::new(17);
        let previous = store.publish(filled(1));
        assert_eq!(previous.cycle, 0);

        let probe = store.probe().unwrap();
        assert_eq!(probe.index, 17);
        assert_eq!(probe.cycle, 1);
        let snapshot = store.load();
        for ch in DerivedChannel::ALL {
            assert_eq!(probe.value(ch), snapshot.channel(ch)[17]);
        }
    }

    #[test]
    fn test_out_of_range_probe_is_skipped() {
        let store = TelemetryStore::new(5);
        store.publish(filled(1));
        assert_eq!(store.probe().unwrap().cycle, 1);

        for index in [-1, 4096, i64::MAX] {
            store.set_probe_index(index);
            store.publish(filled(2));
            // 投影保持上一次的值，不钳位
            let probe = store.probe().unwrap();
            assert_eq!((probe.index, probe.cycle), (5, 1));
        }
        assert_eq!(store.cycle(), 2);

        store.set_probe_index(4095);
        store.publish(filled(3));
        assert_eq!(store.probe().unwrap().index, 4095);
    }

    #[test]
    fn test_previous_snapshot_can_be_recycled() {
        let store = TelemetryStore::default();
        store.publish(filled(1));
        let previous = store.publish(filled(2));
        // 没有读者持有上一帧时可以取回所有权
        let recycled = Arc::try_unwrap(previous).unwrap();
        assert_eq!(recycled.cycle, 1);
    }

    #[test]
    fn test_domain_fault_counts() {
        let mut snapshot = TelemetrySnapshot::zeroed();
        snapshot.set_domain_faults(DerivedChannel::Vswr1, 3);
        snapshot.set_domain_faults(DerivedChannel::Vswr2, 4);
        assert_eq!(snapshot.domain_faults(DerivedChannel::Vswr1), 3);
        assert_eq!(snapshot.total_domain_faults(), 7);
    }

    #[test]
    fn test_named_values() {
        let probe = filled(1).project(2).unwrap();
        let named: Vec<_> = probe.named_values().collect();
        assert_eq!(named.len(), 23);
        assert_eq!(named[0], ("waveform_single_point_CAV2_amp", 2.0));
    }
}
