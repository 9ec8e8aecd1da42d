//! 采集状态
//!
//! 采集循环的状态机：Idle → Fetching → Converting → Publishing → Idle。
//! 状态保存在原子变量中，任何线程都可以观察当前所处阶段。

use std::sync::atomic::{AtomicU8, Ordering};

/// 采集循环所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AcquisitionState {
    /// 两个周期之间（或尚未启动）
    #[default]
    Idle = 0,
    /// 批量读取波形区
    Fetching = 1,
    /// 解复用并计算派生通道
    Converting = 2,
    /// 提交到遥测存储并触发钩子
    Publishing = 3,
}

impl AcquisitionState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Idle。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Fetching,
            2 => Self::Converting,
            3 => Self::Publishing,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否正在执行周期
    pub fn is_busy(self) -> bool {
        self != Self::Idle
    }
}

/// 采集状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicAcquisitionState {
    inner: AtomicU8,
}

impl AtomicAcquisitionState {
    pub fn new(state: AcquisitionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> AcquisitionState {
        AcquisitionState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: AcquisitionState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }
}
