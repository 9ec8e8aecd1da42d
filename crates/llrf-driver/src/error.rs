//! 驱动层错误类型定义

use llrf_protocol::ProtocolError;
use llrf_transport::TransportError;
use thiserror::Error;

/// 换算无定义时的错误
///
/// 换算结果为无穷大或 NaN 时不会静默返回，而是用该错误显式上报。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 分母为零（VSWR 前向功率等于反射功率，或反射系数 t = 1）
    #[error("{quantity}: division by zero")]
    DivisionByZero { quantity: &'static str },

    /// 结果不是有限值（如负数开方）
    #[error("{quantity}: result is not finite")]
    NotFinite { quantity: &'static str },

    /// 反向换算结果超出寄存器可表示范围
    #[error("{quantity}: {value} does not fit the register")]
    OutOfRange { quantity: &'static str, value: f64 },
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 寄存器访问失败
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 换算无定义
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// 参数名不在寄存器表中
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// 写入只读状态寄存器
    #[error("Parameter is read-only: {0}")]
    ReadOnly(String),

    /// 采集线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 操作超时（仅用于等待采集结果，寄存器访问本身没有超时）
    #[error("Operation timeout")]
    Timeout,
}

impl DriverError {
    /// 是否为设备不可用类错误
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::Transport(_))
    }
}
