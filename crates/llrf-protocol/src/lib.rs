//! # LLRF Protocol
//!
//! cPCI LLRF 板卡的用户态/内核态边界协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `command`: ioctl 命令码（7 个）
//! - `request`: 单值请求与波形请求的内存布局
//! - `registers`: FPGA 寄存器表（名称 → 偏移）
//! - `waveform`: 14 路原始波形的布局与解复用
//!
//! ## 字节序
//!
//! 寄存器窗口位于 x86 主机的 PCI BAR 上，波形样本按小端 `i16` 排列；
//! 请求结构体按 C 布局、主机字节序传递给驱动。

pub mod command;
pub mod registers;
pub mod request;
pub mod waveform;

// 重新导出常用类型
pub use command::*;
pub use registers::*;
pub use request::*;
pub use waveform::*;

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 未识别的命令码（不再静默忽略）
    #[error("Unknown command: 0x{code:08X}")]
    UnknownCommand { code: u32 },

    /// 批量读取长度必须是 4 的倍数
    #[error("Invalid bulk length: {length} (must be a non-negative multiple of 4)")]
    InvalidBulkLength { length: i64 },

    #[error("Invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// 寄存器访问位宽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegisterWidth {
    U8,
    U16,
    U32,
}

impl RegisterWidth {
    /// 位宽（bit）
    pub const fn bits(self) -> u32 {
        match self {
            RegisterWidth::U8 => 8,
            RegisterWidth::U16 => 16,
            RegisterWidth::U32 => 32,
        }
    }

    /// 字节数
    pub const fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// 该位宽可表示的最大值
    pub const fn max_value(self) -> u32 {
        match self {
            RegisterWidth::U8 => u8::MAX as u32,
            RegisterWidth::U16 => u16::MAX as u32,
            RegisterWidth::U32 => u32::MAX,
        }
    }

    /// 对应的读命令
    pub const fn read_command(self) -> Command {
        match self {
            RegisterWidth::U8 => Command::ReadU8,
            RegisterWidth::U16 => Command::ReadU16,
            RegisterWidth::U32 => Command::ReadU32,
        }
    }

    /// 对应的写命令
    pub const fn write_command(self) -> Command {
        match self {
            RegisterWidth::U8 => Command::WriteU8,
            RegisterWidth::U16 => Command::WriteU16,
            RegisterWidth::U32 => Command::WriteU32,
        }
    }
}

/// 检查批量读取长度
///
/// 批量传输只允许整字（4 字节）访问，逐字节路径太慢，不在热路径上使用。
pub fn check_bulk_length(length: i64) -> Result<(), ProtocolError> {
    if length < 0 || length % 4 != 0 {
        return Err(ProtocolError::InvalidBulkLength { length });
    }
    Ok(())
}
