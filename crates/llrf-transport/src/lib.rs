//! # LLRF Register Transport Layer
//!
//! 寄存器访问抽象层：对一个内存映射寄存器窗口发起定宽（8/16/32 位）读写与整字批量读取。
//!
//! - `chardev`: Linux 字符设备（`/dev/pci_llrf`）ioctl 实现
//! - `sim`: 模拟板卡（内存窗口 + 命令分发），用于测试和无硬件运行
//! - `shared`: 全局唯一的串行化句柄（一次只允许一个访问在途）
//!
//! 本层不做地址边界检查，调用方必须通过寄存器表解析偏移。
//! 单次访问没有超时：硬件挂死时调用方会一直阻塞。

use thiserror::Error;

pub use llrf_protocol::{
    Command, ProtocolError, RegisterWidth, ValueRequest, WaveformRequest, check_bulk_length,
};

#[cfg(target_os = "linux")]
pub mod chardev;

#[cfg(target_os = "linux")]
pub use chardev::CharDeviceTransport;

pub mod shared;
pub mod sim;

pub use shared::SharedTransport;
pub use sim::{FaultInjector, SimulatedBoard, SimulatedTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),
    #[error("Protocol Error: {0}")]
    Protocol(#[from] ProtocolError),
    /// 写入值超出寄存器位宽
    #[error("Value 0x{value:X} does not fit a {bits}-bit register")]
    ValueTooWide { value: u32, bits: u32 },
}

/// 设备错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    /// 设备不可用（未打开或已掉线）
    Offline,
    /// 请求被驱动拒绝
    Rejected,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NotFound | DeviceErrorKind::AccessDenied
        )
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl TransportError {
    /// 是否为未知命令错误
    pub fn is_unknown_command(&self) -> bool {
        matches!(self, TransportError::Protocol(ProtocolError::UnknownCommand { .. }))
    }

    /// 是否为批量长度错误
    pub fn is_invalid_bulk_length(&self) -> bool {
        matches!(
            self,
            TransportError::Protocol(ProtocolError::InvalidBulkLength { .. })
        )
    }
}

/// 寄存器传输接口
///
/// 每次调用都是一次真实的寄存器访问（无缓存、无写合并），
/// 代价按微秒量级估计。失败必须向上传播。
pub trait RegisterTransport {
    fn read_u8(&mut self, offset: u32) -> Result<u8, TransportError>;
    fn write_u8(&mut self, offset: u32, value: u8) -> Result<(), TransportError>;
    fn read_u16(&mut self, offset: u32) -> Result<u16, TransportError>;
    fn write_u16(&mut self, offset: u32, value: u16) -> Result<(), TransportError>;
    fn read_u32(&mut self, offset: u32) -> Result<u32, TransportError>;
    fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), TransportError>;

    /// 按位宽读取
    fn read(&mut self, width: RegisterWidth, offset: u32) -> Result<u32, TransportError> {
        match width {
            RegisterWidth::U8 => self.read_u8(offset).map(u32::from),
            RegisterWidth::U16 => self.read_u16(offset).map(u32::from),
            RegisterWidth::U32 => self.read_u32(offset),
        }
    }

    /// 按位宽写入，值超出位宽时拒绝（不截断）
    fn write(&mut self, width: RegisterWidth, offset: u32, value: u32) -> Result<(), TransportError> {
        if value > width.max_value() {
            return Err(TransportError::ValueTooWide {
                value,
                bits: width.bits(),
            });
        }
        match width {
            RegisterWidth::U8 => self.write_u8(offset, value as u8),
            RegisterWidth::U16 => self.write_u16(offset, value as u16),
            RegisterWidth::U32 => self.write_u32(offset, value),
        }
    }

    /// 批量读取 `buf.len()` 字节
    ///
    /// 长度不是 4 的倍数时在访问硬件之前失败。
    fn read_bulk(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        check_bulk_length(buf.len() as i64)?;
        self.read_words(offset, buf)
    }

    /// 批量读取并分配缓冲区
    fn read_bulk_vec(&mut self, offset: u32, length: usize) -> Result<Vec<u8>, TransportError> {
        check_bulk_length(length as i64)?;
        let mut buf = vec![0u8; length];
        self.read_words(offset, &mut buf)?;
        Ok(buf)
    }

    /// 整字读取（`buf.len()` 已保证为 4 的倍数）
    ///
    /// 默认实现逐字发起 32 位读，字内按小端存放。
    fn read_words(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        for (i, chunk) in buf.chunks_exact_mut(4).enumerate() {
            let word = self.read_u32(offset + (i as u32) * 4)?;
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn read_u8(&mut self, offset: u32) -> Result<u8, TransportError> {
        (**self).read_u8(offset)
    }
    fn write_u8(&mut self, offset: u32, value: u8) -> Result<(), TransportError> {
        (**self).write_u8(offset, value)
    }
    fn read_u16(&mut self, offset: u32) -> Result<u16, TransportError> {
        (**self).read_u16(offset)
    }
    fn write_u16(&mut self, offset: u32, value: u16) -> Result<(), TransportError> {
        (**self).write_u16(offset, value)
    }
    fn read_u32(&mut self, offset: u32) -> Result<u32, TransportError> {
        (**self).read_u32(offset)
    }
    fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), TransportError> {
        (**self).write_u32(offset, value)
    }
    fn read_words(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read_words(offset, buf)
    }
}
