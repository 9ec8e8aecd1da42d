//! Linux 字符设备传输
//!
//! 通过 `/dev/pci_llrf` 的 ioctl 接口访问 FPGA 寄存器窗口。
//! 内核驱动负责 BAR 映射，用户态只传递 `IO_VALUE` 结构体。

use crate::{DeviceError, DeviceErrorKind, RegisterTransport, TransportError};
use llrf_protocol::{Command, IoWaveform, RegisterWidth, ValueRequest, WaveformRequest};
use nix::{ioctl_read_bad, ioctl_write_ptr_bad};
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 默认设备节点
pub const DEFAULT_DEVICE_PATH: &str = "/dev/pci_llrf";

ioctl_read_bad!(rd_value_8, Command::ReadU8.request_code(), ValueRequest);
ioctl_write_ptr_bad!(wr_value_8, Command::WriteU8.request_code(), ValueRequest);
ioctl_read_bad!(rd_value_16, Command::ReadU16.request_code(), ValueRequest);
ioctl_write_ptr_bad!(wr_value_16, Command::WriteU16.request_code(), ValueRequest);
ioctl_read_bad!(rd_value_32, Command::ReadU32.request_code(), ValueRequest);
ioctl_write_ptr_bad!(wr_value_32, Command::WriteU32.request_code(), ValueRequest);
ioctl_read_bad!(rd_waveform, Command::ReadWaveform.request_code(), IoWaveform);

/// 字符设备传输
#[derive(Debug)]
pub struct CharDeviceTransport {
    file: File,
    path: PathBuf,
}

impl CharDeviceTransport {
    /// 以读写方式打开设备节点
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                let kind = match e.kind() {
                    std::io::ErrorKind::NotFound => DeviceErrorKind::NotFound,
                    std::io::ErrorKind::PermissionDenied => DeviceErrorKind::AccessDenied,
                    _ => DeviceErrorKind::Unknown,
                };
                DeviceError::new(kind, format!("failed to open {}: {}", path.display(), e))
            })?;
        info!("Opened LLRF device {} (fd {})", path.display(), file.as_raw_fd());
        Ok(Self { file, path })
    }

    /// 打开默认设备节点
    pub fn open_default() -> Result<Self, TransportError> {
        Self::open(DEFAULT_DEVICE_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_value(&mut self, width: RegisterWidth, offset: u32) -> Result<u32, TransportError> {
        let mut request = ValueRequest::read(offset);
        let fd = self.file.as_raw_fd();
        // SAFETY: `request` 是有效的 `#[repr(C)]` 结构体，在调用期间独占借用；
        // 驱动只在该结构体范围内读写。
        let result = unsafe {
            match width {
                RegisterWidth::U8 => rd_value_8(fd, &mut request),
                RegisterWidth::U16 => rd_value_16(fd, &mut request),
                RegisterWidth::U32 => rd_value_32(fd, &mut request),
            }
        };
        result.map_err(|errno| rejected(width.read_command(), offset, errno))?;
        Ok(request.value(width))
    }

    fn write_value(
        &mut self,
        width: RegisterWidth,
        offset: u32,
        value: u32,
    ) -> Result<(), TransportError> {
        let request = ValueRequest::write(width, offset, value);
        let fd = self.file.as_raw_fd();
        // SAFETY: 同上，驱动只读取该结构体。
        let result = unsafe {
            match width {
                RegisterWidth::U8 => wr_value_8(fd, &request),
                RegisterWidth::U16 => wr_value_16(fd, &request),
                RegisterWidth::U32 => wr_value_32(fd, &request),
            }
        };
        result.map_err(|errno| rejected(width.write_command(), offset, errno))?;
        debug!("{:?} offset={} value=0x{:X}", width.write_command(), offset, value);
        Ok(())
    }

    /// `ReadWaveform` 命令：驱动逐字节拷贝到调用方缓冲区
    ///
    /// 比 [`RegisterTransport::read_bulk`] 慢得多，采集路径不使用；
    /// 保留用于与逐字节读取结果做比对。`buffer` 长度必须等于请求长度。
    pub fn read_waveform_ioctl(
        &mut self,
        request: WaveformRequest,
        buffer: &mut [u8],
    ) -> Result<(), TransportError> {
        let mut io = IoWaveform::for_buffer(request, buffer)?;
        let fd = self.file.as_raw_fd();
        // SAFETY: `io.buffer` 指向独占借用的 `buffer`，长度已与 `io.length` 校验一致，
        // 在调用返回前保持有效。
        let result = unsafe { rd_waveform(fd, &mut io) };
        result.map_err(|errno| rejected(Command::ReadWaveform, request.offset(), errno))?;
        debug!("ReadWaveform offset=0x{:X} len={}", request.offset(), request.len());
        Ok(())
    }
}

fn rejected(command: Command, offset: u32, errno: nix::errno::Errno) -> TransportError {
    let kind = match errno {
        nix::errno::Errno::ENODEV | nix::errno::Errno::EBADF => DeviceErrorKind::Offline,
        nix::errno::Errno::EACCES | nix::errno::Errno::EPERM => DeviceErrorKind::AccessDenied,
        _ => DeviceErrorKind::Rejected,
    };
    DeviceError::new(kind, format!("{:?} at offset {} failed: {}", command, offset, errno)).into()
}

impl RegisterTransport for CharDeviceTransport {
    fn read_u8(&mut self, offset: u32) -> Result<u8, TransportError> {
        self.read_value(RegisterWidth::U8, offset).map(|v| v as u8)
    }

    fn write_u8(&mut self, offset: u32, value: u8) -> Result<(), TransportError> {
        self.write_value(RegisterWidth::U8, offset, value as u32)
    }

    fn read_u16(&mut self, offset: u32) -> Result<u16, TransportError> {
        self.read_value(RegisterWidth::U16, offset).map(|v| v as u16)
    }

    fn write_u16(&mut self, offset: u32, value: u16) -> Result<(), TransportError> {
        self.write_value(RegisterWidth::U16, offset, value as u32)
    }

    fn read_u32(&mut self, offset: u32) -> Result<u32, TransportError> {
        self.read_value(RegisterWidth::U32, offset)
    }

    fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), TransportError> {
        self.write_value(RegisterWidth::U32, offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = CharDeviceTransport::open("/dev/__llrf_missing__").unwrap_err();
        match err {
            TransportError::Device(e) => {
                assert_eq!(e.kind, DeviceErrorKind::NotFound);
                assert!(e.is_fatal());
            },
            other => panic!("Expected Device error, got {:?}", other),
        }
    }

    #[test]
    fn test_ioctl_on_regular_file_is_rejected() {
        // 普通文件不支持这些 ioctl，驱动层错误必须被传播而不是忽略
        let path = std::env::temp_dir().join(format!("llrf-chardev-{}", std::process::id()));
        std::fs::write(&path, [0u8; 16]).unwrap();
        let mut transport = CharDeviceTransport::open(&path).unwrap();
        assert!(transport.read_u32(0).is_err());
        assert!(transport.write_u32(0, 1).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_waveform_ioctl_errors() {
        let path = std::env::temp_dir().join(format!("llrf-chardev-wf-{}", std::process::id()));
        std::fs::write(&path, [0u8; 16]).unwrap();
        let mut transport = CharDeviceTransport::open(&path).unwrap();
        let request = WaveformRequest::new(0, 8).unwrap();

        // 缓冲区长度不符：在发出 ioctl 之前拒绝
        let mut short = [0u8; 4];
        assert!(matches!(
            transport.read_waveform_ioctl(request, &mut short),
            Err(TransportError::Protocol(_))
        ));

        // 普通文件返回 ENOTTY，映射为 Rejected
        let mut buffer = [0u8; 8];
        match transport.read_waveform_ioctl(request, &mut buffer).unwrap_err() {
            TransportError::Device(e) => assert_eq!(e.kind, DeviceErrorKind::Rejected),
            other => panic!("Expected Device error, got {:?}", other),
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_errno_mapping() {
        use nix::errno::Errno;
        let kind = |errno| match rejected(Command::ReadWaveform, 0, errno) {
            TransportError::Device(e) => e.kind,
            other => panic!("Expected Device error, got {:?}", other),
        };
        assert_eq!(kind(Errno::ENODEV), DeviceErrorKind::Offline);
        assert_eq!(kind(Errno::EBADF), DeviceErrorKind::Offline);
        assert_eq!(kind(Errno::EPERM), DeviceErrorKind::AccessDenied);
        assert_eq!(kind(Errno::ENOTTY), DeviceErrorKind::Rejected);
    }
}
