//! ioctl 命令码定义
//!
//! 驱动提供 7 个命令：6 个单值读写（8/16/32 位 × 读/写）加 1 个波形批量读取。
//! 命令码按 Linux `_IOR`/`_IOW` 规则编码，magic 为 `'a'`，序号为 `'a'..='g'`。
//! 参数类型在驱动头文件中声明为指针，因此编码的 size 字段为指针宽度。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// ioctl magic（类型字段）
pub const IOCTL_MAGIC: u8 = b'a';

// Linux asm-generic/ioctl.h
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

/// 命令参数的编码宽度（参数声明为 `IO_VALUE *` / `IO_WAVEFORM *`）
const ARG_SIZE: u32 = std::mem::size_of::<usize>() as u32;

const fn ioc(dir: u32, ty: u8, nr: u8, size: u32) -> u32 {
    (dir << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | (size << IOC_SIZESHIFT)
}

/// 驱动命令
///
/// 判别值即 ioctl 序号（nr 字段）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    ReadU8 = b'a',
    WriteU8 = b'b',
    ReadU16 = b'c',
    WriteU16 = b'd',
    ReadU32 = b'e',
    WriteU32 = b'f',
    ReadWaveform = b'g',
}

impl Command {
    /// 全部命令（按序号排列）
    pub const ALL: [Command; 7] = [
        Command::ReadU8,
        Command::WriteU8,
        Command::ReadU16,
        Command::WriteU16,
        Command::ReadU32,
        Command::WriteU32,
        Command::ReadWaveform,
    ];

    /// 是否为写命令
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Command::WriteU8 | Command::WriteU16 | Command::WriteU32
        )
    }

    /// 完整的 ioctl 请求码
    pub const fn request_code(self) -> u32 {
        let dir = if self.is_write() { IOC_WRITE } else { IOC_READ };
        ioc(dir, IOCTL_MAGIC, self as u8, ARG_SIZE)
    }

    /// 从 ioctl 请求码解析命令
    ///
    /// magic、方向、size 任一不匹配都视为未知命令。
    pub fn from_request_code(code: u32) -> Result<Self, ProtocolError> {
        let ty = ((code >> IOC_TYPESHIFT) & 0xFF) as u8;
        let nr = ((code >> IOC_NRSHIFT) & 0xFF) as u8;
        if ty != IOCTL_MAGIC {
            return Err(ProtocolError::UnknownCommand { code });
        }
        let command =
            Command::try_from(nr).map_err(|_| ProtocolError::UnknownCommand { code })?;
        if command.request_code() != code {
            return Err(ProtocolError::UnknownCommand { code });
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_request_codes_64bit() {
        // _IOR('a', 'a', IO_VALUE *) on x86_64
        assert_eq!(Command::ReadU8.request_code(), 0x8008_6161);
        // _IOW('a', 'b', IO_VALUE *)
        assert_eq!(Command::WriteU8.request_code(), 0x4008_6162);
        assert_eq!(Command::ReadU32.request_code(), 0x8008_6165);
        assert_eq!(Command::WriteU32.request_code(), 0x4008_6166);
        assert_eq!(Command::ReadWaveform.request_code(), 0x8008_6167);
    }

    #[test]
    fn test_request_code_roundtrip() {
        for command in Command::ALL {
            let code = command.request_code();
            assert_eq!(Command::from_request_code(code), Ok(command));
        }
    }

    #[test]
    fn test_unknown_sequence_number() {
        let code = ioc(IOC_READ, IOCTL_MAGIC, b'z', ARG_SIZE);
        assert_eq!(
            Command::from_request_code(code),
            Err(ProtocolError::UnknownCommand { code })
        );
    }

    #[test]
    fn test_wrong_magic_or_direction() {
        let wrong_magic = ioc(IOC_READ, b'b', b'a', ARG_SIZE);
        assert!(Command::from_request_code(wrong_magic).is_err());

        // ReadU8 序号但方向为写
        let wrong_dir = ioc(IOC_WRITE, IOCTL_MAGIC, b'a', ARG_SIZE);
        assert!(Command::from_request_code(wrong_dir).is_err());

        assert!(Command::from_request_code(0).is_err());
    }

    #[test]
    fn test_is_write() {
        let writes: Vec<_> = Command::ALL.iter().filter(|c| c.is_write()).collect();
        assert_eq!(writes.len(), 3);
        assert!(!Command::ReadWaveform.is_write());
    }
}
