//! 请求结构体
//!
//! 与驱动头文件中的 `IO_VALUE` / `IO_WAVEFORM` 逐字节一致。

use crate::{ProtocolError, RegisterWidth, WAVEFORM_LENGTH, WAVEFORM_OFFSET, check_bulk_length};

/// 单值读写请求（`IO_VALUE`）
///
/// 同一个结构体用于 8/16/32 位的读与写：
/// - 读：调用方填 `offset`，驱动填入对应位宽的字段
/// - 写：调用方填 `offset` 和对应位宽的字段
///
/// C 布局：`offset@0`, `value_8@4`, `value_16@6`, `value_32@8`，共 12 字节。
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueRequest {
    pub offset: u32,
    pub value_8: u8,
    pub value_16: u16,
    pub value_32: u32,
}

const _: () = assert!(std::mem::size_of::<ValueRequest>() == ValueRequest::SIZE);

impl ValueRequest {
    /// 结构体大小（字节）
    pub const SIZE: usize = 12;

    /// 创建读请求
    pub fn read(offset: u32) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    /// 创建写请求
    ///
    /// `value` 按位宽截断后写入对应字段。
    pub fn write(width: RegisterWidth, offset: u32, value: u32) -> Self {
        let mut request = Self::read(offset);
        request.set_value(width, value);
        request
    }

    /// 读取对应位宽的字段
    pub fn value(&self, width: RegisterWidth) -> u32 {
        match width {
            RegisterWidth::U8 => self.value_8 as u32,
            RegisterWidth::U16 => self.value_16 as u32,
            RegisterWidth::U32 => self.value_32,
        }
    }

    /// 写入对应位宽的字段（只修改该字段）
    pub fn set_value(&mut self, width: RegisterWidth, value: u32) {
        match width {
            RegisterWidth::U8 => self.value_8 = value as u8,
            RegisterWidth::U16 => self.value_16 = value as u16,
            RegisterWidth::U32 => self.value_32 = value,
        }
    }

    /// 编码为 C 布局字节（主机字节序，填充字节为 0）
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.offset.to_ne_bytes());
        bytes[4] = self.value_8;
        // byte 5: padding
        bytes[6..8].copy_from_slice(&self.value_16.to_ne_bytes());
        bytes[8..12].copy_from_slice(&self.value_32.to_ne_bytes());
        bytes
    }

    /// 从 C 布局字节解码
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != Self::SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            offset: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            value_8: bytes[4],
            value_16: u16::from_ne_bytes([bytes[6], bytes[7]]),
            value_32: u32::from_ne_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// 波形批量读取请求（`IO_WAVEFORM` 的头部）
///
/// 驱动把 `offset` 起的 `length` 字节直接拷贝到调用方缓冲区。
/// 构造时即校验长度，非 4 的倍数的请求无法被创建。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformRequest {
    offset: u32,
    length: i32,
}

impl WaveformRequest {
    pub fn new(offset: u32, length: i32) -> Result<Self, ProtocolError> {
        check_bulk_length(length as i64)?;
        Ok(Self { offset, length })
    }

    /// 完整波形区（14 × 4096 × 2 字节，偏移 0x40000）
    pub fn full_waveform() -> Self {
        Self {
            offset: WAVEFORM_OFFSET,
            length: WAVEFORM_LENGTH as i32,
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    /// 长度（字节，已保证非负）
    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// 以 4 字节为单位的字数
    pub fn word_count(&self) -> usize {
        self.len() / 4
    }
}

/// `IO_WAVEFORM` 的完整 C 布局（带调用方缓冲区指针）
///
/// 仅在 ioctl 边界使用；指针指向的缓冲区必须在请求期间保持有效且至少 `length` 字节。
#[repr(C)]
#[derive(Debug)]
pub struct IoWaveform {
    pub offset: u32,
    pub length: i32,
    pub buffer: *mut u8,
}

impl IoWaveform {
    /// 以调用方缓冲区构造请求
    ///
    /// `buffer` 的长度必须等于请求长度。
    pub fn for_buffer(request: WaveformRequest, buffer: &mut [u8]) -> Result<Self, ProtocolError> {
        if buffer.len() != request.len() {
            return Err(ProtocolError::InvalidLength {
                expected: request.len(),
                actual: buffer.len(),
            });
        }
        Ok(Self {
            offset: request.offset,
            length: request.length,
            buffer: buffer.as_mut_ptr(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_value_request_layout() {
        assert_eq!(std::mem::size_of::<ValueRequest>(), 12);
        assert_eq!(offset_of!(ValueRequest, offset), 0);
        assert_eq!(offset_of!(ValueRequest, value_8), 4);
        assert_eq!(offset_of!(ValueRequest, value_16), 6);
        assert_eq!(offset_of!(ValueRequest, value_32), 8);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_io_waveform_layout() {
        assert_eq!(std::mem::size_of::<IoWaveform>(), 16);
        assert_eq!(offset_of!(IoWaveform, length), 4);
        assert_eq!(offset_of!(IoWaveform, buffer), 8);
    }

    #[test]
    fn test_write_truncates_to_width() {
        let req = ValueRequest::write(RegisterWidth::U8, 0x10, 0x1234);
        assert_eq!(req.value_8, 0x34);
        assert_eq!(req.value_16, 0);
        assert_eq!(req.value_32, 0);

        let req = ValueRequest::write(RegisterWidth::U16, 0x10, 0x1234_5678);
        assert_eq!(req.value(RegisterWidth::U16), 0x5678);
    }

    #[test]
    fn test_to_bytes_layout() {
        let req = ValueRequest {
            offset: 0x0004_0000,
            value_8: 0xAB,
            value_16: 0x1234,
            value_32: 0xDEAD_BEEF,
        };
        let bytes = req.to_bytes();
        assert_eq!(&bytes[0..4], &0x0004_0000u32.to_ne_bytes());
        assert_eq!(bytes[4], 0xAB);
        assert_eq!(bytes[5], 0);
        assert_eq!(&bytes[6..8], &0x1234u16.to_ne_bytes());
        assert_eq!(&bytes[8..12], &0xDEAD_BEEFu32.to_ne_bytes());
        assert_eq!(ValueRequest::from_bytes(&bytes), Ok(req));
    }

    #[test]
    fn test_from_bytes_wrong_length() {
        assert_eq!(
            ValueRequest::from_bytes(&[0u8; 8]),
            Err(ProtocolError::InvalidLength {
                expected: 12,
                actual: 8
            })
        );
    }

    #[test]
    fn test_waveform_request_validation() {
        assert!(WaveformRequest::new(0, 8).is_ok());
        assert_eq!(
            WaveformRequest::new(0, 10),
            Err(ProtocolError::InvalidBulkLength { length: 10 })
        );
        assert!(WaveformRequest::new(0, -4).is_err());
    }

    #[test]
    fn test_full_waveform_request() {
        let req = WaveformRequest::full_waveform();
        assert_eq!(req.offset(), 0x0004_0000);
        assert_eq!(req.len(), 14 * 4096 * 2);
        assert_eq!(req.word_count(), 14 * 4096 / 2);
    }

    #[test]
    fn test_io_waveform_buffer_length_mismatch() {
        let req = WaveformRequest::new(0, 8).unwrap();
        let mut buf = [0u8; 4];
        assert!(IoWaveform::for_buffer(req, &mut buf).is_err());

        let mut buf = [0u8; 8];
        let io = IoWaveform::for_buffer(req, &mut buf).unwrap();
        assert_eq!(io.length, 8);
        assert_eq!(io.buffer, buf.as_mut_ptr());
    }
}
