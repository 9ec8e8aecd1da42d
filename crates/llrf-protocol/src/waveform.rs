//! 原始波形布局
//!
//! FPGA 中 14 路波形地址连续，每路 4096 点、每点 16 位有符号数，
//! 通道顺序固定（见 [`RawChannel`]）。

use crate::ProtocolError;

/// 波形区在 FPGA 中的偏移
pub const WAVEFORM_OFFSET: u32 = 0x0004_0000;
/// 波形路数
pub const WAVEFORM_NUMBER: usize = 14;
/// 每路点数
pub const WAVEFORM_POINT: usize = 4096;
/// 每点字节数
pub const WAVEFORM_DATA_BYTE: usize = 2;
/// 波形区总字节数
pub const WAVEFORM_LENGTH: usize = WAVEFORM_NUMBER * WAVEFORM_POINT * WAVEFORM_DATA_BYTE;

/// 原始波形通道（按 FPGA 中的排列顺序）
///
/// 拾取（pickup）与 DAC 两对由 FPGA 直接给出幅度/相位字，
/// 前向（fwd）与反射（rfl）四对为 I/Q 分量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum RawChannel {
    Pickup2I = 0,
    Pickup2Q = 1,
    Pickup1I = 2,
    Pickup1Q = 3,
    Fwd1I = 4,
    Fwd1Q = 5,
    Rfl1I = 6,
    Rfl1Q = 7,
    Fwd2I = 8,
    Fwd2Q = 9,
    Rfl2I = 10,
    Rfl2Q = 11,
    DacI = 12,
    DacQ = 13,
}

impl RawChannel {
    pub const ALL: [RawChannel; WAVEFORM_NUMBER] = [
        RawChannel::Pickup2I,
        RawChannel::Pickup2Q,
        RawChannel::Pickup1I,
        RawChannel::Pickup1Q,
        RawChannel::Fwd1I,
        RawChannel::Fwd1Q,
        RawChannel::Rfl1I,
        RawChannel::Rfl1Q,
        RawChannel::Fwd2I,
        RawChannel::Fwd2Q,
        RawChannel::Rfl2I,
        RawChannel::Rfl2Q,
        RawChannel::DacI,
        RawChannel::DacQ,
    ];

    /// 在缓冲区中的通道序号
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 该通道在波形区内的字节偏移（相对 `WAVEFORM_OFFSET`）
    pub const fn byte_offset(self) -> usize {
        self.index() * WAVEFORM_POINT * WAVEFORM_DATA_BYTE
    }
}

/// 14 路原始波形缓冲区
///
/// 一次分配、原地覆盖；每路通过 `通道序号 × 4096` 切片访问。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWaveform {
    samples: Vec<i16>,
}

impl RawWaveform {
    /// 全零缓冲区
    pub fn zeroed() -> Self {
        Self {
            samples: vec![0; WAVEFORM_NUMBER * WAVEFORM_POINT],
        }
    }

    /// 从小端字节解码
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut waveform = Self::zeroed();
        waveform.decode_from(bytes)?;
        Ok(waveform)
    }

    /// 从小端字节原地解码（不重新分配）
    pub fn decode_from(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if bytes.len() != WAVEFORM_LENGTH {
            return Err(ProtocolError::InvalidLength {
                expected: WAVEFORM_LENGTH,
                actual: bytes.len(),
            });
        }
        for (sample, chunk) in self.samples.iter_mut().zip(bytes.chunks_exact(2)) {
            *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(())
    }

    /// 编码为小端字节（与 FPGA 波形区布局一致）
    pub fn to_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// 单路波形
    pub fn channel(&self, channel: RawChannel) -> &[i16] {
        let start = channel.index() * WAVEFORM_POINT;
        &self.samples[start..start + WAVEFORM_POINT]
    }

    pub fn channel_mut(&mut self, channel: RawChannel) -> &mut [i16] {
        let start = channel.index() * WAVEFORM_POINT;
        &mut self.samples[start..start + WAVEFORM_POINT]
    }

    /// 全部样本（按通道顺序连续排列）
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl Default for RawWaveform {
    fn default() -> Self {
        Self::zeroed()
    }
}
