//! 模拟板卡
//!
//! 一块小端内存窗口加上与驱动相同的命令分发：客户端侧把请求编码成
//! `IO_VALUE` 字节，经请求码分发后再解码回填，和真实 ioctl 的往返路径一致。
//! 用于单元测试、集成测试以及无硬件时的 `--simulate` 运行。

use crate::{DeviceError, DeviceErrorKind, RegisterTransport, TransportError};
use llrf_protocol::{
    Command, ProtocolError, RawChannel, RawWaveform, RegisterWidth, ValueRequest,
    WAVEFORM_OFFSET, WAVEFORM_POINT, WaveformRequest,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{trace, warn};

/// 模拟窗口大小（覆盖寄存器区和波形区）
pub const WINDOW_SIZE: usize = 0x0006_0000;

/// 写日志最多保留的条数，超出后丢弃最早的记录
pub const WRITE_LOG_CAPACITY: usize = 4096;

/// 一次写访问的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub offset: u32,
    pub width: RegisterWidth,
    pub value: u32,
    pub at: Instant,
}

/// 小端内存窗口
#[derive(Debug)]
pub struct MemoryWindow {
    bytes: Vec<u8>,
    writes: VecDeque<WriteRecord>,
}

impl MemoryWindow {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            writes: VecDeque::with_capacity(WRITE_LOG_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, DeviceError> {
        let start = offset as usize;
        let end = start.checked_add(len).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => Ok(start..end),
            None => Err(DeviceError::new(
                DeviceErrorKind::Rejected,
                format!("access of {} bytes at 0x{:X} is outside the window", len, offset),
            )),
        }
    }

    pub fn read(&self, width: RegisterWidth, offset: u32) -> Result<u32, DeviceError> {
        let range = self.range(offset, width.bytes())?;
        let b = &self.bytes[range];
        Ok(match width {
            RegisterWidth::U8 => b[0] as u32,
            RegisterWidth::U16 => u16::from_le_bytes([b[0], b[1]]) as u32,
            RegisterWidth::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        })
    }

    pub fn write(&mut self, width: RegisterWidth, offset: u32, value: u32) -> Result<(), DeviceError> {
        let range = self.range(offset, width.bytes())?;
        let le = value.to_le_bytes();
        self.bytes[range].copy_from_slice(&le[..width.bytes()]);
        if self.writes.len() == WRITE_LOG_CAPACITY {
            self.writes.pop_front();
        }
        self.writes.push_back(WriteRecord {
            offset,
            width,
            value,
            at: Instant::now(),
        });
        Ok(())
    }

    /// 逐字节拷贝一段区域（`ReadWaveform` 命令的语义）
    pub fn read_into(&self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    /// 直接装载一段内容（不记入写日志）
    pub fn load(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        let range = self.range(offset, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// 最近的写访问，按时间先后
    pub fn writes(&self) -> impl Iterator<Item = &WriteRecord> {
        self.writes.iter()
    }
}

/// 分发参数
pub enum IoctlArg<'a> {
    /// `IO_VALUE` 的原始字节
    Value(&'a mut [u8; ValueRequest::SIZE]),
    /// `IO_WAVEFORM`：请求头 + 调用方缓冲区
    Waveform {
        request: WaveformRequest,
        buffer: &'a mut [u8],
    },
}

/// 按请求码分发一次访问
///
/// 命令集合是封闭的：未识别的请求码记录告警并返回
/// [`ProtocolError::UnknownCommand`]，不会静默成功。
pub fn dispatch(window: &mut MemoryWindow, code: u32, arg: IoctlArg<'_>) -> Result<(), TransportError> {
    let command = match Command::from_request_code(code) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejecting unknown ioctl request code 0x{:08X}", code);
            return Err(e.into());
        },
    };

    match (command, arg) {
        (Command::ReadWaveform, IoctlArg::Waveform { request, buffer }) => {
            if buffer.len() != request.len() {
                return Err(ProtocolError::InvalidLength {
                    expected: request.len(),
                    actual: buffer.len(),
                }
                .into());
            }
            window.read_into(request.offset(), buffer)?;
            trace!("ReadWaveform offset=0x{:X} len={}", request.offset(), request.len());
            Ok(())
        },
        (command, IoctlArg::Value(raw)) if command != Command::ReadWaveform => {
            let mut request = ValueRequest::from_bytes(&raw[..])?;
            let width = match command {
                Command::ReadU8 | Command::WriteU8 => RegisterWidth::U8,
                Command::ReadU16 | Command::WriteU16 => RegisterWidth::U16,
                _ => RegisterWidth::U32,
            };
            if command.is_write() {
                window.write(width, request.offset, request.value(width))?;
            } else {
                let value = window.read(width, request.offset)?;
                request.set_value(width, value);
                *raw = request.to_bytes();
            }
            Ok(())
        },
        (command, _) => Err(DeviceError::new(
            DeviceErrorKind::Rejected,
            format!("argument does not match command {:?}", command),
        )
        .into()),
    }
}

/// 故障注入开关
#[derive(Debug, Default)]
pub struct FaultInjector {
    offline: AtomicBool,
    fail_next: AtomicU32,
    operations: AtomicU64,
}

impl FaultInjector {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// 让接下来的 `count` 次访问失败
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::Release);
    }

    /// 已尝试的访问次数（含失败）
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), DeviceError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if self.is_offline() {
            return Err(DeviceError::new(DeviceErrorKind::Offline, "simulated board is offline"));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(DeviceError::new(DeviceErrorKind::Rejected, "injected access failure"));
        }
        Ok(())
    }
}

/// 模拟板卡句柄（可克隆，所有克隆共享同一窗口）
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    window: Arc<Mutex<MemoryWindow>>,
    faults: Arc<FaultInjector>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self::with_size(WINDOW_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            window: Arc::new(Mutex::new(MemoryWindow::new(size))),
            faults: Arc::new(FaultInjector::default()),
        }
    }

    /// 连接到本板卡的传输
    pub fn transport(&self) -> SimulatedTransport {
        SimulatedTransport {
            board: self.clone(),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn set_offline(&self, offline: bool) {
        self.faults.set_offline(offline);
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.fail_next(count);
    }

    /// 把 14 路波形装入波形区
    pub fn load_waveform(&self, waveform: &RawWaveform) {
        // 窗口总是覆盖完整波形区
        if let Err(e) = self.window.lock().load(WAVEFORM_OFFSET, &waveform.to_bytes()) {
            warn!("Failed to load simulated waveform: {}", e);
        }
    }

    /// 绕过故障注入直接写 32 位寄存器
    pub fn poke_u32(&self, offset: u32, value: u32) {
        if let Err(e) = self.window.lock().load(offset, &value.to_le_bytes()) {
            warn!("poke_u32 ignored: {}", e);
        }
    }

    /// 绕过故障注入直接读 32 位寄存器（越界返回 0）
    pub fn peek_u32(&self, offset: u32) -> u32 {
        self.window.lock().read(RegisterWidth::U32, offset).unwrap_or(0)
    }

    /// 写访问日志快照（最近 [`WRITE_LOG_CAPACITY`] 条）
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.window.lock().writes().copied().collect()
    }

    /// 原始请求码入口
    pub fn ioctl(&self, code: u32, arg: IoctlArg<'_>) -> Result<(), TransportError> {
        self.faults.check()?;
        dispatch(&mut self.window.lock(), code, arg)
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// 模拟板卡的传输实现
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    board: SimulatedBoard,
}

impl SimulatedTransport {
    pub fn board(&self) -> &SimulatedBoard {
        &self.board
    }

    fn read_value(&mut self, width: RegisterWidth, offset: u32) -> Result<u32, TransportError> {
        let mut raw = ValueRequest::read(offset).to_bytes();
        self.board
            .ioctl(width.read_command().request_code(), IoctlArg::Value(&mut raw))?;
        Ok(ValueRequest::from_bytes(&raw)?.value(width))
    }

    fn write_value(&mut self, width: RegisterWidth, offset: u32, value: u32) -> Result<(), TransportError> {
        let mut raw = ValueRequest::write(width, offset, value).to_bytes();
        self.board
            .ioctl(width.write_command().request_code(), IoctlArg::Value(&mut raw))
    }

    /// 逐字节批量读取（`ReadWaveform` 命令）
    pub fn read_waveform(&mut self, request: WaveformRequest, buffer: &mut [u8]) -> Result<(), TransportError> {
        self.board.ioctl(
            Command::ReadWaveform.request_code(),
            IoctlArg::Waveform { request, buffer },
        )
    }
}

impl RegisterTransport for SimulatedTransport {
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

/// 生成一帧合成的脉冲波形
///
/// 前向/反射通道在 `[512, 3584)` 内为平顶脉冲，其余为 0；
/// 拾取与 DAC 通道给出幅度/相位字。`cycle` 使幅度随时间缓慢变化。
pub fn pulse_waveform(cycle: u64) -> RawWaveform {
    const RISE: usize = 512;
    const FALL: usize = WAVEFORM_POINT - 512;

    let swing = ((cycle % 64) as i16 - 32) * 4;
    let mut waveform = RawWaveform::zeroed();
    let channels: [(RawChannel, i16); 14] = [
        (RawChannel::Pickup2I, 12_000 + swing),
        (RawChannel::Pickup2Q, 5_461),
        (RawChannel::Pickup1I, 11_500 + swing),
        (RawChannel::Pickup1Q, 5_280),
        (RawChannel::Fwd1I, 3_000 + swing),
        (RawChannel::Fwd1Q, 4_000),
        (RawChannel::Rfl1I, 600),
        (RawChannel::Rfl1Q, 800),
        (RawChannel::Fwd2I, 2_900 + swing),
        (RawChannel::Fwd2Q, 3_900),
        (RawChannel::Rfl2I, 550),
        (RawChannel::Rfl2Q, 780),
        (RawChannel::DacI, 9_000),
        (RawChannel::DacQ, -2_730),
    ];
    for (channel, level) in channels {
        for sample in &mut waveform.channel_mut(channel)[RISE..FALL] {
            *sample = level;
        }
    }
    waveform
}
