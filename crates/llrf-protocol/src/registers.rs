//! FPGA 寄存器表
//!
//! 客户端参数名到寄存器偏移的静态映射。所有寄存器均为 32 位字；
//! 偏移允许重叠（状态字可以被多个逻辑字段别名），但名称全局唯一。

use crate::RegisterWidth;

/// 寄存器值的逻辑类型（决定参数对外呈现为整数还是浮点）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegisterKind {
    Int,
    Float,
}

/// 访问权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Access {
    ReadWrite,
    /// 状态寄存器，写入会被拒绝
    ReadOnly,
}

/// 寄存器描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    /// BAR 内的字节偏移
    pub offset: u32,
    pub width: RegisterWidth,
    pub kind: RegisterKind,
    pub access: Access,
}

impl RegisterDescriptor {
    pub const fn new(
        name: &'static str,
        offset: u32,
        width: RegisterWidth,
        kind: RegisterKind,
        access: Access,
    ) -> Self {
        Self {
            name,
            offset,
            width,
            kind,
            access,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

const fn rw_int(name: &'static str, offset: u32) -> RegisterDescriptor {
    RegisterDescriptor::new(name, offset, RegisterWidth::U32, RegisterKind::Int, Access::ReadWrite)
}

const fn rw_float(name: &'static str, offset: u32) -> RegisterDescriptor {
    RegisterDescriptor::new(name, offset, RegisterWidth::U32, RegisterKind::Float, Access::ReadWrite)
}

const fn ro_int(name: &'static str, offset: u32) -> RegisterDescriptor {
    RegisterDescriptor::new(name, offset, RegisterWidth::U32, RegisterKind::Int, Access::ReadOnly)
}

const fn ro_float(name: &'static str, offset: u32) -> RegisterDescriptor {
    RegisterDescriptor::new(name, offset, RegisterWidth::U32, RegisterKind::Float, Access::ReadOnly)
}

/// 手动清除永久封锁（写 1 触发 500 ms 脉冲）
pub const MANUAL_CLEAR: &str = "manual_Clear";

/// 板卡寄存器表
pub static STANDARD_REGISTERS: [RegisterDescriptor; 91] = [
    // 读写寄存器
    rw_int("lock_en", 0),
    rw_int("on_off", 4),
    rw_int("RF_PW_CW", 8),
    rw_int("loop_en", 12),
    rw_int("tune_loop_en", 16),
    rw_int("sp_amp", 20),
    rw_float("sp_phase", 24),
    rw_int("beam_amp", 28),
    rw_float("beam_phase", 32),
    rw_int("kp", 36),
    rw_int("ki", 40),
    rw_float("ad_adj_real", 44),
    rw_float("ad_adj_imag", 48),
    rw_float("da_adj_real", 52),
    rw_float("da_adj_imag", 56),
    rw_float("da_adj_real2", 60),
    rw_float("da_adj_imag2", 64),
    rw_int("n_jump", 68),
    rw_int("n_jump_delay", 72),
    rw_int("start_cnt", 76),
    rw_int("end_cnt", 80),
    rw_int("Out_max_I", 84),
    rw_int("Out_min_I", 88),
    rw_int("Out_max_Q", 92),
    rw_int("Out_min_Q", 96),
    rw_int("sp_freq", 100),
    rw_int("Loop_Delay_count", 104),
    rw_int("Kip_start_point", 108),
    rw_int("Kip_end_point", 112),
    rw_int("Ki_I_rise_point", 116),
    rw_int("Ki_Q_rise_point", 120),
    rw_int("freq_kp", 124),
    rw_int("beam_delay", 128),
    rw_int("rfgate_ram_jiange", 132),
    rw_int("Qset", 136),
    rw_float("Overdrive", 140),
    rw_int("train_mode", 144),
    rw_int("triger_src", 148),
    rw_int("triger_period", 152),
    rw_int("RF_count", 156),
    rw_int("init_set", 160),
    rw_int("end_set", 164),
    rw_int("powup_time", 168),
    rw_int("powup_step", 172),
    rw_int("powup_hold_time", 176),
    rw_int("powup_protect_times", 180),
    rw_int("powdown_time", 184),
    rw_int("powdown_step", 188),
    rw_int("powdown_hold_time", 192),
    rw_int("powdown_protect_times", 196),
    rw_int("PRT_Start_count", 200),
    rw_int("PRT_End_count", 204),
    rw_float("SP_P", 208),
    rw_float("SP_P_1", 212),
    rw_float("SP_P_2", 216),
    rw_float("SP_P_3", 220),
    rw_int("Ch_beam_Hold", 224),
    rw_float("Ch_VSWR_Hold", 228),
    rw_int("SP_Ch_sum_PRT_Num", 232),
    rw_int("manual_Clear", 236),
    rw_int("VSWR_EN", 240),
    rw_int("VSWR_Delay_Num", 244),
    rw_int("k0_forward", 248),
    rw_int("k0_reverse", 252),
    rw_int("k1_forward", 256),
    rw_int("k1_reverse", 260),
    rw_int("k2_forward", 264),
    rw_int("k2_reverse", 268),
    rw_int("k3_forward", 272),
    rw_int("k3_reverse", 276),
    rw_int("state_wr_reg", 508),

    // 只读状态寄存器
    ro_int("rd_reg_state", 508),
    ro_int("lock_en_state", 512),
    ro_int("on_off_state", 516),
    ro_int("loop_en_state", 520),
    ro_int("tune_loop_en_state", 524),
    ro_int("o_sp_amp_state", 528),
    ro_int("sp_amp_state", 532),
    ro_float("sp_phase_state", 536),
    ro_int("s1_Ch0_PRT_Num_state", 540),
    ro_int("s1_Ch1_PRT_Num_state", 544),
    ro_int("s1_Ch2_PRT_Num_state", 548),
    ro_int("s1_Ch3_PRT_Num_state", 552),
    ro_int("s1_Ch_sum_PRT_Num_state", 556),
    ro_int("Ch0_VSWR_SUM_Counter_state", 560),
    ro_int("Ch1_VSWR_SUM_Counter_state", 564),
    ro_int("Ch2_VSWR_SUM_Counter_state", 568),
    ro_int("Ch3_VSWR_SUM_Counter_state", 572),
    ro_int("high_Wattcher_state", 576),
    ro_int("VSWR_PRT_forvere_out_state", 580),
    ro_float("freq_cal_state", 584),
];

/// 寄存器映射
///
/// 条目只有几十个，线性查找即可；名称区分大小写、精确匹配。
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    entries: &'static [RegisterDescriptor],
}

impl RegisterMap {
    pub const fn new(entries: &'static [RegisterDescriptor]) -> Self {
        Self { entries }
    }

    /// 板卡标准寄存器表
    pub const fn standard() -> Self {
        Self::new(&STANDARD_REGISTERS)
    }

    /// 按名称查找寄存器描述
    pub fn lookup(&self, name: &str) -> Option<&'static RegisterDescriptor> {
        self.entries.iter().find(|r| r.name == name)
    }

    /// 按名称解析寄存器偏移，未定义的名称返回 `None`
    pub fn resolve(&self, name: &str) -> Option<u32> {
        self.lookup(name).map(|r| r.offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static RegisterDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::standard()
    }
}
