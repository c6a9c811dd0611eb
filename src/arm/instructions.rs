//! Builders for the ARM instructions the CPU Proxy injects through DBGITR
//! (spec.md §4.2). The core only ever executes Debug-state ARM (A32)
//! encodings via the ITR, regardless of the target's own instruction set, so
//! there is a single `aarch32` builder module rather than separate ARM/Thumb
//! variants.

/// Build a MOV (register) instruction: `MOV <Rd>, <Rm>`.
pub(crate) fn build_mov(rd: u16, rm: u16) -> u32 {
    let mut ret = 0b1110_0001_1010_0000_0000_0000_0000_0000;
    ret |= (rd as u32) << 12;
    ret |= rm as u32;
    ret
}

/// Build a coprocessor register write: `MCR p<coproc>, <opcode1>, <Rd>, c<n>, c<m>, <opcode2>`.
pub(crate) fn build_mcr(
    coproc: u8,
    opcode1: u8,
    reg: u16,
    ctrl_reg_n: u8,
    ctrl_reg_m: u8,
    opcode2: u8,
) -> u32 {
    let mut ret = 0b1110_1110_0000_0000_0000_0000_0001_0000;
    ret |= (coproc as u32) << 8;
    ret |= (opcode1 as u32) << 21;
    ret |= (reg as u32) << 12;
    ret |= (ctrl_reg_n as u32) << 16;
    ret |= ctrl_reg_m as u32;
    ret |= (opcode2 as u32) << 5;
    ret
}

/// Build a coprocessor register read: `MRC p<coproc>, <opcode1>, <Rd>, c<n>, c<m>, <opcode2>`.
pub(crate) fn build_mrc(
    coproc: u8,
    opcode1: u8,
    reg: u16,
    ctrl_reg_n: u8,
    ctrl_reg_m: u8,
    opcode2: u8,
) -> u32 {
    let mut ret = 0b1110_1110_0001_0000_0000_0000_0001_0000;
    ret |= (coproc as u32) << 8;
    ret |= (opcode1 as u32) << 21;
    ret |= (reg as u32) << 12;
    ret |= (ctrl_reg_n as u32) << 16;
    ret |= ctrl_reg_m as u32;
    ret |= (opcode2 as u32) << 5;
    ret
}

/// Build `LDC p<coproc>, c<ctrl_reg>, [<Rn>], #<imm>` (post-indexed, fast/stall DCC stream read).
pub(crate) fn build_ldc(coproc: u8, ctrl_reg: u8, reg: u16, imm: u8) -> u32 {
    let mut ret = 0b1110_1100_1011_0000_0000_0000_0000_0000;
    ret |= (reg as u32) << 16;
    ret |= (ctrl_reg as u32) << 12;
    ret |= (coproc as u32) << 8;
    ret |= (imm as u32) >> 2;
    ret
}

/// Build `STC p<coproc>, c<ctrl_reg>, [<Rn>], #<imm>` (post-indexed, fast/stall DCC stream write).
pub(crate) fn build_stc(coproc: u8, ctrl_reg: u8, reg: u16, imm: u8) -> u32 {
    let mut ret = 0b1110_1100_1010_0000_0000_0000_0000_0000;
    ret |= (reg as u32) << 16;
    ret |= (ctrl_reg as u32) << 12;
    ret |= (coproc as u32) << 8;
    ret |= (imm as u32) >> 2;
    ret
}

/// Build `MRS <Rd>, CPSR`.
pub(crate) fn build_mrs(reg: u16) -> u32 {
    let mut ret = 0b1110_0001_0000_1111_0000_0000_0000_0000;
    ret |= (reg as u32) << 12;
    ret
}

/// Build `MSR CPSR_fsxc, <Rm>`.
pub(crate) fn build_msr(rm: u16) -> u32 {
    0xE12F_F000 | (rm as u32)
}

/// Build `VMRS <Rd>, <special-reg>` (`special_reg` is the 4-bit register
/// selector: 1 = FPSCR, 7 = MVFR0, 8 = FPEXC).
pub(crate) fn build_vmrs(rd: u16, special_reg: u8) -> u32 {
    0xEEF0_0A10 | ((special_reg as u32) << 16) | ((rd as u32) << 12)
}

/// Build `VMSR <special-reg>, <Rt>`.
pub(crate) fn build_vmsr(rt: u16, special_reg: u8) -> u32 {
    0xEEE0_0A10 | ((special_reg as u32) << 16) | ((rt as u32) << 12)
}

/// Build `VMOV <Rt>, <Rt2>, D<i>` (double-precision register -> r0:r1).
pub(crate) fn build_vmov_from_dreg(i: u32) -> u32 {
    0xEC51_0B10 | (i & 0xF)
}

/// Build `VMOV D<i>, <Rt>, <Rt2>` (r0:r1 -> double-precision register).
pub(crate) fn build_vmov_to_dreg(i: u32) -> u32 {
    0xEC41_0B10 | (i & 0xF)
}

/// Build `STRB <Rt>, [<Rn>], #<imm>` (post-indexed, used for misaligned byte writes via sp).
pub(crate) fn build_strb_post_inc(rt: u16, rn: u16, imm: u8) -> u32 {
    0xE4C0_0000 | ((rn as u32) << 16) | ((rt as u32) << 12) | (imm as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_mcr_instruction() {
        assert_eq!(0xEE012E72, build_mcr(14, 0, 2, 1, 2, 3));
    }

    #[test]
    fn gen_mrc_instruction() {
        assert_eq!(0xEE112E72, build_mrc(14, 0, 2, 1, 2, 3));
    }

    #[test]
    fn gen_mov_pc_to_r0() {
        // spec.md §4.2: "PC -> r0" = 0xe1a0000f
        assert_eq!(0xE1A0000F, build_mov(0, 15));
    }

    #[test]
    fn gen_mrs_cpsr_to_r0() {
        // spec.md §4.2: "CPSR -> r0" = 0xe10f0000
        assert_eq!(0xE10F0000, build_mrs(0));
    }

    #[test]
    fn gen_msr_r0_to_cpsr() {
        // spec.md §4.2: "r0 -> CPSR" = 0xe12ff000
        assert_eq!(0xE12FF000, build_msr(0));
    }

    #[test]
    fn gen_vmrs_fpscr_to_r0() {
        // spec.md §4.2: "FPSCR -> r0" = 0xeef10a10
        assert_eq!(0xEEF10A10, build_vmrs(0, 1));
    }

    #[test]
    fn gen_vmsr_r0_to_fpscr() {
        // spec.md §4.2: "r0 -> FPSCR" = 0xeee10a10
        assert_eq!(0xEEE10A10, build_vmsr(0, 1));
    }

    #[test]
    fn gen_vmov_dreg_to_core() {
        // spec.md §4.2: "d[i] -> r0:r1" = 0xec510b10 | i
        assert_eq!(0xEC51_0B10, build_vmov_from_dreg(0));
        assert_eq!(0xEC51_0B10 | 15, build_vmov_from_dreg(15));
        assert_eq!(0xEC51_0B10 | 7, build_vmov_from_dreg(7));
    }

    #[test]
    fn gen_vmov_core_to_dreg() {
        // spec.md §4.2: "r0:r1 -> d[i]" = 0xec410b10 | i
        assert_eq!(0xEC41_0B10, build_vmov_to_dreg(0));
        assert_eq!(0xEC41_0B10 | 7, build_vmov_to_dreg(7));
    }

    #[test]
    fn gen_fast_ldc_stream() {
        // spec.md §4.2: "fast load stream" = 0xecb05e01 (ldc p14, c5, [r0], #4)
        assert_eq!(0xECB0_5E01, build_ldc(14, 5, 0, 4));
    }

    #[test]
    fn gen_fast_stc_stream() {
        // spec.md §4.2: "fast store stream" = 0xeca05e01 (stc p14, c5, [r0], #4)
        assert_eq!(0xECA0_5E01, build_stc(14, 5, 0, 4));
    }

    #[test]
    fn gen_strb_sp_post_inc() {
        // spec.md §4.2: "byte store, post-inc sp" = 0xe4cd0001
        assert_eq!(0xE4CD_0001, build_strb_post_inc(0, 13, 1));
    }

    #[test]
    fn gen_va_to_pa_ats1cpr() {
        // spec.md §4.2: MCR p15, 0, r0, c7, c8, 0
        assert_eq!(0xEE07_0F18, build_mcr(15, 0, 0, 7, 8, 0));
    }

    #[test]
    fn gen_par_read() {
        // spec.md §4.2: MRC p15, 0, r0, c7, c4, 0
        assert_eq!(0xEE17_0F14, build_mrc(15, 0, 0, 7, 4, 0));
    }
}
