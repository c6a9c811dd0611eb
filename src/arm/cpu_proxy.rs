//! CPU Proxy: drives the halted core to execute ARM/VFP/coprocessor
//! instructions through the Instruction Transfer Register, using the Data
//! Communications Channel to move values in and out.
//!
//! Every function here assumes the core is already halted and leaves r0 (and
//! sometimes r1) clobbered; callers are responsible for the snapshot/restore
//! ordering that makes that invisible to the debugger.

use std::time::{Duration, Instant};

use super::debug_regs::{Dbgdrcr, Dbgdscr, Dbgdtrrx, Dbgdtrtx, Dbgitr};
use super::instructions::{
    build_mcr, build_mov, build_mrc, build_mrs, build_msr, build_vmov_from_dreg,
    build_vmov_to_dreg, build_vmrs, build_vmsr,
};
use super::regfile::{RegId, RegisterCache};
use crate::error::{Result, TargetError};
use crate::transport::{ApbTransport, DebugApbPort};

/// Bound on how long a single ITR instruction is given to retire, or a DCC
/// handshake bit to assert.
const OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

/// Write `instruction` to DBGITR and poll DSCR until `INSTRCOMPL` is set.
fn wait_for_retire<P: DebugApbPort>(transport: &mut ApbTransport<P>, instruction: u32) -> Result<Dbgdscr> {
    let mut itr = Dbgitr(0);
    itr.set_value(instruction);
    transport.write_reg(itr)?;

    let start = Instant::now();
    let mut dscr: Dbgdscr = transport.read_reg()?;
    while !dscr.instrcompl() {
        if start.elapsed() >= OPERATION_TIMEOUT {
            return Err(TargetError::Timeout);
        }
        dscr = transport.read_reg()?;
    }
    Ok(dscr)
}

/// Issue `instruction` through DBGITR and wait for it to retire.
///
/// If the instruction raised a synchronous data abort or undefined
/// instruction exception, the sticky flag is cleared via `DRCR.CSE` and
/// [`TargetError::DataAbort`] is returned. Used for register-proxy and
/// cache-maintenance instructions, which have no sticky-MMU-fault
/// conversion of their own and should fail hard. Memory-subsystem streaming
/// instructions (`ldc`/`stc`/`strb`) use
/// [`execute_instruction_allow_abort`] instead, since they convert an abort
/// into `mmu_fault` themselves immediately afterward (spec.md §7.2).
pub(crate) fn execute_instruction<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    instruction: u32,
) -> Result<Dbgdscr> {
    let dscr = wait_for_retire(transport, instruction)?;

    if dscr.sdabort_l() || dscr.und_l() {
        let mut drcr = Dbgdrcr(0);
        drcr.set_cse(true);
        transport.write_reg(drcr)?;
        return Err(TargetError::DataAbort);
    }

    Ok(dscr)
}

/// Issue `instruction` through DBGITR and wait for it to retire, returning
/// the completion DSCR unconditionally -- including a `SDABORT_L`/`UND_L`
/// that's still set -- instead of converting it into a hard error.
///
/// The memory subsystem's APB-slow `ldc`/`stc`/`strb` injections call this
/// rather than [`execute_instruction`] precisely because they run their own
/// `abort_pending`/`clear_abort` check against DSCR right after issuing the
/// instruction; routing the abort through `execute_instruction`'s hard error
/// instead would clear `SDABORT_L` and bail out before that check ever runs,
/// turning what spec.md §7.2 describes as a normal return with a sticky
/// `mmu_fault` into an unhandled `Err` (spec.md §8 scenario 4).
pub(crate) fn execute_instruction_allow_abort<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    instruction: u32,
) -> Result<Dbgdscr> {
    wait_for_retire(transport, instruction)
}

/// Write a value into DBGDTRRX, ready for a proxied `MRC` to consume.
fn write_dtrrx<P: DebugApbPort>(transport: &mut ApbTransport<P>, value: u32) -> Result<()> {
    let mut dtrrx = Dbgdtrrx(0);
    dtrrx.set_value(value);
    transport.write_reg(dtrrx)
}

/// Wait for DBGDTRTX to fill, then read it.
fn read_dtrtx<P: DebugApbPort>(transport: &mut ApbTransport<P>) -> Result<u32> {
    let start = Instant::now();
    loop {
        let dscr: Dbgdscr = transport.read_reg()?;
        if dscr.txfull() {
            break;
        }
        if start.elapsed() >= OPERATION_TIMEOUT {
            return Err(TargetError::Timeout);
        }
    }
    let dtrtx: Dbgdtrtx = transport.read_reg()?;
    Ok(dtrtx.value())
}

/// Read general-purpose register `n` (0..=14) by moving it into the DCC.
pub(crate) fn read_gp<P: DebugApbPort>(transport: &mut ApbTransport<P>, n: u16) -> Result<u32> {
    execute_instruction(transport, build_mcr(14, 0, n, 0, 5, 0))?;
    read_dtrtx(transport)
}

/// Write general-purpose register `n` (0..=14) from the DCC.
pub(crate) fn write_gp<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    n: u16,
    value: u32,
) -> Result<()> {
    write_dtrrx(transport, value)?;
    execute_instruction(transport, build_mrc(14, 0, n, 0, 5, 0))?;
    Ok(())
}

/// True if CPSR bit 5 (the Thumb state bit) is set.
pub(crate) fn is_thumb(cpsr: u32) -> bool {
    cpsr & (1 << 5) != 0
}

/// Probe FPU presence and the number of double-precision registers
/// (SPEC_FULL.md §F.2). Reads CPACR's CP10/CP11 fields first; both clear
/// means VFP access traps, so MVFR0 is never read in that case. Safe to call
/// regardless of whether the core actually has a FPU.
pub(crate) fn fpu_register_count<P: DebugApbPort>(transport: &mut ApbTransport<P>) -> Result<u32> {
    execute_instruction(transport, build_mrc(15, 0, 0, 1, 0, 2))?; // CPACR -> r0
    let cpacr = read_gp(transport, 0)?;
    let cp10 = (cpacr >> 20) & 0b11;
    let cp11 = (cpacr >> 22) & 0b11;
    if cp10 == 0 || cp11 == 0 {
        return Ok(0);
    }

    execute_instruction(transport, build_vmrs(0, 0b0111))?; // MVFR0 -> r0
    let mvfr0 = read_gp(transport, 0)?;
    Ok(match mvfr0 & 0b111 {
        0b001 => 16,
        0b010 => 32,
        _ => 0,
    })
}

/// Take a full register snapshot into `cache`: r0..r14, PC (pipeline-offset
/// adjusted), CPSR, FPSCR, then d0..d15, in that order, since each courier
/// operation past r0..r14 clobbers r0 (and d-register access clobbers r1
/// too). Called once per halt. `fp_reg_count` gates the FPSCR/d-register
/// portion: zero skips it entirely and fills zeros, since a core without a
/// FPU traps on VMRS/VMOV (spec.md §F.2).
pub(crate) fn snapshot<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    cache: &mut RegisterCache,
    fp_reg_count: u32,
) -> Result<()> {
    for n in 0..15u16 {
        let v = read_gp(transport, n)?;
        cache.fill_word(RegId::Gpr(n as u8), v)?;
    }

    execute_instruction(transport, build_mov(0, 15))?;
    let raw_pc = read_gp(transport, 0)?;

    execute_instruction(transport, build_mrs(0))?;
    let cpsr = read_gp(transport, 0)?;

    let pc = if is_thumb(cpsr) { raw_pc - 4 } else { raw_pc - 8 };
    cache.fill_word(RegId::Gpr(15), pc)?;
    cache.fill_word(RegId::Cpsr, cpsr)?;

    if fp_reg_count == 0 {
        cache.fill_word(RegId::Fpscr, 0)?;
        for i in 0..16u8 {
            cache.fill_dword(RegId::Dreg(i), 0)?;
        }
        return Ok(());
    }

    execute_instruction(transport, build_vmrs(0, 1))?;
    let fpscr = read_gp(transport, 0)?;
    cache.fill_word(RegId::Fpscr, fpscr)?;

    for i in 0..16u32 {
        execute_instruction(transport, build_vmov_from_dreg(i))?;
        let lo = read_gp(transport, 0)?;
        let hi = read_gp(transport, 1)?;
        cache.fill_dword(RegId::Dreg(i as u8), (lo as u64) | ((hi as u64) << 32))?;
    }

    Ok(())
}

/// Flush every register the debugger has written since the last snapshot
/// back to the core, in the order mandated by the dependency chain: floats
/// first (clobber r0/r1), then FPSCR, then CPSR, then PC (via r0), finally
/// r0..r14. `fp_reg_count` gates the FPSCR/d-register portion, matching
/// [`snapshot`]: on a core without a FPU any write the debugger staged there
/// is silently dropped rather than executed as a trapping instruction.
pub(crate) fn flush<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    cache: &mut RegisterCache,
    fp_reg_count: u32,
) -> Result<()> {
    for i in 0..16u8 {
        if let Some(v) = cache.take_dirty_dword(RegId::Dreg(i))? {
            if fp_reg_count > 0 {
                write_gp(transport, 0, v as u32)?;
                write_gp(transport, 1, (v >> 32) as u32)?;
                execute_instruction(transport, build_vmov_to_dreg(i as u32))?;
            }
        }
    }

    if let Some(v) = cache.take_dirty_word(RegId::Fpscr)? {
        if fp_reg_count > 0 {
            write_gp(transport, 0, v)?;
            execute_instruction(transport, build_vmsr(0, 1))?;
        }
    }

    if let Some(v) = cache.take_dirty_word(RegId::Cpsr)? {
        write_gp(transport, 0, v)?;
        execute_instruction(transport, build_msr(0))?;
    }

    if let Some(v) = cache.take_dirty_word(RegId::Gpr(15))? {
        write_gp(transport, 0, v)?;
        execute_instruction(transport, build_mov(15, 0))?;
    }

    for n in 0..15u8 {
        if let Some(v) = cache.take_dirty_word(RegId::Gpr(n))? {
            write_gp(transport, n as u16, v)?;
        }
    }

    Ok(())
}

/// Translate a virtual address to its physical address via CP15 ATS1CPR,
/// reading the result back through PAR (spec.md §4.3). Bit 0 of PAR set
/// means the translation faulted; the caller still gets a best-effort
/// physical address (PAR's page bits with the VA's page offset) so it can
/// decide what to do, but `*mmu_fault` is raised.
pub(crate) fn va_to_pa<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    va: u32,
    mmu_fault: &mut bool,
) -> Result<u32> {
    write_gp(transport, 0, va)?;
    execute_instruction(transport, build_mcr(15, 0, 0, 7, 8, 0))?; // ATS1CPR
    execute_instruction(transport, build_mrc(15, 0, 0, 7, 4, 0))?; // PAR -> r0
    let par = read_gp(transport, 0)?;
    if par & 1 != 0 {
        *mmu_fault = true;
    }
    Ok((par & !0xfff) | (va & 0xfff))
}

/// Clean (but do not invalidate) the D-cache line containing `va` (spec.md
/// §4.3 AHB-fast read: later instruction execution must not see stale
/// state, but the line doesn't need to be evicted).
pub(crate) fn clean_dcache_line<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    va: u32,
) -> Result<()> {
    write_gp(transport, 0, va)?;
    execute_instruction(transport, build_mcr(15, 0, 0, 7, 10, 1))?; // DCCMVAC
    Ok(())
}

/// Clean and invalidate the D-cache line containing `va` (spec.md §4.3
/// AHB-fast write: a later code fetch must see the write).
pub(crate) fn clean_invalidate_dcache_line<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    va: u32,
) -> Result<()> {
    write_gp(transport, 0, va)?;
    execute_instruction(transport, build_mcr(15, 0, 0, 7, 14, 1))?; // DCCIMVAC
    Ok(())
}

/// Invalidate the entire I-cache (spec.md §4.4 resume: code edits made by
/// memory writes must become visible before the core runs again).
pub(crate) fn invalidate_icache<P: DebugApbPort>(transport: &mut ApbTransport<P>) -> Result<()> {
    write_gp(transport, 0, 0)?;
    execute_instruction(transport, build_mcr(15, 0, 0, 7, 5, 0))?; // ICIALLU
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    #[test]
    fn thumb_bit_detected() {
        assert!(is_thumb(1 << 5));
        assert!(!is_thumb(0));
    }

    const INSTRCOMPL: u32 = 1 << 24;
    const TXFULL: u32 = 1 << 29;

    #[test]
    fn read_gp_round_trip() {
        let mut mock = MockTransport::new();
        let instr = build_mcr(14, 0, 3, 0, 5, 0);
        mock.expect_write(0x1084, instr); // DBGITR
        mock.expect_read(0x1088, INSTRCOMPL); // DBGDSCR retire poll
        mock.expect_read(0x1088, TXFULL); // DBGDSCR txfull poll
        mock.expect_read(0x108c, 0xdead_beef); // DBGDTRTX
        let mut transport = ApbTransport::new(mock, 0x1000);

        assert_eq!(read_gp(&mut transport, 3).unwrap(), 0xdead_beef);
    }

    #[test]
    fn write_gp_round_trip() {
        let mut mock = MockTransport::new();
        mock.expect_write(0x1080, 0x1234_5678); // DBGDTRRX
        let instr = build_mrc(14, 0, 2, 0, 5, 0);
        mock.expect_write(0x1084, instr); // DBGITR
        mock.expect_read(0x1088, INSTRCOMPL);
        let mut transport = ApbTransport::new(mock, 0x1000);

        write_gp(&mut transport, 2, 0x1234_5678).unwrap();
    }

    #[test]
    fn fpu_register_count_detects_disabled_fpu() {
        let mut mock = MockTransport::new();
        let mrc_cpacr = build_mrc(15, 0, 0, 1, 0, 2);
        let mcr_r0 = build_mcr(14, 0, 0, 0, 5, 0);

        mock.expect_write(0x1084, mrc_cpacr);
        mock.expect_read(0x1088, INSTRCOMPL);
        mock.expect_write(0x1084, mcr_r0);
        mock.expect_read(0x1088, INSTRCOMPL);
        mock.expect_read(0x1088, TXFULL);
        mock.expect_read(0x108c, 0); // CPACR: CP10/CP11 both disabled
        let mut transport = ApbTransport::new(mock, 0x1000);

        assert_eq!(fpu_register_count(&mut transport).unwrap(), 0);
    }

    #[test]
    fn fpu_register_count_detects_32_dregs() {
        let mut mock = MockTransport::new();
        let mrc_cpacr = build_mrc(15, 0, 0, 1, 0, 2);
        let mcr_r0 = build_mcr(14, 0, 0, 0, 5, 0);
        let vmrs_mvfr0 = build_vmrs(0, 0b0111);

        mock.expect_write(0x1084, mrc_cpacr);
        mock.expect_read(0x1088, INSTRCOMPL);
        mock.expect_write(0x1084, mcr_r0);
        mock.expect_read(0x1088, INSTRCOMPL);
        mock.expect_read(0x1088, TXFULL);
        mock.expect_read(0x108c, 0x00f0_0000); // CPACR: CP10=CP11=0b11

        mock.expect_write(0x1084, vmrs_mvfr0);
        mock.expect_read(0x1088, INSTRCOMPL);
        mock.expect_write(0x1084, mcr_r0);
        mock.expect_read(0x1088, INSTRCOMPL);
        mock.expect_read(0x1088, TXFULL);
        mock.expect_read(0x108c, 0b010); // MVFR0: 32 double registers

        let mut transport = ApbTransport::new(mock, 0x1000);
        assert_eq!(fpu_register_count(&mut transport).unwrap(), 32);
    }
}
