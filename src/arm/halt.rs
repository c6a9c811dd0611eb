//! Halt/Resume State Machine (spec.md §4.4): drives DSCR/DRCR through
//! Running <-> Halted, with a Halted-Stepping sub-state, and determines the
//! halt cause.

use super::breakpoints::{bas_for, BreakpointManager};
use super::cpu_proxy::{flush, invalidate_icache, is_thumb, snapshot};
use super::debug_regs::{Dbgdrcr, Dbgdscr};
use super::regfile::{RegId, RegisterCache};
use crate::error::{Result, TargetError};
use crate::transport::{ApbTransport, DebugApbPort, TransportError};
use crate::HaltSignal;

/// The three states spec.md §4.4 names: a core is Running, Halted, or
/// Halted-Stepping (halted with a mismatch breakpoint configured in slot 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Running,
    Halted,
    HaltedStepping,
}

/// Outcome of one [`halt_wait`] poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltWait {
    /// DSCR.HALTED was 0, or the request timed out while the core was
    /// presumed in WFI (spec.md §4.4): keep polling.
    StillRunning,
    /// The core is halted; its register snapshot has already been taken.
    Halted(HaltSignal),
}

/// Request the core to halt (spec.md §4.4). Does not wait. A transport
/// timeout here is diagnostic, not a failure, since the core may be in WFI
/// and not observe the request promptly (spec.md §5 cancellation model).
pub fn halt_request<P: DebugApbPort>(transport: &mut ApbTransport<P>) -> Result<()> {
    let mut drcr = Dbgdrcr(0);
    drcr.set_hrq(true);
    match transport.write_reg(drcr) {
        Ok(()) => Ok(()),
        Err(TargetError::Transport(TransportError::Timeout)) => {
            tracing::warn!("halt request timed out; core may be in WFI");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Poll DSCR once and report the outcome (spec.md §4.4 "Halt wait").
///
/// A transport timeout is treated as "probably WFI, keep polling"; a
/// transport error is unrecoverable and propagated as
/// [`TargetError::TargetLost`] (signal 29) so the caller can free the
/// target.
pub fn halt_wait<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    cache: &mut RegisterCache,
    fp_reg_count: u32,
) -> Result<HaltWait> {
    let dscr: Dbgdscr = match transport.read_reg() {
        Ok(dscr) => dscr,
        Err(TargetError::Transport(TransportError::Timeout)) => {
            tracing::trace!("halt_wait poll timed out; target probably in WFI");
            return Ok(HaltWait::StillRunning);
        }
        Err(TargetError::Transport(TransportError::Error)) => {
            tracing::warn!("transport error while waiting for halt; target lost");
            return Err(TargetError::TargetLost);
        }
        Err(e) => return Err(e),
    };

    if !dscr.halted() {
        return Ok(HaltWait::StillRunning);
    }

    let mut enabled = dscr;
    enabled.set_itren(true);
    transport.write_reg(enabled)?;

    let signal = dscr.halt_signal();
    cache.invalidate();
    snapshot(transport, cache, fp_reg_count)?;
    tracing::debug!(?signal, "core halted");
    Ok(HaltWait::Halted(signal))
}

/// Resume the core (spec.md §4.4 "Resume").
///
/// If `step` is set, slot 0 is armed with an instruction-mismatch
/// breakpoint at the current PC instead of being restored to the
/// debugger's program breakpoint; interrupts are masked via DSCR.INTDIS for
/// the duration of the step.
pub fn halt_resume<P: DebugApbPort>(
    transport: &mut ApbTransport<P>,
    cache: &mut RegisterCache,
    breakpoints: &mut BreakpointManager,
    step: bool,
    fp_reg_count: u32,
) -> Result<()> {
    if step {
        let pc = cache
            .cached_word(RegId::Gpr(15))?
            .ok_or(TargetError::CoreNotHalted)?;
        let cpsr = cache
            .cached_word(RegId::Cpsr)?
            .ok_or(TargetError::CoreNotHalted)?;
        let bas = bas_for(pc, if is_thumb(cpsr) { 2 } else { 4 });
        breakpoints.arm_step(transport, pc, bas)?;
    } else {
        breakpoints.restore_slot0(transport)?;
    }

    flush(transport, cache, fp_reg_count)?;
    invalidate_icache(transport)?;

    let mut dscr: Dbgdscr = transport.read_reg()?;
    dscr.set_intdis(step);
    dscr.set_itren(false);
    transport.write_reg(dscr)?;

    loop {
        let mut drcr = Dbgdrcr(0);
        drcr.set_cse(true);
        drcr.set_rrq(true);
        transport.write_reg(drcr)?;

        let dscr: Dbgdscr = transport.read_reg()?;
        if dscr.restarted() {
            break;
        }
    }

    cache.invalidate();
    Ok(())
}
