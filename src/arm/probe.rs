//! Probe & Reset (spec.md §4.6): discovers breakpoint count, enables
//! halting debug mode, and performs the vendor-specific Zynq-7000 hard
//! reset with reconnection polling.

use std::time::{Duration, Instant};

use super::debug_regs::Dbgdidr;
use super::target::Target;
use crate::error::{Result, TargetError};
use crate::transport::{AhbBlockAccess, ApbTransport, DebugApbPort, SystemReset};

/// Expected IDR pattern for a Cortex-A9-compatible AHB-AP (spec.md §4.6).
const AHB_AP_IDR_MASK: u32 = 0x0fff_e00f;
const AHB_AP_IDR_EXPECTED: u32 = 0x0477_0001;

/// Debug-base-relative addresses of the Zynq-7000 SLCR soft-reset registers
/// (spec.md §6, "Vendor registers").
const SLCR_UNLOCK: u64 = 0xf800_0008;
const SLCR_UNLOCK_KEY: u32 = 0xdf0d;
const PSS_RST_CTRL: u64 = 0xf800_0200;

const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(200);
const ATTACH_POLL_RETRIES: u32 = 10;
const RESET_RECONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Discover a target: probe whether `ahb` is a suitable Cortex-A9 AHB-AP,
/// read `DBGDIDR` for the breakpoint count, and program the APB for 32-bit
/// accesses (spec.md §4.6 "Probe").
pub fn probe<P: DebugApbPort, A: AhbBlockAccess>(
    apb: P,
    debug_base: u64,
    mut ahb: Option<A>,
    cache_line_len: u32,
) -> Result<Target<P, A>> {
    let mut transport = ApbTransport::new(apb, debug_base);
    transport.configure_for_32bit_access()?;

    if let Some(candidate) = &mut ahb {
        let idr = candidate.idr()?;
        if idr & AHB_AP_IDR_MASK != AHB_AP_IDR_EXPECTED {
            tracing::debug!(idr, "AHB-AP present but not Cortex-A9 compatible; using APB-slow path");
            ahb = None;
        } else {
            tracing::debug!(idr, "found Cortex-A9 compatible AHB-AP, enabling fast memory path");
        }
    }

    let dbgdidr: Dbgdidr = transport.read_reg()?;
    let bp_count = dbgdidr.breakpoint_count();
    tracing::debug!(bp_count, "probed breakpoint comparator count");

    Ok(Target::new(transport, ahb, bp_count, cache_line_len))
}

/// Bring the target under halting-debug control (spec.md §4.6 "Attach").
///
/// Clears any sticky error, enables `HDBGEN`/`ITREN` with stall-mode DCC,
/// requests a halt, and polls for up to ten 200ms intervals. Fails if
/// system reset is still asserted, or the core never halts.
pub fn attach<P: DebugApbPort, R: SystemReset>(
    target: &mut Target<P, impl AhbBlockAccess>,
    reset: &mut R,
) -> Result<()> {
    target.clear_sticky_error()?;
    target.enable_halting_debug()?;
    target.halt_request()?;

    let mut retries_left = ATTACH_POLL_RETRIES;
    loop {
        if target.poll_halted()? {
            break;
        }
        if retries_left == 0 {
            return Err(TargetError::Timeout);
        }
        retries_left -= 1;
        std::thread::sleep(ATTACH_POLL_INTERVAL);
    }

    if reset.is_asserted()? {
        return Err(TargetError::ResetReconnectFailed);
    }

    target.clear_breakpoint_table()?;
    reset.deassert()?;
    target.mark_attached();
    Ok(())
}

/// Tear down halting-debug control (spec.md §4.6 "Detach"): flush
/// registers, clear the breakpoint table, invalidate the I-cache, clear
/// `HDBGEN`/`ITREN`, and restart the core.
pub fn detach<P: DebugApbPort>(target: &mut Target<P, impl AhbBlockAccess>) -> Result<()> {
    target.clear_breakpoint_table()?;
    target.flush_and_resume_detached()
}

/// Vendor-specific Zynq-7000 hard reset (spec.md §4.6 "Reset").
///
/// Writes the SLCR unlock key and pulses `PSS_RST_CTRL`, which tears down
/// the debug link; polls `DBGDIDR` for up to one second to detect
/// reconnection, then re-attaches. Per spec.md §9 Open Questions, a failure
/// inside the unconditional re-attach at the end is not surfaced -- this is
/// preserved rather than fixed.
pub fn reset<P: DebugApbPort, R: SystemReset>(
    target: &mut Target<P, impl AhbBlockAccess>,
    reset_line: &mut R,
) -> Result<()> {
    // Catch the core the instant it comes out of the vendor reset, before
    // the reconnection polling below begins (SPEC_FULL.md §F.4).
    target.reset_catch_set()?;

    target.mem_write_phys(SLCR_UNLOCK, &SLCR_UNLOCK_KEY.to_le_bytes())?;
    target.mem_write_phys(PSS_RST_CTRL, &1u32.to_le_bytes())?;

    // Pulse the hard system reset line too (spec.md §4.6 "Reset"); the Zynq
    // SLCR write above is the vendor soft reset, not a substitute for it.
    reset_line.assert()?;
    reset_line.deassert()?;

    // `probe_link_alive` folds any transport error into `Ok(false)`, so
    // there's no `Err` arm to distinguish here.
    let start = Instant::now();
    loop {
        if target.probe_link_alive()? {
            break;
        }
        if start.elapsed() >= RESET_RECONNECT_TIMEOUT {
            return Err(TargetError::ResetReconnectFailed);
        }
    }

    std::thread::sleep(Duration::from_millis(100));
    target.reset_catch_clear()?;

    // Preserved per spec.md §9 Open Questions: attach's result is not
    // surfaced if it fails here.
    let _ = attach(target, reset_line);
    Ok(())
}
