//! Target Facade (spec.md §4.7): the outward interface a debugger frontend
//! consumes. Composes the APB transport, the CPU proxy, the memory
//! subsystem, the halt/resume state machine, and the breakpoint manager
//! into a single per-processor handle.

use std::time::{Duration, Instant};

use super::breakpoints::BreakpointManager;
use super::cpu_proxy::{fpu_register_count, snapshot};
use super::debug_regs::{Dbgdidr, Dbgdrcr, Dbgdscr, Dbgprcr};
use super::halt::{self, CoreState, HaltWait};
use super::memory::MemorySubsystem;
use super::regfile::{RegId, RegisterCache, SNAPSHOT_LEN};
use crate::error::{Result, TargetError};
use crate::transport::{AhbBlockAccess, ApbTransport, DebugApbPort};
use crate::HaltSignal;

/// Target endianness, resolved from CPSR.E (SPEC_FULL.md §F.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// How long [`Target::halted_access`] will poll for a transparent halt
/// before giving up.
const HALTED_ACCESS_TIMEOUT: Duration = Duration::from_millis(500);
const HALTED_ACCESS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// GDB target-description XML for this core: 16 core registers, CPSR,
/// FPSCR, and d0-d15 (spec.md §4.7, §6).
pub const TARGET_DESCRIPTION_XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target version="1.0">
  <architecture>arm</architecture>
  <feature name="org.gnu.gdb.arm.core">
    <reg name="r0" bitsize="32" type="int32"/>
    <reg name="r1" bitsize="32" type="int32"/>
    <reg name="r2" bitsize="32" type="int32"/>
    <reg name="r3" bitsize="32" type="int32"/>
    <reg name="r4" bitsize="32" type="int32"/>
    <reg name="r5" bitsize="32" type="int32"/>
    <reg name="r6" bitsize="32" type="int32"/>
    <reg name="r7" bitsize="32" type="int32"/>
    <reg name="r8" bitsize="32" type="int32"/>
    <reg name="r9" bitsize="32" type="int32"/>
    <reg name="r10" bitsize="32" type="int32"/>
    <reg name="r11" bitsize="32" type="int32"/>
    <reg name="r12" bitsize="32" type="int32"/>
    <reg name="sp" bitsize="32" type="data_ptr"/>
    <reg name="lr" bitsize="32" type="int32"/>
    <reg name="pc" bitsize="32" type="code_ptr"/>
    <reg name="cpsr" bitsize="32" type="int32"/>
  </feature>
  <feature name="org.gnu.gdb.arm.vfp">
    <reg name="fpscr" bitsize="32" type="int32"/>
    <reg name="d0" bitsize="64" type="ieee_double"/>
    <reg name="d1" bitsize="64" type="ieee_double"/>
    <reg name="d2" bitsize="64" type="ieee_double"/>
    <reg name="d3" bitsize="64" type="ieee_double"/>
    <reg name="d4" bitsize="64" type="ieee_double"/>
    <reg name="d5" bitsize="64" type="ieee_double"/>
    <reg name="d6" bitsize="64" type="ieee_double"/>
    <reg name="d7" bitsize="64" type="ieee_double"/>
    <reg name="d8" bitsize="64" type="ieee_double"/>
    <reg name="d9" bitsize="64" type="ieee_double"/>
    <reg name="d10" bitsize="64" type="ieee_double"/>
    <reg name="d11" bitsize="64" type="ieee_double"/>
    <reg name="d12" bitsize="64" type="ieee_double"/>
    <reg name="d13" bitsize="64" type="ieee_double"/>
    <reg name="d14" bitsize="64" type="ieee_double"/>
    <reg name="d15" bitsize="64" type="ieee_double"/>
  </feature>
</target>
"#;

/// Per-processor debug target handle (spec.md §3 "Target handle").
///
/// `P` is the APB debug access port transport; `A` is the AHB access port
/// used by the fast memory path, when one was found suitable at probe time.
pub struct Target<P, A> {
    transport: ApbTransport<P>,
    memory: MemorySubsystem<A>,
    reg_cache: RegisterCache,
    breakpoints: BreakpointManager,
    /// Sticky MMU/data-abort flag (spec.md §3 invariants): set by any VA->PA
    /// translation failure or synchronous data abort observed during proxy
    /// memory access, read-and-cleared by [`Target::check_error`].
    mmu_fault: bool,
    /// True while the core is running (i.e. between a `halt_resume` call
    /// and the `halt_wait` that observes it halted again).
    running: bool,
    /// True from a step `halt_resume(true)` until the following
    /// `halt_resume` call restores slot 0 (spec.md §3 invariants, §9 Design
    /// Notes: dedicated Halted-Stepping state rather than a mutable aside).
    stepping: bool,
    /// Number of VFP double-precision registers, probed once on first
    /// attach (0 if the core has no FPU). SPEC_FULL.md §F.2.
    fp_reg_count: u32,
    /// Cached target endianness, resolved lazily (SPEC_FULL.md §F.1).
    endian: Option<Endian>,
}

impl<P: DebugApbPort, A: AhbBlockAccess> Target<P, A> {
    pub(crate) fn new(
        transport: ApbTransport<P>,
        ahb: Option<A>,
        bp_count: u32,
        cache_line_len: u32,
    ) -> Self {
        Self {
            transport,
            memory: MemorySubsystem::new(ahb, cache_line_len),
            reg_cache: RegisterCache::new(),
            breakpoints: BreakpointManager::new(bp_count),
            mmu_fault: false,
            running: true,
            stepping: false,
            fp_reg_count: 0,
            endian: None,
        }
    }

    /// Current high-level state (spec.md §4.4): Running, Halted, or
    /// Halted-Stepping.
    pub fn state(&self) -> CoreState {
        if self.running {
            CoreState::Running
        } else if self.stepping {
            CoreState::HaltedStepping
        } else {
            CoreState::Halted
        }
    }

    /// Number of hardware breakpoint comparators discovered at probe time.
    pub fn hw_bp_count(&self) -> usize {
        self.breakpoints.count()
    }

    /// True if this target was probed with a usable AHB-fast memory path.
    pub fn has_ahb_fast_path(&self) -> bool {
        self.memory.has_ahb_fast_path()
    }

    /// True if the core has a VFP unit (SPEC_FULL.md §F.2). Valid only after
    /// the first successful attach; `false` before then.
    pub fn fpu_present(&self) -> bool {
        self.fp_reg_count != 0
    }

    /// Number of VFP double-precision registers (0, 16, or 32), probed once
    /// on first attach (SPEC_FULL.md §F.2).
    pub fn float_register_count(&self) -> usize {
        self.fp_reg_count as usize
    }

    /// Resolve and cache target endianness from CPSR.E, halting
    /// transparently if the core is running (SPEC_FULL.md §F.1).
    pub fn endianness(&mut self) -> Result<Endian> {
        if let Some(endian) = self.endian {
            return Ok(endian);
        }
        self.halted_access(|target| {
            let cpsr = target
                .reg_cache
                .cached_word(RegId::Cpsr)?
                .ok_or(TargetError::CoreNotHalted)?;
            let endian = if cpsr & (1 << 9) == 0 { Endian::Little } else { Endian::Big };
            target.endian = Some(endian);
            Ok(endian)
        })
    }

    /// Run `op` with the core guaranteed halted, resuming it afterward if it
    /// was running on entry (spec.md §F.3 "halted-access wrapper"). Internal
    /// convenience on top of the explicit halt/resume state machine; not
    /// part of the debugger-visible surface.
    fn halted_access<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let was_running = self.running;
        if was_running {
            self.halt_request()?;
            let start = Instant::now();
            loop {
                if matches!(self.halt_wait()?, HaltWait::Halted(_)) {
                    break;
                }
                if start.elapsed() >= HALTED_ACCESS_TIMEOUT {
                    return Err(TargetError::Timeout);
                }
                std::thread::sleep(HALTED_ACCESS_POLL_INTERVAL);
            }
        }

        let result = op(self);

        if was_running {
            self.halt_resume(false)?;
        }

        result
    }

    /// Bring the core under halting-debug control (spec.md §4.6 "Attach").
    #[tracing::instrument(skip_all)]
    pub fn attach(&mut self, reset: &mut impl crate::transport::SystemReset) -> Result<()> {
        super::probe::attach(self, reset)
    }

    /// Leave halting-debug control (spec.md §4.6 "Detach").
    #[tracing::instrument(skip_all)]
    pub fn detach(&mut self) -> Result<()> {
        super::probe::detach(self)
    }

    /// Vendor-specific hard reset with reconnection polling (spec.md §4.6
    /// "Reset").
    #[tracing::instrument(skip_all)]
    pub fn reset(&mut self, reset: &mut impl crate::transport::SystemReset) -> Result<()> {
        super::probe::reset(self, reset)
    }

    /// Request the core to halt; does not wait (spec.md §4.4).
    pub fn halt_request(&mut self) -> Result<()> {
        halt::halt_request(&mut self.transport)
    }

    /// Poll once for halt (spec.md §4.4 "Halt wait").
    pub fn halt_wait(&mut self) -> Result<HaltWait> {
        let outcome = halt::halt_wait(&mut self.transport, &mut self.reg_cache, self.fp_reg_count)?;
        if matches!(outcome, HaltWait::Halted(_)) {
            self.running = false;
        }
        Ok(outcome)
    }

    /// Resume the core, optionally single-stepping (spec.md §4.4 "Resume").
    #[tracing::instrument(skip(self))]
    pub fn halt_resume(&mut self, step: bool) -> Result<()> {
        halt::halt_resume(
            &mut self.transport,
            &mut self.reg_cache,
            &mut self.breakpoints,
            step,
            self.fp_reg_count,
        )?;
        self.running = true;
        self.stepping = step;
        Ok(())
    }

    /// Copy the cached register snapshot out in the facade's fixed byte
    /// layout (spec.md §4.7 `regs_read`).
    pub fn regs_read(&self, out: &mut [u8; SNAPSHOT_LEN]) -> Result<()> {
        let bytes = self
            .reg_cache
            .to_bytes()
            .ok_or(crate::error::TargetError::CoreNotHalted)?;
        out.copy_from_slice(&bytes);
        Ok(())
    }

    /// Stage a full register write from the facade's fixed byte layout; the
    /// values are flushed to the core on the next [`Target::halt_resume`]
    /// (spec.md §4.7 `regs_write`, §4.2 register bank snapshot/restore).
    pub fn regs_write(&mut self, buf: &[u8; SNAPSHOT_LEN]) {
        self.reg_cache.apply_bytes(buf);
    }

    /// Read `dst.len()` bytes of target memory starting at `src` (spec.md
    /// §4.7 `mem_read`), via whichever of the fast/slow paths was bound at
    /// probe time.
    pub fn mem_read(&mut self, dst: &mut [u8], src: u64) -> Result<()> {
        self.memory
            .read(&mut self.transport, &mut self.mmu_fault, src, dst)
    }

    /// Write `src` to target memory starting at `dst` (spec.md §4.7
    /// `mem_write`).
    pub fn mem_write(&mut self, dst: u64, src: &[u8]) -> Result<()> {
        self.memory
            .write(&mut self.transport, &mut self.mmu_fault, dst, src)
    }

    /// Allocate a hardware breakpoint comparator (spec.md §4.5 "Set").
    /// Fails with [`crate::error::TargetError::BreakpointsExhausted`] if
    /// every comparator is already in use.
    pub fn set_hw_bp(&mut self, addr: u32, len: u32) -> Result<()> {
        self.breakpoints.set(&mut self.transport, addr, len, self.stepping)
    }

    /// Free the comparator holding `addr`. `len` is accepted for facade
    /// symmetry but ignored, matching the original driver's behavior of
    /// matching on address only (spec.md §9 Design Notes, Open Questions).
    pub fn clear_hw_bp(&mut self, addr: u32, _len: u32) -> Result<()> {
        self.breakpoints.clear(&mut self.transport, addr)
    }

    /// Read-and-clear the sticky MMU/data-abort flag, OR'd with any
    /// outstanding sticky transport error (spec.md §7 propagation policy).
    pub fn check_error(&mut self) -> Result<bool> {
        let mmu_fault = self.mmu_fault;
        self.mmu_fault = false;
        let transport_error = self.transport.sticky_error()?;
        Ok(mmu_fault || transport_error)
    }

    /// Static GDB target-description XML (spec.md §4.7, §6).
    pub fn target_description(&self) -> &'static str {
        TARGET_DESCRIPTION_XML
    }

    // -- Internal helpers used by `probe::{attach, detach, reset}` --

    pub(crate) fn clear_sticky_error(&mut self) -> Result<()> {
        let mut drcr = Dbgdrcr(0);
        drcr.set_cse(true);
        self.transport.write_reg(drcr)
    }

    pub(crate) fn enable_halting_debug(&mut self) -> Result<()> {
        let mut dscr: Dbgdscr = self.transport.read_reg()?;
        dscr.set_hdbgen(true);
        dscr.set_itren(true);
        dscr.set_extdccmode(0b01); // stall mode
        self.transport.write_reg(dscr)
    }

    pub(crate) fn poll_halted(&mut self) -> Result<bool> {
        let dscr: Dbgdscr = self.transport.read_reg()?;
        Ok(dscr.halted())
    }

    pub(crate) fn clear_breakpoint_table(&mut self) -> Result<()> {
        self.breakpoints.clear_all(&mut self.transport)
    }

    pub(crate) fn mark_attached(&mut self) {
        self.running = false;
        self.stepping = false;
        self.reg_cache.invalidate();
        if let Ok(count) = fpu_register_count(&mut self.transport) {
            self.fp_reg_count = count;
        }
        let _ = snapshot(&mut self.transport, &mut self.reg_cache, self.fp_reg_count);
    }

    /// Detach sequence body (spec.md §4.6 "Detach"): flush registers,
    /// invalidate the I-cache, clear `HDBGEN`/`ITREN`, and restart.
    pub(crate) fn flush_and_resume_detached(&mut self) -> Result<()> {
        super::cpu_proxy::flush(&mut self.transport, &mut self.reg_cache, self.fp_reg_count)?;
        super::cpu_proxy::invalidate_icache(&mut self.transport)?;

        let mut dscr: Dbgdscr = self.transport.read_reg()?;
        dscr.set_hdbgen(false);
        dscr.set_itren(false);
        self.transport.write_reg(dscr)?;

        let mut drcr = Dbgdrcr(0);
        drcr.set_cse(true);
        drcr.set_rrq(true);
        self.transport.write_reg(drcr)?;

        self.running = true;
        self.stepping = false;
        self.reg_cache.invalidate();
        Ok(())
    }

    pub(crate) fn mem_write_phys(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.mem_write(addr, data)
    }

    /// Set `DBGPRCR.HCWR` so the core is held halted the instant it comes
    /// out of the next warm reset, before the vendor reset recovery polling
    /// begins (SPEC_FULL.md §F.4, "reset-catch sequence"). `DBGPRCR` is a
    /// plain APB register, not a CPU-proxy instruction target, so this
    /// doesn't need (and must not use) `halted_access`: wrapping it there
    /// would transiently resume a running core via its resume-on-exit
    /// epilogue, right before `probe::reset`'s subsequent CPU-proxy memory
    /// writes need the core to still be halted.
    pub(crate) fn reset_catch_set(&mut self) -> Result<()> {
        let mut prcr: Dbgprcr = self.transport.read_reg()?;
        prcr.set_hcwr(true);
        self.transport.write_reg(prcr)
    }

    /// Clear `DBGPRCR.HCWR` once the core has been caught out of reset.
    pub(crate) fn reset_catch_clear(&mut self) -> Result<()> {
        let mut prcr: Dbgprcr = self.transport.read_reg()?;
        prcr.set_hcwr(false);
        self.transport.write_reg(prcr)
    }

    /// True if the debug link still answers a `DBGDIDR` read (spec.md §4.6
    /// "Reset": polled during reconnection after the Zynq SLCR reset pulse
    /// tears the link down).
    pub(crate) fn probe_link_alive(&mut self) -> Result<bool> {
        let result: Result<Dbgdidr> = self.transport.read_reg();
        Ok(result.is_ok())
    }

    /// Decode a halted core's stop signal from a fresh DSCR read, without
    /// taking the full register snapshot (used by tests and diagnostics).
    pub fn last_halt_signal(&mut self) -> Result<Option<HaltSignal>> {
        let dscr: Dbgdscr = self.transport.read_reg()?;
        Ok(if dscr.halted() {
            Some(dscr.halt_signal())
        } else {
            None
        })
    }
}
