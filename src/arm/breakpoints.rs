//! Breakpoint Manager (spec.md §4.5): allocates up to `hw_bp_count` hardware
//! breakpoint comparators, encodes byte-access-select masks, and reserves
//! comparator 0 for the single-step "instruction-mismatch" trick (spec.md
//! §4.4, §9 Design Notes).

use super::debug_regs::{address_match_bcr, instruction_mismatch_bcr, Dbgbcr, Dbgbvr};
use crate::error::{Result, TargetError};
use crate::transport::{ApbTransport, DebugApbPort};

/// Marks a live debugger-set breakpoint entry (spec.md data model:
/// "zero (free) or `(addr | 1)`").
const LIVE_BIT: u32 = 1;

/// Compute the Byte Access Select mask for an access of `len` bytes at
/// `addr` (spec.md §4.5).
///
/// `len == 4` matches any of the four bytes; `len == 2` matches whichever
/// halfword `addr` falls in.
pub(crate) fn bas_for(addr: u32, len: u32) -> u32 {
    match len {
        4 => 0xf << 5,
        2 if addr & 2 != 0 => 0xc << 5,
        2 => 0x3 << 5,
        _ => 0xf << 5,
    }
}

/// Tracks the live set of hardware breakpoint comparators and the slot-0
/// bookkeeping the single-step trick needs.
#[derive(Debug, Clone)]
pub struct BreakpointManager {
    /// `hw_bp[i]`: 0 if free, `addr | 1` if a debugger breakpoint is live.
    hw_bp: Vec<u32>,
    /// Breakpoint-control value of slot 0 as configured by the debugger,
    /// preserved across step operations (spec.md data model).
    bpc0: Option<Dbgbcr>,
}

impl BreakpointManager {
    /// Create a manager for `count` comparators (spec.md §4.6: `DBGDIDR[27:24]+1`, bounded to 16).
    pub fn new(count: u32) -> Self {
        Self {
            hw_bp: vec![0; count as usize],
            bpc0: None,
        }
    }

    pub fn count(&self) -> usize {
        self.hw_bp.len()
    }

    /// Addresses of all live debugger breakpoints, by slot index.
    pub fn live_addresses(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.hw_bp
            .iter()
            .enumerate()
            .filter(|(_, &v)| v & LIVE_BIT != 0)
            .map(|(i, &v)| (i, v & !LIVE_BIT))
    }

    /// Zero every comparator in the debug register bank and the in-memory
    /// table (spec.md §4.6 attach/detach: "clean breakpoint table").
    pub fn clear_all<P: DebugApbPort>(&mut self, transport: &mut ApbTransport<P>) -> Result<()> {
        for i in 0..self.hw_bp.len() {
            transport.write_word(Dbgbvr::index(i), "DBGBVR", 0)?;
            transport.write_word(Dbgbcr::index(i), "DBGBCR", 0)?;
            self.hw_bp[i] = 0;
        }
        self.bpc0 = None;
        Ok(())
    }

    /// Allocate the first free comparator for a debugger-requested
    /// breakpoint (spec.md §4.5 "Set"). `exclude_slot0` must be set while
    /// single-stepping, since slot 0 is occupied by the mismatch comparator
    /// (spec.md §9 Design Notes).
    pub fn set<P: DebugApbPort>(
        &mut self,
        transport: &mut ApbTransport<P>,
        addr: u32,
        len: u32,
        exclude_slot0: bool,
    ) -> Result<()> {
        let start = if exclude_slot0 { 1 } else { 0 };
        let slot = (start..self.hw_bp.len())
            .find(|&i| self.hw_bp[i] & LIVE_BIT == 0)
            .ok_or(TargetError::BreakpointsExhausted)?;

        let bas = bas_for(addr, len);
        let bcr = address_match_bcr(bas);
        transport.write_word(Dbgbvr::index(slot), "DBGBVR", addr & !3)?;
        transport.write_reg_at(Dbgbcr::index(slot), bcr)?;
        self.hw_bp[slot] = addr | LIVE_BIT;
        if slot == 0 {
            self.bpc0 = Some(bcr);
        }
        Ok(())
    }

    /// Free the comparator holding `addr`, ignoring `len` (spec.md §4.5
    /// "Clear", §9 Design Notes: "ignores `len`... allows clearing a
    /// mismatched-width breakpoint. Preserve.").
    pub fn clear<P: DebugApbPort>(
        &mut self,
        transport: &mut ApbTransport<P>,
        addr: u32,
    ) -> Result<()> {
        let slot = self
            .hw_bp
            .iter()
            .position(|&v| v & LIVE_BIT != 0 && v & !LIVE_BIT == addr)
            .ok_or(TargetError::BreakpointsExhausted)?;

        transport.write_word(Dbgbcr::index(slot), "DBGBCR", 0)?;
        self.hw_bp[slot] = 0;
        if slot == 0 {
            self.bpc0 = None;
        }
        Ok(())
    }

    /// Arm the single-step "instruction mismatch" trick in slot 0 (spec.md
    /// §4.4 resume), saving whatever the debugger had configured there so it
    /// can be restored by [`Self::restore_slot0`].
    pub(crate) fn arm_step<P: DebugApbPort>(
        &mut self,
        transport: &mut ApbTransport<P>,
        pc: u32,
        bas: u32,
    ) -> Result<()> {
        let bcr = instruction_mismatch_bcr(bas);
        transport.write_word(Dbgbvr::index(0), "DBGBVR", pc & !3)?;
        transport.write_reg_at(Dbgbcr::index(0), bcr)?;
        Ok(())
    }

    /// Restore slot 0 to the debugger's program breakpoint (or to empty),
    /// undoing [`Self::arm_step`] (spec.md §4.4 resume, not-stepping branch).
    pub(crate) fn restore_slot0<P: DebugApbPort>(&mut self, transport: &mut ApbTransport<P>) -> Result<()> {
        let live = self.hw_bp[0];
        if live & LIVE_BIT != 0 {
            let addr = live & !LIVE_BIT;
            transport.write_word(Dbgbvr::index(0), "DBGBVR", addr & !3)?;
            if let Some(bcr) = self.bpc0 {
                transport.write_reg_at(Dbgbcr::index(0), bcr)?;
            }
        } else {
            transport.write_word(Dbgbvr::index(0), "DBGBVR", 0)?;
            transport.write_word(Dbgbcr::index(0), "DBGBCR", 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use test_case::test_case;

    #[test_case(0x8000, 4, 0xf << 5; "word aligned, 4 bytes")]
    #[test_case(0x8000, 2, 0x3 << 5; "halfword, low half")]
    #[test_case(0x8002, 2, 0xc << 5; "halfword, high half")]
    fn bas_encoding(addr: u32, len: u32, expected: u32) {
        assert_eq!(bas_for(addr, len), expected);
    }

    #[test]
    fn set_then_clear_programs_slot_zero() {
        let mut mock = MockTransport::new();
        mock.expect_write(0x1100, 0x2000); // DBGBVR[0]
        mock.expect_write(0x1140, 0x1e1); // DBGBCR[0]: BAS=0xf<<5, E=1
        let mut transport = ApbTransport::new(mock, 0x1000);
        let mut mgr = BreakpointManager::new(2);

        mgr.set(&mut transport, 0x2000, 4, false).unwrap();
        assert_eq!(mgr.live_addresses().collect::<Vec<_>>(), vec![(0, 0x2000)]);

        transport.port_mut().expect_write(0x1140, 0); // DBGBCR[0] cleared
        mgr.clear(&mut transport, 0x2000).unwrap();
        assert_eq!(mgr.live_addresses().count(), 0);
    }

    #[test]
    fn set_exhausted_when_every_slot_live() {
        let mut mock = MockTransport::new();
        mock.expect_write(0x1100, 0x1000);
        mock.expect_write(0x1140, 0x1e1);
        let mut transport = ApbTransport::new(mock, 0x1000);
        let mut mgr = BreakpointManager::new(1);

        mgr.set(&mut transport, 0x1000, 4, false).unwrap();
        let err = mgr.set(&mut transport, 0x2000, 4, false).unwrap_err();
        assert!(matches!(err, TargetError::BreakpointsExhausted));
    }
}
