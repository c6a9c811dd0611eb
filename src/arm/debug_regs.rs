//! ARMv7-A debug register definitions (spec.md §6).
//!
//! Word-indexed offsets from `debug_base`:
//!
//! | Index  | Name     | Role                 |
//! |--------|----------|----------------------|
//! | 0      | DBGDIDR  | capability/id        |
//! | 32     | DBGDTRRX | host -> target DCC   |
//! | 33     | DBGITR   | instruction transfer |
//! | 34     | DBGDSCR  | status/control       |
//! | 35     | DBGDTRTX | target -> host DCC   |
//! | 36     | DBGDRCR  | run control          |
//! | 64 + i | DBGBVR\[i\] | breakpoint value  |
//! | 80 + i | DBGBCR\[i\] | breakpoint control|

use super::memory_mapped_registers::memory_mapped_bitfield_register;
use crate::HaltSignal;

memory_mapped_bitfield_register! {
    /// DBGDIDR - Debug ID Register.
    pub struct Dbgdidr(u32);
    0, "DBGDIDR",
    impl From;

    /// Number of implemented breakpoints minus one.
    pub brps, _: 27, 24;
}

impl Dbgdidr {
    /// Number of hardware breakpoint comparators implemented, bounded to 16
    /// (spec.md §4.5: "bounded by 16").
    pub fn breakpoint_count(&self) -> u32 {
        (self.brps() + 1).min(16)
    }
}

memory_mapped_bitfield_register! {
    /// DBGDTRRX - host to target data transfer register.
    pub struct Dbgdtrrx(u32);
    32, "DBGDTRRX",
    impl From;

    pub value, set_value: 31, 0;
}

memory_mapped_bitfield_register! {
    /// DBGITR - Instruction Transfer Register.
    pub struct Dbgitr(u32);
    33, "DBGITR",
    impl From;

    pub value, set_value: 31, 0;
}

memory_mapped_bitfield_register! {
    /// DBGDSCR - Debug Status and Control Register.
    pub struct Dbgdscr(u32);
    34, "DBGDSCR",
    impl From;

    /// DBGDTRTX register full.
    pub txfull, _: 29;

    /// Latched InstrCompl; set when the last ITR-issued instruction has retired.
    pub instrcompl, _: 24;

    /// External DCC access mode: 0b01 stall, 0b10 fast.
    pub extdccmode, set_extdccmode: 21, 20;

    /// Halting debug-mode enable.
    pub hdbgen, set_hdbgen: 14;

    /// ITR mechanism enable.
    pub itren, set_itren: 13;

    /// Interrupts disable (masks IRQ/FIQ while set, used during single-step).
    pub intdis, set_intdis: 11;

    /// Sticky Undefined Instruction.
    pub und_l, _: 8;

    /// Sticky Synchronous Data Abort.
    pub sdabort_l, _: 6;

    /// Method Of debug Entry.
    pub moe, _: 5, 2;

    /// Processor Restarted.
    pub restarted, _: 1;

    /// Processor Halted (DSCR.HALTED).
    pub halted, _: 0;
}

impl Dbgdscr {
    /// Decode MOE into the GDB-style halt signal (spec.md §6, §4.4).
    ///
    /// Only `halt_wait` calls this, and only once HALTED is known to be set.
    pub fn halt_signal(&self) -> HaltSignal {
        match self.moe() {
            0b0000 => HaltSignal::Int,
            _ => HaltSignal::Trap,
        }
    }
}

memory_mapped_bitfield_register! {
    /// DBGDTRTX - target to host data transfer register.
    pub struct Dbgdtrtx(u32);
    35, "DBGDTRTX",
    impl From;

    pub value, set_value: 31, 0;
}

memory_mapped_bitfield_register! {
    /// DBGDRCR - Debug Run Control Register.
    pub struct Dbgdrcr(u32);
    36, "DBGDRCR",
    impl From;

    /// Clear Sticky Exceptions.
    pub cse, set_cse: 2;

    /// Restart request.
    pub rrq, set_rrq: 1;

    /// Halt request.
    pub hrq, set_hrq: 0;
}

/// Breakpoint value register `DBGBVR[i]`, at index `64 + i`.
#[derive(Debug, Clone, Copy)]
pub struct Dbgbvr(pub u32);

impl Dbgbvr {
    /// Word index of `DBGBVR[i]` in the debug register bank.
    pub const fn index(i: usize) -> u64 {
        64 + i as u64
    }
}

memory_mapped_bitfield_register! {
    /// DBGBCR - Breakpoint Control Register.
    ///
    /// Indices are computed per-instance via [`Dbgbcr::index`] since the
    /// `ApbIndexedRegister` trait needs a single constant; callers add the
    /// breakpoint unit number themselves (mirrors how `DBGBVR`/`DBGBCR` are
    /// addressed throughout spec.md §4.5-§4.6).
    pub struct Dbgbcr(u32);
    80, "DBGBCR",
    impl From;

    /// Breakpoint type: 0b0000 address match, 0b0100 instruction mismatch.
    pub bt, set_bt: 23, 20;

    /// Byte Address Select.
    pub bas, set_bas: 8, 5;

    /// Breakpoint enable.
    pub e, set_e: 0;
}

impl Dbgbcr {
    /// Word index of `DBGBCR[i]` in the debug register bank.
    pub const fn index(i: usize) -> u64 {
        80 + i as u64
    }
}

/// Breakpoint control value for a normal (address-match) debugger breakpoint
/// with the given BAS mask (spec.md §4.5).
///
/// `bas` is the already bit-8:5-positioned mask `bas_for` returns (spec.md
/// §8: `bp_bas(a, 4) == 0xf<<5`); `set_bas`'s own field shift would double
/// it, so it is pre-shifted back down here.
pub fn address_match_bcr(bas: u32) -> Dbgbcr {
    let mut bcr = Dbgbcr(0);
    bcr.set_bt(0b0000);
    bcr.set_bas(bas >> 5);
    bcr.set_e(true);
    bcr
}

/// Breakpoint control value for the single-step "instruction mismatch" trick
/// (spec.md §4.4): fires on any instruction that does *not* match `bas` at
/// the armed address.
pub fn instruction_mismatch_bcr(bas: u32) -> Dbgbcr {
    let mut bcr = Dbgbcr(0);
    bcr.set_bt(0b0100);
    bcr.set_bas(bas >> 5);
    bcr.set_e(true);
    bcr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moe_zero_is_int_others_are_trap() {
        let mut dscr = Dbgdscr(0);
        assert_eq!(dscr.halt_signal(), HaltSignal::Int);
        dscr.0 = 0b0001 << 2; // breakpoint debug event
        assert_eq!(dscr.halt_signal(), HaltSignal::Trap);
    }

    #[test]
    fn address_match_bcr_places_bas_at_bits_8_5() {
        let bcr: u32 = address_match_bcr(0xf << 5).into();
        assert_eq!(bcr, (0xf << 5) | 1);
    }

    #[test]
    fn instruction_mismatch_bcr_sets_type_and_bas() {
        let bcr: u32 = instruction_mismatch_bcr(0x3 << 5).into();
        assert_eq!(bcr, (0b0100 << 20) | (0x3 << 5) | 1);
    }
}

memory_mapped_bitfield_register! {
    /// DBGPRCR - Powerdown and Reset Control Register (SPEC_FULL.md §F.4,
    /// reset-catch supplement). Byte offset `0x310`, word index `0xc4`.
    pub struct Dbgprcr(u32);
    0xc4, "DBGPRCR",
    impl From;

    /// Hold core in warm reset: catches the core the instant it comes out
    /// of a vendor reset, halted, before it executes anything.
    pub hcwr, set_hcwr: 2;
}
