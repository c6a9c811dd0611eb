//! Integration tests against the public `Target` facade, exercising a few
//! of the end-to-end scenarios from spec.md §8 with a scripted
//! `MockTransport` instead of real hardware.
//!
//! Requires the `test` feature (`cargo test --features test`), which gates
//! the `test_support` module used here.

#![cfg(feature = "test")]

use armv7a_debug_core::test_support::{MockTransport, NoAhb};
use armv7a_debug_core::{probe, TargetError};

const DBGDIDR: u64 = 0;
const DBGDTRRX: u64 = 32;
const DBGITR: u64 = 33;
const DBGDSCR: u64 = 34;
const DBGDTRTX: u64 = 35;
const DBGDRCR: u64 = 36;
const DBGBVR0: u64 = 64;
const DBGBCR0: u64 = 80;

const INSTRCOMPL: u32 = 1 << 24;
const TXFULL: u32 = 1 << 29;
const SDABORT_L: u32 = 1 << 6;

/// `MRC p14, 0, r0, c0, c5, 0` (DCC -> r0), as built by
/// `arm::instructions::build_mrc(14, 0, 0, 0, 5, 0)`.
const MRC_DCC_TO_R0: u32 = 0xEE10_0E15;
/// `LDC p14, c5, [r0], #4` (fast-DCC stream read), spec.md §4.2.
const LDC_FAST_STREAM: u32 = 0xECB0_5E01;

fn reg(debug_base: u64, index: u64) -> u32 {
    (debug_base + 4 * index) as u32
}

/// spec.md §8 scenario 5: "Breakpoint exhaustion" -- setting up to `N`
/// comparators succeeds, the `N+1`-th fails, clearing one frees a slot for
/// a subsequent set, and clearing the same address twice fails.
#[test]
fn breakpoint_allocation_exhaustion_and_idempotent_clear() {
    let debug_base = 0x5000u64;
    let mut mock = MockTransport::new();

    // probe(): DBGDIDR reports 2 comparators (BRPS field = 1).
    mock.expect_read(reg(debug_base, DBGDIDR), 1 << 24);

    // set_hw_bp(0x3000, 4) lands in slot 0.
    mock.expect_write(reg(debug_base, DBGBVR0), 0x3000);
    mock.expect_write(reg(debug_base, DBGBCR0), 0x1e1);

    // set_hw_bp(0x4000, 4) lands in slot 1.
    mock.expect_write(reg(debug_base, DBGBVR0 + 1), 0x4000);
    mock.expect_write(reg(debug_base, DBGBCR0 + 1), 0x1e1);

    // Clearing 0x3000 frees slot 0. The exhausted third `set` and the
    // repeat `clear` below never touch the transport at all.
    mock.expect_write(reg(debug_base, DBGBCR0), 0);

    // The freed slot accepts a new breakpoint.
    mock.expect_write(reg(debug_base, DBGBVR0), 0x6000);
    mock.expect_write(reg(debug_base, DBGBCR0), 0x1e1);

    let mut target = probe(mock, debug_base, Option::<NoAhb>::None, 32).unwrap();
    assert_eq!(target.hw_bp_count(), 2);

    target.set_hw_bp(0x3000, 4).unwrap();
    target.set_hw_bp(0x4000, 4).unwrap();

    // Both comparators are live; a third request is refused.
    let err = target.set_hw_bp(0x5000, 4).unwrap_err();
    assert!(matches!(err, TargetError::BreakpointsExhausted));

    target.clear_hw_bp(0x3000, 4).unwrap();

    // Clearing it again fails: the slot is already free.
    let err = target.clear_hw_bp(0x3000, 4).unwrap_err();
    assert!(matches!(err, TargetError::BreakpointsExhausted));

    target.set_hw_bp(0x6000, 4).unwrap();
}

/// spec.md §8 scenario 4: "MMU fault on read" -- a slow-path `mem_read`
/// over an address the core data-aborts on completes without raising an
/// error, and the sticky flag reads true exactly once afterward.
#[test]
fn mem_read_over_unmapped_address_sets_sticky_mmu_fault() {
    let debug_base = 0x5000u64;
    let mut mock = MockTransport::new();
    mock.expect_read(reg(debug_base, DBGDIDR), 1 << 24);

    let word_base = 0x9000u32;

    // write_gp(0, word_base): DTRRX <- word_base, then MRC via ITR.
    mock.expect_write(reg(debug_base, DBGDTRRX), word_base);
    mock.expect_write(reg(debug_base, DBGITR), MRC_DCC_TO_R0);
    mock.expect_read(reg(debug_base, DBGDSCR), INSTRCOMPL);
    // set_dcc_mode(fast)
    mock.expect_read(reg(debug_base, DBGDSCR), 0);
    mock.expect_write(reg(debug_base, DBGDSCR), 0b10 << 20);
    // ldc p14, c5, [r0], #4
    mock.expect_write(reg(debug_base, DBGITR), LDC_FAST_STREAM);
    mock.expect_read(reg(debug_base, DBGDSCR), INSTRCOMPL);
    // erratum: discard the first (stale) DTRTX drain
    mock.expect_read(reg(debug_base, DBGDSCR), TXFULL);
    mock.expect_read(reg(debug_base, DBGDTRTX), 0xdead_beef);
    // one live word drained (a 4-byte read is exactly one word)
    mock.expect_read(reg(debug_base, DBGDSCR), TXFULL);
    mock.expect_read(reg(debug_base, DBGDTRTX), 0x1234_5678);
    // set_dcc_mode(stall)
    mock.expect_read(reg(debug_base, DBGDSCR), 0);
    mock.expect_write(reg(debug_base, DBGDSCR), 0b01 << 20);
    // abort pending -> clear it
    mock.expect_read(reg(debug_base, DBGDSCR), SDABORT_L);
    mock.expect_write(reg(debug_base, DBGDRCR), 0b100);

    let mut target = probe(mock, debug_base, Option::<NoAhb>::None, 32).unwrap();

    let mut buf = [0u8; 4];
    target.mem_read(&mut buf, word_base as u64).unwrap();
    assert_eq!(buf, 0x1234_5678u32.to_le_bytes());

    assert!(target.check_error().unwrap(), "sticky MMU fault must surface once");
    assert!(!target.check_error().unwrap(), "check_error clears the sticky flag");
}

/// Same scenario as above, but the data abort is raised by the `ldc`
/// injection itself (its own `INSTRCOMPL` poll carries `SDABORT_L`), rather
/// than appearing only after the stream has drained. `mem_read` must still
/// complete normally and surface the fault through the sticky flag instead
/// of propagating a hard error out of the `ldc`'s completion poll.
#[test]
fn mem_read_aborts_on_ldc_itself_sets_sticky_mmu_fault() {
    let debug_base = 0x5000u64;
    let mut mock = MockTransport::new();
    mock.expect_read(reg(debug_base, DBGDIDR), 1 << 24);

    let word_base = 0x9000u32;

    // write_gp(0, word_base): DTRRX <- word_base, then MRC via ITR.
    mock.expect_write(reg(debug_base, DBGDTRRX), word_base);
    mock.expect_write(reg(debug_base, DBGITR), MRC_DCC_TO_R0);
    mock.expect_read(reg(debug_base, DBGDSCR), INSTRCOMPL);
    // set_dcc_mode(fast)
    mock.expect_read(reg(debug_base, DBGDSCR), 0);
    mock.expect_write(reg(debug_base, DBGDSCR), 0b10 << 20);
    // ldc p14, c5, [r0], #4 -- data-aborts on retire; the ldc's own
    // completion poll must not bail out here as a hard error.
    mock.expect_write(reg(debug_base, DBGITR), LDC_FAST_STREAM);
    mock.expect_read(reg(debug_base, DBGDSCR), INSTRCOMPL | SDABORT_L);
    // erratum: discard the first (stale) DTRTX drain
    mock.expect_read(reg(debug_base, DBGDSCR), TXFULL);
    mock.expect_read(reg(debug_base, DBGDTRTX), 0xdead_beef);
    // one live word drained (a 4-byte read is exactly one word)
    mock.expect_read(reg(debug_base, DBGDSCR), TXFULL);
    mock.expect_read(reg(debug_base, DBGDTRTX), 0x1234_5678);
    // set_dcc_mode(stall)
    mock.expect_read(reg(debug_base, DBGDSCR), 0);
    mock.expect_write(reg(debug_base, DBGDSCR), 0b01 << 20);
    // abort pending -> clear it (SDABORT_L is still sticky from the ldc)
    mock.expect_read(reg(debug_base, DBGDSCR), SDABORT_L);
    mock.expect_write(reg(debug_base, DBGDRCR), 0b100);

    let mut target = probe(mock, debug_base, Option::<NoAhb>::None, 32).unwrap();

    let mut buf = [0u8; 4];
    target.mem_read(&mut buf, word_base as u64).unwrap();

    assert!(target.check_error().unwrap(), "sticky MMU fault must surface once");
    assert!(!target.check_error().unwrap(), "check_error clears the sticky flag");
}
