//! Crate error types (spec.md §7).

use crate::arm::memory_mapped_registers::RegisterAddressOutOfBounds;
use crate::transport::TransportError;

/// Errors produced by the ARMv7-A debug target driver.
///
/// This mirrors the three error kinds of spec.md §7: transport failure,
/// MMU/memory-access fault, and resource exhaustion. MMU faults are
/// surfaced through [`crate::target::Target::check_error`] rather than
/// through this type in most cases (see spec.md §7 propagation policy); they
/// appear here only where an operation cannot proceed at all.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// A debug-bus transaction timed out (ITR/DCC handshake, attach
    /// polling, or reset-reconnect polling all share this variant; the
    /// specific deadline is named in the originating call).
    #[error("the debug transport timed out")]
    Timeout,

    /// The underlying access-port transport reported a transaction error.
    #[error("debug transport error")]
    Transport(#[from] TransportError),

    /// An operation that requires the core to be halted was attempted while
    /// it was running.
    #[error("core is running but the operation requires it to be halted")]
    CoreNotHalted,

    /// A synchronous data abort was observed while a proxy instruction was
    /// executing (DSCR.SDABORT_L).
    #[error("a data abort occurred while executing a proxied instruction")]
    DataAbort,

    /// Register number is not valid for this core (spec.md data model:
    /// r0-r15, CPSR, FPSCR, d0-d15).
    #[error("register number {0} is not valid for this core")]
    InvalidRegister(u16),

    /// All hardware breakpoint comparators are in use (spec.md §4.5, §7.3).
    #[error("all hardware breakpoint comparators are in use")]
    BreakpointsExhausted,

    /// The transport reported an unrecoverable error while waiting for the
    /// core to halt; the target is presumed lost (spec.md §4.4, signal 29).
    #[error("target lost: transport failed while waiting for halt")]
    TargetLost,

    /// Reset did not reconnect to the debug link within the recovery
    /// window (spec.md §4.6).
    #[error("target did not reconnect after reset")]
    ResetReconnectFailed,

    #[error(transparent)]
    RegisterAddress(#[from] RegisterAddressOutOfBounds),
}

pub type Result<T> = std::result::Result<T, TargetError>;
