//! Debug target driver for ARMv7-A (Cortex-A9, Zynq-7000) cores.
//!
//! This crate drives a halted-or-running Cortex-A9 core over its Debug
//! Communications Channel (DCC) and Instruction Transfer Register (ITR),
//! using the core itself as a proxy CPU to read and write registers and
//! memory. It assumes an ADIv5 debug link is already established and
//! addressable through the APB access port; everything below that line
//! (the access-port wire protocol, probe enumeration, transport timeouts)
//! is the caller's responsibility, reached through the traits in
//! [`transport`].
//!
//! The crate root exposes the [`arm::target::Target`] facade, which composes
//! the APB transport, the CPU proxy, the memory subsystem, the halt/resume
//! state machine, and the breakpoint manager into the single entry point a
//! debugger frontend (e.g. a GDB remote-serial stub) talks to.

pub mod arm;
pub mod error;
#[cfg(any(test, feature = "test"))]
pub mod test_support;
pub mod transport;

pub use crate::arm::halt::{CoreState, HaltWait};
pub use crate::arm::memory::CORTEX_A9_DCACHE_LINE_LEN;
pub use crate::arm::probe::probe;
pub use crate::arm::target::{Endian, Target};
pub use crate::error::{Result, TargetError};

/// GDB-style stop signal, decoded from DBGDSCR.MOE when the core halts.
///
/// Values match the Unix signal numbers GDB's remote protocol expects in a
/// `T`/`S` stop reply packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltSignal {
    /// SIGINT (2): a deliberate halt request, breakpoint hit via external
    /// debug request, or an unrecognized MOE encoding.
    Int = 2,
    /// SIGTRAP (5): breakpoint or watchpoint debug event.
    Trap = 5,
    /// A target-specific "connection lost" pseudo-signal (29, `SIGLOST`):
    /// synthesized locally when the transport fails while waiting for halt,
    /// never an actual MOE value.
    Lost = 29,
}
