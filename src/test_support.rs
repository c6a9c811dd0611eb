//! Mock transport test double (spec.md §9 Design Notes: exceptions-for-
//! control-flow modeled as fallible results), gated behind the `test`
//! feature so downstream integration tests can exercise the CPU Proxy and
//! Target Facade without real hardware. Modeled on the teacher's own
//! `MockProbe` (`probe-rs`'s `armv7ar.rs` `#[cfg(test)] mod test`): an
//! expectation queue of reads/writes the code under test must perform in
//! order.

use std::collections::VecDeque;

use crate::transport::{AhbBlockAccess, DebugApbPort, SystemReset, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expectation {
    Write { address: u32, value: u32 },
    Read { address: u32, value: u32 },
}

/// Records the APB transactions a unit of code is expected to perform, in
/// order, and plays back the canned values. Panics (via `assert_eq!`) on
/// any mismatch, the same "fail loud at the point of divergence" behavior
/// as the teacher's `MockProbe`.
#[derive(Debug, Default)]
pub struct MockTransport {
    expected: VecDeque<Expectation>,
    current_tar: u32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_write(&mut self, address: u32, value: u32) -> &mut Self {
        self.expected.push_back(Expectation::Write { address, value });
        self
    }

    pub fn expect_read(&mut self, address: u32, value: u32) -> &mut Self {
        self.expected.push_back(Expectation::Read { address, value });
        self
    }

    /// True once every expectation has been consumed; call at the end of a
    /// test to catch code that stopped short of the full expected sequence.
    pub fn all_consumed(&self) -> bool {
        self.expected.is_empty()
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                self.expected.is_empty(),
                "MockTransport dropped with {} unconsumed expectations",
                self.expected.len()
            );
        }
    }
}

impl DebugApbPort for MockTransport {
    fn write_tar(&mut self, address: u32) -> Result<(), TransportError> {
        self.current_tar = address;
        Ok(())
    }

    fn write_drw(&mut self, value: u32) -> Result<(), TransportError> {
        match self.expected.pop_front() {
            Some(Expectation::Write { address, value: expected_value }) => {
                assert_eq!(address, self.current_tar, "unexpected write target address");
                assert_eq!(expected_value, value, "unexpected write value at {:#x}", address);
                Ok(())
            }
            other => panic!("unexpected write at {:#x}: queue had {other:?}", self.current_tar),
        }
    }

    fn read_drw(&mut self) -> Result<u32, TransportError> {
        match self.expected.pop_front() {
            Some(Expectation::Read { address, value }) => {
                assert_eq!(address, self.current_tar, "unexpected read target address");
                Ok(value)
            }
            other => panic!("unexpected read at {:#x}: queue had {other:?}", self.current_tar),
        }
    }
}

/// Trivial AHB access port stand-in: downstream tests that only exercise
/// the APB-slow path can use `Option::<NoAhb>::None`.
#[derive(Debug, Default)]
pub struct NoAhb;

impl AhbBlockAccess for NoAhb {
    fn idr(&mut self) -> Result<u32, TransportError> {
        Ok(0)
    }

    fn read_block(&mut self, _phys_addr: u64, _out: &mut [u8]) -> Result<(), TransportError> {
        panic!("NoAhb does not support block access")
    }

    fn write_block(&mut self, _phys_addr: u64, _data: &[u8]) -> Result<(), TransportError> {
        panic!("NoAhb does not support block access")
    }
}

/// A system-reset line stand-in that is never asserted, for tests that
/// don't exercise reset recovery.
#[derive(Debug, Default)]
pub struct NeverAsserted;

impl SystemReset for NeverAsserted {
    fn assert(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn deassert(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_asserted(&mut self) -> Result<bool, TransportError> {
        Ok(false)
    }
}
