//! The boundary this crate consumes but does not implement: the ADIv5
//! access-port transaction layer (spec.md §1 "Out of scope: the ADIv5
//! access-port library") and the platform hooks for system reset and
//! timeouts. A debugger frontend wires a concrete implementation of these
//! traits to a real ADIv5 probe; this crate only depends on the narrow
//! surface it needs to drive a Cortex-A core.

/// Outcome of a single debug-bus transaction, modeling the
/// exceptions-for-control-flow pattern of the original implementation as a
/// fallible result instead (spec.md §9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response within the access port's own timeout. Distinct from this
    /// crate's higher-level [`crate::TargetError::Timeout`], which also
    /// covers ITR/DCC handshakes that never reach completion.
    #[error("access port transaction timed out")]
    Timeout,
    /// The access port or debug port reported a sticky error (e.g. an
    /// AP/DP `STICKYERR`/`STICKYORUN` condition).
    #[error("access port reported an error")]
    Error,
}

/// A single APB debug-register transaction: write the access port's TAR,
/// then perform the DRW write, or the DRW read followed by the RDBUFF read
/// that completes a pipelined AP read (spec.md §4.1). Implementing the
/// TAR/DRW/RDBUFF protocol itself is the access-port collaborator's job;
/// this crate only calls through the trait.
pub trait DebugApbPort {
    /// Program the access port's TAR to `address`.
    fn write_tar(&mut self, address: u32) -> Result<(), TransportError>;

    /// Write `value` to DRW at the currently-programmed TAR.
    fn write_drw(&mut self, value: u32) -> Result<(), TransportError>;

    /// Read DRW at the currently-programmed TAR, completing the pipelined
    /// transaction with the DP's RDBUFF read.
    fn read_drw(&mut self) -> Result<u32, TransportError>;

    /// Burst-write consecutive values to the same DRW address (used by the
    /// APB-slow fast-DCC memory path, spec.md §4.3). The default
    /// implementation issues one transaction per value; an implementor
    /// backed by a block-transfer-capable probe may override this for
    /// throughput.
    fn write_drw_repeated(&mut self, values: &[u32]) -> Result<(), TransportError> {
        for &v in values {
            self.write_drw(v)?;
        }
        Ok(())
    }

    /// Burst-read consecutive values from the same DRW address.
    fn read_drw_repeated(&mut self, out: &mut [u32]) -> Result<(), TransportError> {
        for slot in out {
            *slot = self.read_drw()?;
        }
        Ok(())
    }

    /// Program the access port's CSW for fixed 32-bit transactions (spec.md
    /// §4.6 probe: "Program APB CSW for 32-bit accesses"). Every debug
    /// register on this bus is a 32-bit word, so a port that only ever does
    /// 32-bit transactions can leave this as a no-op.
    fn configure_for_32bit_access(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// True if the access port (or the debug port behind it) is latching a
    /// sticky transaction error that hasn't been acknowledged yet. Polled by
    /// `check_error` (spec.md §7.1); a port that has no such flag of its own
    /// (errors always surface immediately as `Err`) can leave this `false`.
    fn sticky_error(&mut self) -> Result<bool, TransportError> {
        Ok(false)
    }
}

/// The AHB access port used for the fast memory path (spec.md §4.3, §4.6).
/// Implemented by the access-port collaborator; present only when probe
/// discovered a suitable AHB-AP alongside the debug APB.
pub trait AhbBlockAccess {
    /// Read the AP's IDR register, used by `probe` to recognize a Cortex-A9
    /// compatible AHB-AP (spec.md §4.6: `(IDR & 0x0fffe00f) == 0x04770001`).
    fn idr(&mut self) -> Result<u32, TransportError>;

    /// Read `out.len()` bytes from physical memory starting at `phys_addr`.
    fn read_block(&mut self, phys_addr: u64, out: &mut [u8]) -> Result<(), TransportError>;

    /// Write `data` to physical memory starting at `phys_addr`.
    fn write_block(&mut self, phys_addr: u64, data: &[u8]) -> Result<(), TransportError>;
}

/// Maps the word-indexed ARMv7-A debug register bank onto a concrete
/// [`DebugApbPort`], computing `debug_base + 4 * index` for every access
/// (spec.md §4.1, §6). This is the in-scope "APB Transport" component: it
/// owns the addressing scheme, not the wire protocol underneath it.
pub struct ApbTransport<P> {
    port: P,
    debug_base: u64,
}

impl<P: DebugApbPort> ApbTransport<P> {
    pub fn new(port: P, debug_base: u64) -> Self {
        Self { port, debug_base }
    }

    pub fn debug_base(&self) -> u64 {
        self.debug_base
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn resolve(
        &self,
        index: u64,
        name: &'static str,
    ) -> Result<u32, crate::arm::memory_mapped_registers::RegisterAddressOutOfBounds> {
        let addr =
            self.debug_base
                .checked_add(4 * index)
                .ok_or(crate::arm::memory_mapped_registers::RegisterAddressOutOfBounds::new(
                    name,
                    self.debug_base,
                    index,
                ))?;
        Ok(addr as u32)
    }

    /// Read the word-indexed register at `index`.
    pub(crate) fn read_word(&mut self, index: u64, name: &'static str) -> crate::error::Result<u32> {
        let addr = self.resolve(index, name)?;
        self.port.write_tar(addr)?;
        Ok(self.port.read_drw()?)
    }

    /// Write `value` to the word-indexed register at `index`.
    pub(crate) fn write_word(
        &mut self,
        index: u64,
        name: &'static str,
        value: u32,
    ) -> crate::error::Result<()> {
        let addr = self.resolve(index, name)?;
        self.port.write_tar(addr)?;
        self.port.write_drw(value)?;
        Ok(())
    }

    /// Read a statically-indexed register.
    pub(crate) fn read_reg<R>(&mut self) -> crate::error::Result<R>
    where
        R: crate::arm::memory_mapped_registers::ApbIndexedRegister<u32>,
    {
        let value = self.read_word(R::REG_INDEX, R::NAME)?;
        Ok(R::from(value))
    }

    /// Write a statically-indexed register.
    pub(crate) fn write_reg<R>(&mut self, reg: R) -> crate::error::Result<()>
    where
        R: crate::arm::memory_mapped_registers::ApbIndexedRegister<u32>,
    {
        self.write_word(R::REG_INDEX, R::NAME, reg.into())
    }

    /// Write a bitfield register value at a dynamically-computed index, for
    /// registers like `DBGBVR[i]`/`DBGBCR[i]` that repeat per breakpoint
    /// unit and so can't carry a single `ApbIndexedRegister::REG_INDEX`.
    pub(crate) fn write_reg_at<R>(&mut self, index: u64, reg: R) -> crate::error::Result<()>
    where
        R: Into<u32>,
        R: crate::arm::memory_mapped_registers::ApbIndexedRegister<u32>,
    {
        self.write_word(index, R::NAME, reg.into())
    }

    /// Program the underlying port for fixed 32-bit transactions (spec.md §4.6).
    pub(crate) fn configure_for_32bit_access(&mut self) -> crate::error::Result<()> {
        Ok(self.port.configure_for_32bit_access()?)
    }

    /// True if the port has an unacknowledged sticky transaction error.
    pub(crate) fn sticky_error(&mut self) -> crate::error::Result<bool> {
        Ok(self.port.sticky_error()?)
    }
}

/// Platform hooks this crate relies on but does not own (spec.md §1): system
/// reset line control for the vendor-specific hard reset recovery (spec.md
/// §4.6). Wall-clock delay and deadline polling are handled in-crate with
/// `std::time::Instant`/`std::thread::sleep`, matching the teacher's own
/// idiom for ARM core state machines.
pub trait SystemReset {
    /// Assert the system-wide reset line.
    fn assert(&mut self) -> Result<(), TransportError>;
    /// Deassert the system-wide reset line.
    fn deassert(&mut self) -> Result<(), TransportError>;
    /// True while the system reset line is still asserted.
    fn is_asserted(&mut self) -> Result<bool, TransportError>;
}
