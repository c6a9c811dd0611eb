//! Register identity and the write-back cache used by the CPU Proxy.
//!
//! Every proxied register access costs at least one ITR round trip, so reads
//! are cached until the core next halts and writes are deferred ("written
//! back") until the core is about to resume, exactly as the teacher's own
//! core implementations do it.

use crate::error::{Result, TargetError};

/// Number of general-purpose registers (r0-r15, r15 being PC).
pub const NUM_GPR: usize = 16;
/// Number of double-precision VFP registers (d0-d15).
pub const NUM_DREG: usize = 16;

/// Identifies one of this core's registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegId {
    /// `r0`..=`r15`. `r15` is the program counter.
    Gpr(u8),
    Cpsr,
    Fpscr,
    /// `d0`..=`d15`.
    Dreg(u8),
}

impl RegId {
    /// Flat slot used to index the cache, and the same ordering used by
    /// [`RegisterCache::to_bytes`]/[`RegisterCache::apply_bytes`]: r0-r15,
    /// then cpsr, then fpscr, then d0-d15.
    fn slot(self) -> Result<usize> {
        match self {
            RegId::Gpr(n) if (n as usize) < NUM_GPR => Ok(n as usize),
            RegId::Cpsr => Ok(NUM_GPR),
            RegId::Fpscr => Ok(NUM_GPR + 1),
            RegId::Dreg(n) if (n as usize) < NUM_DREG => Ok(NUM_GPR + 2 + n as usize),
            RegId::Gpr(n) => Err(TargetError::InvalidRegister(n as u16)),
            RegId::Dreg(n) => Err(TargetError::InvalidRegister(0x100 + n as u16)),
        }
    }
}

const NUM_SLOTS: usize = NUM_GPR + 2 + NUM_DREG;

/// Flat byte layout of a full register snapshot: 16 `u32` GPRs, `u32` CPSR,
/// `u32` FPSCR, 16 `u64` D-registers. 16*4 + 4 + 4 + 16*8 = 200 bytes.
pub const SNAPSHOT_LEN: usize = NUM_GPR * 4 + 4 + 4 + NUM_DREG * 8;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Slot {
    Word(u32),
    DWord(u64),
}

/// Per-core register cache: values read from the proxy CPU are cached until
/// invalidated by a halt, and writes are marked dirty and flushed back to the
/// core just before it resumes.
#[derive(Debug, Clone)]
pub struct RegisterCache {
    values: [Option<Slot>; NUM_SLOTS],
    dirty: [bool; NUM_SLOTS],
}

impl Default for RegisterCache {
    fn default() -> Self {
        Self {
            values: [None; NUM_SLOTS],
            dirty: [false; NUM_SLOTS],
        }
    }
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all cached values without marking anything dirty. Called
    /// whenever the core transitions to halted, since everything cached from
    /// before is now stale.
    pub fn invalidate(&mut self) {
        self.values = [None; NUM_SLOTS];
        self.dirty = [false; NUM_SLOTS];
    }

    pub fn cached_word(&self, id: RegId) -> Result<Option<u32>> {
        Ok(match self.values[id.slot()?] {
            Some(Slot::Word(v)) => Some(v),
            _ => None,
        })
    }

    pub fn cached_dword(&self, id: RegId) -> Result<Option<u64>> {
        Ok(match self.values[id.slot()?] {
            Some(Slot::DWord(v)) => Some(v),
            _ => None,
        })
    }

    /// Take a word value if it is staged as dirty, clearing its dirty bit.
    /// Used by the flush sequence, which writes registers back in a fixed
    /// order rather than cache order.
    pub fn take_dirty_word(&mut self, id: RegId) -> Result<Option<u32>> {
        let slot = id.slot()?;
        if !self.dirty[slot] {
            return Ok(None);
        }
        self.dirty[slot] = false;
        Ok(match self.values[slot] {
            Some(Slot::Word(v)) => Some(v),
            _ => None,
        })
    }

    /// Take a D-register value if it is staged as dirty, clearing its dirty bit.
    pub fn take_dirty_dword(&mut self, id: RegId) -> Result<Option<u64>> {
        let slot = id.slot()?;
        if !self.dirty[slot] {
            return Ok(None);
        }
        self.dirty[slot] = false;
        Ok(match self.values[slot] {
            Some(Slot::DWord(v)) => Some(v),
            _ => None,
        })
    }

    pub fn fill_word(&mut self, id: RegId, value: u32) -> Result<()> {
        self.values[id.slot()?] = Some(Slot::Word(value));
        Ok(())
    }

    pub fn fill_dword(&mut self, id: RegId, value: u64) -> Result<()> {
        self.values[id.slot()?] = Some(Slot::DWord(value));
        Ok(())
    }

    /// Stage a word-sized register write, to be applied the next time the
    /// cache is flushed.
    pub fn write_word(&mut self, id: RegId, value: u32) -> Result<()> {
        let slot = id.slot()?;
        self.values[slot] = Some(Slot::Word(value));
        self.dirty[slot] = true;
        Ok(())
    }

    /// Stage a D-register write.
    pub fn write_dword(&mut self, id: RegId, value: u64) -> Result<()> {
        let slot = id.slot()?;
        self.values[slot] = Some(Slot::DWord(value));
        self.dirty[slot] = true;
        Ok(())
    }

    /// Iterate the registers that have been written since the last flush, in
    /// cache order.
    pub fn dirty_entries(&self) -> impl Iterator<Item = (RegId, Slot)> + '_ {
        (0..NUM_SLOTS).filter_map(move |slot| {
            if !self.dirty[slot] {
                return None;
            }
            let id = slot_to_id(slot);
            self.values[slot].map(|v| (id, v))
        })
    }

    /// Clear the dirty flags once the CPU proxy has written every dirty
    /// register back to the core.
    pub fn clear_dirty(&mut self) {
        self.dirty = [false; NUM_SLOTS];
    }

    /// Serialize a fully-populated cache into the facade's flat 200-byte
    /// snapshot layout. Returns `None` if any register has never been read
    /// or written (the facade always fills every slot before calling this).
    pub fn to_bytes(&self) -> Option<[u8; SNAPSHOT_LEN]> {
        let mut out = [0u8; SNAPSHOT_LEN];
        let mut cursor = 0;
        for n in 0..NUM_GPR {
            let Some(Slot::Word(v)) = self.values[n] else {
                return None;
            };
            out[cursor..cursor + 4].copy_from_slice(&v.to_le_bytes());
            cursor += 4;
        }
        for extra in [NUM_GPR, NUM_GPR + 1] {
            let Some(Slot::Word(v)) = self.values[extra] else {
                return None;
            };
            out[cursor..cursor + 4].copy_from_slice(&v.to_le_bytes());
            cursor += 4;
        }
        for n in 0..NUM_DREG {
            let Some(Slot::DWord(v)) = self.values[NUM_GPR + 2 + n] else {
                return None;
            };
            out[cursor..cursor + 8].copy_from_slice(&v.to_le_bytes());
            cursor += 8;
        }
        Some(out)
    }

    /// Stage writes for every register from a flat 200-byte snapshot
    /// (inverse of [`Self::to_bytes`]).
    pub fn apply_bytes(&mut self, bytes: &[u8; SNAPSHOT_LEN]) {
        let mut cursor = 0;
        for n in 0..NUM_GPR {
            let v = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
            self.write_word(RegId::Gpr(n as u8), v).unwrap();
            cursor += 4;
        }
        let cpsr = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
        self.write_word(RegId::Cpsr, cpsr).unwrap();
        cursor += 4;
        let fpscr = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
        self.write_word(RegId::Fpscr, fpscr).unwrap();
        cursor += 4;
        for n in 0..NUM_DREG {
            let v = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
            self.write_dword(RegId::Dreg(n as u8), v).unwrap();
            cursor += 8;
        }
    }
}

fn slot_to_id(slot: usize) -> RegId {
    match slot {
        n if n < NUM_GPR => RegId::Gpr(n as u8),
        n if n == NUM_GPR => RegId::Cpsr,
        n if n == NUM_GPR + 1 => RegId::Fpscr,
        n => RegId::Dreg((n - NUM_GPR - 2) as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_a_full_snapshot() {
        let mut cache = RegisterCache::new();
        let mut bytes = [0u8; SNAPSHOT_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        cache.apply_bytes(&bytes);
        assert_eq!(cache.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn missing_register_fails_to_serialize() {
        let cache = RegisterCache::new();
        assert!(cache.to_bytes().is_none());
    }

    #[test]
    fn write_marks_dirty_until_cleared() {
        let mut cache = RegisterCache::new();
        cache.write_word(RegId::Gpr(3), 0x1234).unwrap();
        assert_eq!(cache.dirty_entries().count(), 1);
        cache.clear_dirty();
        assert_eq!(cache.dirty_entries().count(), 0);
    }

    #[test]
    fn invalidate_drops_reads_and_dirty_state() {
        let mut cache = RegisterCache::new();
        cache.fill_word(RegId::Gpr(0), 42).unwrap();
        cache.write_word(RegId::Cpsr, 0x10).unwrap();
        cache.invalidate();
        assert_eq!(cache.cached_word(RegId::Gpr(0)).unwrap(), None);
        assert_eq!(cache.dirty_entries().count(), 0);
    }
}
