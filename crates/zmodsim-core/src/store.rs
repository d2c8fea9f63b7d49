//! Shared register store (spec.md §3, §4.2).
//!
//! Four bounded banks, fixed in size at construction, all serialized behind
//! a single mutex. A single store-wide lock is simple and sufficient: no
//! store operation performs blocking I/O or calls back into caller code
//! while held, so the critical section length is bounded by bank size.

use std::sync::Mutex;
use zmodsim_common::error::OutOfRange;

/// Which word bank an auto-increment tick targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    /// Holding registers (read/write).
    Holding,
    /// Input registers (read-only to the protocol).
    Input,
}

/// A bit-packed bank of single-bit cells (coils or discrete inputs).
///
/// Bit `a` lives at bit index `a % 8` of byte `a / 8`, matching spec.md §3's
/// wire-independent storage layout (word banks are separately serialized
/// big-endian only on the wire; bit banks are packed the same way in memory
/// and on the wire).
struct BitBank {
    bytes: Vec<u8>,
    len: usize,
}

impl BitBank {
    fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    fn get(&self, addr: usize) -> bool {
        (self.bytes[addr / 8] >> (addr % 8)) & 1 != 0
    }

    fn set(&mut self, addr: usize, value: bool) {
        let mask = 1u8 << (addr % 8);
        if value {
            self.bytes[addr / 8] |= mask;
        } else {
            self.bytes[addr / 8] &= !mask;
        }
    }
}

struct Banks {
    coils: BitBank,
    discrete_inputs: BitBank,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

/// Shared, bounded, type-partitioned register memory.
///
/// Created once by the supervisor and handed to every client handler and
/// auto-increment worker by shared reference (`Arc<RegisterStore>`) for
/// their entire lifetime. Bank sizes are immutable after construction.
pub struct RegisterStore {
    banks: Mutex<Banks>,
}

impl RegisterStore {
    /// Construct a store with the given bank sizes. Every word starts at
    /// `0` and every bit starts clear.
    #[must_use]
    pub fn new(coils: u16, discrete_inputs: u16, holding: u16, input: u16) -> Self {
        Self {
            banks: Mutex::new(Banks {
                coils: BitBank::new(coils as usize),
                discrete_inputs: BitBank::new(discrete_inputs as usize),
                holding_registers: vec![0u16; holding as usize],
                input_registers: vec![0u16; input as usize],
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Banks> {
        self.banks.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_range(len: usize, start: u16, count: u16) -> Result<(), OutOfRange> {
        let end = usize::from(start) + usize::from(count);
        if end > len {
            Err(OutOfRange)
        } else {
            Ok(())
        }
    }

    fn read_bits(bank: &BitBank, start: u16, count: u16) -> Result<Vec<u8>, OutOfRange> {
        Self::check_range(bank.len, start, count)?;
        let byte_count = usize::from(count).div_ceil(8);
        let mut out = vec![0u8; byte_count];
        for i in 0..usize::from(count) {
            if bank.get(usize::from(start) + i) {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(out)
    }

    fn write_bits(bank: &mut BitBank, start: u16, count: u16, data: &[u8]) -> Result<(), OutOfRange> {
        Self::check_range(bank.len, start, count)?;
        for i in 0..usize::from(count) {
            let bit = (data[i / 8] >> (i % 8)) & 1 != 0;
            bank.set(usize::from(start) + i, bit);
        }
        Ok(())
    }

    /// Read `count` coils starting at `start`, bit-packed little-endian.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `start + count` exceeds the coil bank size.
    pub fn read_coils(&self, start: u16, count: u16) -> Result<Vec<u8>, OutOfRange> {
        Self::read_bits(&self.lock().coils, start, count)
    }

    /// Read `count` discrete inputs starting at `start`, bit-packed little-endian.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `start + count` exceeds the discrete-input bank size.
    pub fn read_discrete(&self, start: u16, count: u16) -> Result<Vec<u8>, OutOfRange> {
        Self::read_bits(&self.lock().discrete_inputs, start, count)
    }

    /// Read `count` holding registers starting at `start`, big-endian on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `start + count` exceeds the holding bank size.
    pub fn read_holding(&self, start: u16, count: u16) -> Result<Vec<u8>, OutOfRange> {
        let banks = self.lock();
        Self::check_range(banks.holding_registers.len(), start, count)?;
        Ok(Self::words_to_be_bytes(&banks.holding_registers, start, count))
    }

    /// Read `count` input registers starting at `start`, big-endian on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `start + count` exceeds the input bank size.
    pub fn read_input(&self, start: u16, count: u16) -> Result<Vec<u8>, OutOfRange> {
        let banks = self.lock();
        Self::check_range(banks.input_registers.len(), start, count)?;
        Ok(Self::words_to_be_bytes(&banks.input_registers, start, count))
    }

    fn words_to_be_bytes(words: &[u16], start: u16, count: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(usize::from(count) * 2);
        for &w in &words[usize::from(start)..usize::from(start) + usize::from(count)] {
            out.extend_from_slice(&w.to_be_bytes());
        }
        out
    }

    /// Write a single coil.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `addr` is outside the coil bank.
    pub fn write_coil(&self, addr: u16, value: bool) -> Result<(), OutOfRange> {
        let mut banks = self.lock();
        Self::check_range(banks.coils.len, addr, 1)?;
        banks.coils.set(usize::from(addr), value);
        Ok(())
    }

    /// Write a single holding register.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `addr` is outside the holding bank.
    pub fn write_register(&self, addr: u16, value: u16) -> Result<(), OutOfRange> {
        let mut banks = self.lock();
        Self::check_range(banks.holding_registers.len(), addr, 1)?;
        banks.holding_registers[usize::from(addr)] = value;
        Ok(())
    }

    /// Write `count` coils starting at `start` from bit-packed `data`.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `start + count` exceeds the coil bank size.
    pub fn write_coils(&self, start: u16, count: u16, data: &[u8]) -> Result<(), OutOfRange> {
        Self::write_bits(&mut self.lock().coils, start, count, data)
    }

    /// Write `count` holding registers starting at `start` from big-endian `data`.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `start + count` exceeds the holding bank size.
    pub fn write_registers(&self, start: u16, count: u16, data: &[u8]) -> Result<(), OutOfRange> {
        let mut banks = self.lock();
        Self::check_range(banks.holding_registers.len(), start, count)?;
        for i in 0..usize::from(count) {
            let value = u16::from_be_bytes([data[i * 2], data[i * 2 + 1]]);
            banks.holding_registers[usize::from(start) + i] = value;
        }
        Ok(())
    }

    /// Apply one auto-increment tick to `bank` across `addresses`.
    ///
    /// For each address `a`, let `v` be its current value: if
    /// `v >= max.saturating_sub(inc)` it wraps to `0`, otherwise it becomes
    /// `v + inc`. Addresses outside the bank are silently skipped — they are
    /// internally generated by configuration, never client-supplied, so
    /// there is no exception to report. The whole tick is one critical
    /// section: a reader never observes a half-applied tick.
    pub fn increment(&self, bank: Bank, addresses: &[u16], inc: u16, max: u16) {
        let mut banks = self.lock();
        let regs = match bank {
            Bank::Holding => &mut banks.holding_registers,
            Bank::Input => &mut banks.input_registers,
        };
        let threshold = max.saturating_sub(inc);
        for &addr in addresses {
            if let Some(v) = regs.get_mut(usize::from(addr)) {
                *v = if *v >= threshold { 0 } else { *v + inc };
            }
        }
    }
}
