#![allow(dead_code)]
//! Simulated 25-series chip for host tests.
//!
//! The chip decodes the bytes of every SPI transaction the way a real part does, keeps the
//! array, the status registers, the write enable latch and the busy state, and records the
//! erases, program bursts, status writes and `WP#` changes it sees. Commands the real part
//! would reject or mangle (no write enable, issued while busy) are logged as violations.

use std::{
    cell::{RefCell, RefMut},
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::{
    digital::{ErrorType as PinErrorType, OutputPin},
    spi::{ErrorType, Operation},
};

pub const PAGE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Erase { opcode: u8, addr: u32 },
    Program { addr: u32, len: usize },
    WriteStatus(u8),
    WriteStatus2(u8),
    /// `true` when the pin is driven low (protecting)
    WriteProtect(bool),
}

#[derive(Debug)]
pub struct ChipState {
    pub memory: Vec<u8>,
    /// Status register 1 without WIP and WEL
    pub status: u8,
    pub status2: u8,
    pub manufacturer: u8,
    pub device: u8,
    pub wel: bool,
    pub wp_low: bool,
    /// Status reads answered busy after each program, erase or status write
    pub busy_polls: u32,
    pub busy_left: u32,
    pub stuck_busy: bool,
    pub events: Vec<Event>,
    pub violations: Vec<String>,
    pub transactions: usize,
}

impl ChipState {
    fn busy(&self) -> bool {
        self.stuck_busy || self.busy_left > 0
    }

    fn read_status(&mut self) -> u8 {
        let busy = if self.stuck_busy {
            true
        } else if self.busy_left > 0 {
            self.busy_left -= 1;
            true
        } else {
            false
        };
        self.status | ((self.wel as u8) << 1) | busy as u8
    }

    fn exchange(&mut self, tx: &mut Vec<u8>, out: u8) -> u8 {
        let pos = tx.len();
        tx.push(out);
        if pos == 0 {
            return 0xFF;
        }
        match tx[0] {
            0x05 => self.read_status(),
            0x35 => self.status2,
            0x03 if pos >= 4 => {
                let addr = address(tx) as usize + pos - 4;
                self.memory[addr % self.memory.len()]
            }
            0x90 if pos == 4 => self.manufacturer,
            0x90 if pos == 5 => self.device,
            _ => 0xFF,
        }
    }

    fn run(&mut self, operations: &mut [Operation<'_, u8>]) {
        let mut tx = Vec::new();
        for op in operations.iter_mut() {
            match op {
                Operation::Write(data) => {
                    for &b in data.iter() {
                        self.exchange(&mut tx, b);
                    }
                }
                Operation::Read(buf) => {
                    for b in buf.iter_mut() {
                        *b = self.exchange(&mut tx, 0x00);
                    }
                }
                Operation::Transfer(read, write) => {
                    for i in 0..read.len().max(write.len()) {
                        let out = write.get(i).copied().unwrap_or(0x00);
                        let value = self.exchange(&mut tx, out);
                        if let Some(r) = read.get_mut(i) {
                            *r = value;
                        }
                    }
                }
                Operation::TransferInPlace(buf) => {
                    for b in buf.iter_mut() {
                        *b = self.exchange(&mut tx, *b);
                    }
                }
                Operation::DelayNs(_) => {}
            }
        }
        self.deselect(&tx);
    }

    fn mutating(&mut self, name: &str) -> bool {
        if self.busy() {
            self.violations.push(format!("{name} while busy"));
        }
        if !self.wel {
            self.violations.push(format!("{name} without write enable"));
            return false;
        }
        self.wel = false;
        self.busy_left = self.busy_polls;
        true
    }

    fn deselect(&mut self, tx: &[u8]) {
        self.transactions += 1;
        let Some(&opcode) = tx.first() else {
            return;
        };
        match opcode {
            0x06 => self.wel = true,
            0x04 => self.wel = false,
            0x03 if self.busy() => self.violations.push("read while busy".into()),
            0x01 => {
                let locked = self.status & 0x80 != 0 && self.wp_low;
                if self.mutating("write status") && !locked {
                    self.status = tx[1] & !0x03;
                    self.events.push(Event::WriteStatus(tx[1]));
                }
            }
            0x31 => {
                if self.mutating("write status 2") {
                    self.status2 = tx[1];
                    self.events.push(Event::WriteStatus2(tx[1]));
                }
            }
            0x02 => {
                if self.mutating("page program") {
                    let addr = address(tx);
                    let data = &tx[4..];
                    let base = addr as usize - addr as usize % PAGE;
                    let offset = addr as usize % PAGE;
                    // The chip wraps inside the page, it never carries into the next one
                    for (i, &b) in data.iter().enumerate() {
                        self.memory[base + (offset + i) % PAGE] &= b;
                    }
                    self.events.push(Event::Program {
                        addr,
                        len: data.len(),
                    });
                }
            }
            0x20 | 0x52 | 0xD8 => {
                if self.mutating("erase") {
                    let size = match opcode {
                        0x20 => 0x1000,
                        0x52 => 0x8000,
                        _ => 0x10000,
                    };
                    let addr = address(tx);
                    let base = (addr - addr % size) as usize;
                    self.memory[base..base + size as usize].fill(0xFF);
                    self.events.push(Event::Erase { opcode, addr });
                }
            }
            0x60 | 0xC7 => {
                if self.mutating("chip erase") {
                    self.memory.fill(0xFF);
                    self.events.push(Event::Erase { opcode, addr: 0 });
                }
            }
            _ => {}
        }
    }
}

fn address(tx: &[u8]) -> u32 {
    (tx[1] as u32) << 16 | (tx[2] as u32) << 8 | tx[3] as u32
}

#[derive(Clone)]
pub struct Sim(Rc<RefCell<ChipState>>);

impl Sim {
    pub fn new(capacity: u32, manufacturer: u8, device: u8) -> Self {
        Sim(Rc::new(RefCell::new(ChipState {
            memory: vec![0xFF; capacity as usize],
            status: 0,
            status2: 0,
            manufacturer,
            device,
            wel: false,
            wp_low: false,
            busy_polls: 2,
            busy_left: 0,
            stuck_busy: false,
            events: Vec::new(),
            violations: Vec::new(),
            transactions: 0,
        })))
    }

    pub fn w25q80() -> Self {
        Self::new(0x10_0000, 0xEF, 0x13)
    }

    pub fn w25q64() -> Self {
        Self::new(0x80_0000, 0xEF, 0x16)
    }

    pub fn by25d40() -> Self {
        Self::new(0x8_0000, 0x68, 0x12)
    }

    pub fn spi(&self) -> SimSpi {
        SimSpi(self.0.clone())
    }

    pub fn wp(&self) -> SimWp {
        SimWp(self.0.clone())
    }

    pub fn state(&self) -> RefMut<'_, ChipState> {
        self.0.borrow_mut()
    }

    /// Preload the array, bypassing the command set
    pub fn fill(&self, addr: u32, bytes: &[u8]) {
        let addr = addr as usize;
        self.state().memory[addr..addr + bytes.len()].copy_from_slice(bytes);
    }

    pub fn memory(&self, addr: u32, len: usize) -> Vec<u8> {
        let addr = addr as usize;
        self.state().memory[addr..addr + len].to_vec()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Addresses of the sector erases seen so far
    pub fn sector_erases(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Erase { opcode: 0x20, addr } => Some(addr),
                _ => None,
            })
            .collect()
    }

    pub fn bursts(&self) -> Vec<(u32, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Program { addr, len } => Some((addr, len)),
                _ => None,
            })
            .collect()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }
}

pub struct SimSpi(Rc<RefCell<ChipState>>);

impl ErrorType for SimSpi {
    type Error = Infallible;
}

impl embedded_hal::spi::SpiDevice for SimSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        self.0.borrow_mut().run(operations);
        Ok(())
    }
}

impl embedded_hal_async::spi::SpiDevice for SimSpi {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        self.0.borrow_mut().run(operations);
        Ok(())
    }
}

pub struct SimWp(Rc<RefCell<ChipState>>);

impl PinErrorType for SimWp {
    type Error = Infallible;
}

impl OutputPin for SimWp {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut state = self.0.borrow_mut();
        state.wp_low = true;
        state.events.push(Event::WriteProtect(true));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut state = self.0.borrow_mut();
        state.wp_low = false;
        state.events.push(Event::WriteProtect(false));
        Ok(())
    }
}

/// Delay that returns immediately and remembers how long it was asked to wait
#[derive(Debug, Default)]
pub struct NoDelay {
    pub waited_ns: u64,
}

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.waited_ns += ns as u64;
    }
}

impl embedded_hal_async::delay::DelayNs for NoDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.waited_ns += ns as u64;
    }
}

/// Deterministic test pattern
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
