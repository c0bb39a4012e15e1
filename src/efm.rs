//! # Embedded Flash Module (EFM)
//!
//! 128 KiB of main flash in 512-byte sectors, programmed one 32-bit word at
//! a time. The controller sits behind a password register (FAPRT); every
//! program/erase entry point unlocks it, runs the operation with a bounded
//! ready poll and locks it again.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

pub const FLASH_BASE: u32 = 0x0000_0000;
pub const FLASH_SIZE: u32 = 0x0002_0000;
pub const FLASH_END: u32 = FLASH_BASE + FLASH_SIZE;
pub const FLASH_SECTOR_SIZE: u32 = 0x200;

const EFM_BASE: usize = 0x4001_0400;

/// Budget for program ready polls.
const READY_TIMEOUT: u32 = 0x0010_0000;
/// Erases take considerably longer than programming.
const ERASE_TIMEOUT: u32 = 0x0100_0000;

const UNLOCK_KEY1: u32 = 0x0123;
const UNLOCK_KEY2: u32 = 0x3210;

register_structs! {
    /// EFM register file.
    pub EfmRegBlock {
        /// Password register. Reads one while the controller is unlocked.
        (0x00 => pub(crate) faprt: ReadWrite<u32, FAPRT::Register>),
        (0x04 => _reserved0),
        /// Read timing, prefetch and read cache control
        (0x08 => pub(crate) frmc: ReadWrite<u32, FRMC::Register>),
        /// Program/erase mode select
        (0x0C => pub(crate) fwmc: ReadWrite<u32, FWMC::Register>),
        /// Status flags
        (0x10 => pub(crate) fsr: ReadOnly<u32, FSR::Register>),
        /// Status flag clear, write one to clear
        (0x14 => pub(crate) fsclr: WriteOnly<u32, FSR::Register>),
        /// Interrupt enables
        (0x18 => pub(crate) fite: ReadWrite<u32, FITE::Register>),
        /// Program/erase window start address
        (0x1C => pub(crate) fpmtsw: ReadWrite<u32, FPMT::Register>),
        /// Program/erase window end address
        (0x20 => pub(crate) fpmtew: ReadWrite<u32, FPMT::Register>),
        (0x24 => @END),
    }
}

register_bitfields![u32,
    pub(crate) FAPRT [
        UNLOCKED OFFSET(0) NUMBITS(1) [],
    ],
    pub(crate) FRMC [
        /// Read wait cycles
        FLWT OFFSET(0) NUMBITS(3) [],
        /// Prefetch enable
        PREFETE OFFSET(16) NUMBITS(1) [],
        /// Read cache enable
        CACHE OFFSET(17) NUMBITS(1) [],
        /// Read cache data reset
        CRST OFFSET(24) NUMBITS(1) [],
    ],
    pub(crate) FWMC [
        /// Program/erase mode gate, must be set for PEMOD to take effect
        PEMODE OFFSET(0) NUMBITS(1) [],
        /// Operating mode of the write circuit
        PEMOD OFFSET(4) NUMBITS(3) [
            ReadOnly = 0,
            SingleProgram = 1,
            ProgramReadBack = 2,
            SectorErase = 4,
            ChipErase = 5,
        ],
    ],
    pub(crate) FSR [
        /// Program/erase error on a protected or invalid word
        PEWERR OFFSET(0) NUMBITS(1) [],
        /// Attempted write outside the program/erase window
        PEPRTERR OFFSET(1) NUMBITS(1) [],
        /// Read-back after program did not match
        PGMISMTCH OFFSET(3) NUMBITS(1) [],
        /// Operation end
        OPTEND OFFSET(4) NUMBITS(1) [],
        /// Read collision while the write circuit was busy
        COLERR OFFSET(5) NUMBITS(1) [],
        /// Write circuit ready
        RDY OFFSET(8) NUMBITS(1) [],
    ],
    pub(crate) FITE [
        /// Program/erase error interrupt
        PEERRITE OFFSET(0) NUMBITS(1) [],
        /// Operation end interrupt
        OPTENDITE OFFSET(1) NUMBITS(1) [],
        /// Read collision interrupt
        COLERRITE OFFSET(2) NUMBITS(1) [],
    ],
    pub(crate) FPMT [
        /// Window bound, one past the last flash byte at most
        ADDR OFFSET(0) NUMBITS(18) [],
    ],
];

#[inline(always)]
fn raw_regs() -> &'static EfmRegBlock {
    // Safety: the block is valid for the lifetime of the device; mutating
    // entry points require ownership of the Efm driver, except for the
    // crate-internal clock switch sequence which owns FRMC for its duration
    unsafe { &*(EFM_BASE as *const EfmRegBlock) }
}

/// Errors of the flash driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The write circuit did not become ready in time.
    Timeout,
    /// Address outside the flash range or not aligned for the operation.
    InvalidAddress,
    /// The hardware refused the operation (protected word or a write
    /// outside the program/erase window).
    AccessViolation,
    /// Read-back after programming did not match the written data.
    VerifyFailed,
}

/// Flash read wait states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCycles {
    Zero = 0,
    One = 1,
    Two = 2,
}

impl WaitCycles {
    /// Minimum wait states for an AHB frequency, per the datasheet bands:
    /// zero up to 33 MHz, one up to 66 MHz, two up to the 80 MHz maximum.
    pub const fn for_frequency(hclk_hz: u32) -> WaitCycles {
        if hclk_hz <= 33_000_000 {
            WaitCycles::Zero
        } else if hclk_hz <= 66_000_000 {
            WaitCycles::One
        } else {
            WaitCycles::Two
        }
    }
}

/// Latched status flags of the write circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    WriteError,
    ProtectError,
    ProgramMismatch,
    OperationEnd,
    Collision,
}

/// Interrupt sources of the flash controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    ProgramEraseError,
    OperationEnd,
    Collision,
}

fn check_word_address(address: u32) -> Result<(), Error> {
    if address & 0b11 != 0 {
        return Err(Error::InvalidAddress);
    }
    if address >= FLASH_END {
        return Err(Error::InvalidAddress);
    }
    Ok(())
}

fn check_sector_address(address: u32) -> Result<(), Error> {
    if address & (FLASH_SECTOR_SIZE - 1) != 0 {
        return Err(Error::InvalidAddress);
    }
    if address >= FLASH_END {
        return Err(Error::InvalidAddress);
    }
    Ok(())
}

/// Embedded Flash Module driver.
pub struct Efm {
    _efm: crate::EFM,
}

impl Efm {
    /// Takes ownership of the flash controller once the write circuit
    /// reports ready.
    ///
    /// ```no_run
    /// use hc32m423_hal as hal;
    /// let p = hal::Peripherals::take().unwrap();
    /// let mut efm = hal::efm::Efm::new(p.efm).unwrap();
    /// ```
    pub fn new(efm: crate::EFM) -> Result<Self, Error> {
        let s = Self { _efm: efm };
        s.wait_ready(READY_TIMEOUT)?;
        Ok(s)
    }

    #[inline(always)]
    fn regs(&self) -> &'static EfmRegBlock {
        raw_regs()
    }

    /// Check if the write circuit is busy.
    #[inline]
    pub fn is_busy(&self) -> bool {
        !self.regs().fsr.is_set(FSR::RDY)
    }

    /// Unlock the controller to allow write or erase operations.
    #[inline]
    fn unlock(&self) {
        self.regs().faprt.set(UNLOCK_KEY1);
        self.regs().faprt.set(UNLOCK_KEY2);
        // The lock bit reflects the password writes combinationally, the
        // readback only orders the bus accesses and cannot hang
        while !self.regs().faprt.is_set(FAPRT::UNLOCKED) {}
    }

    /// Lock the controller to prevent write or erase operations.
    #[inline]
    fn lock(&self) {
        self.regs().faprt.set(0);
        // Same as unlock, the readback settles within one bus access
        while self.regs().faprt.is_set(FAPRT::UNLOCKED) {}
    }

    fn wait_ready(&self, mut timeout: u32) -> Result<(), Error> {
        while self.is_busy() {
            timeout -= 1;
            if timeout == 0 {
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Program the read wait states. Must cover the AHB frequency before
    /// the clock is raised (see [`WaitCycles::for_frequency`]).
    pub fn set_wait_cycles(&mut self, wait: WaitCycles) {
        self.unlock();
        self.regs().frmc.modify(FRMC::FLWT.val(wait as u32));
        self.lock();
    }

    pub fn enable_prefetch(&mut self) {
        self.unlock();
        self.regs().frmc.modify(FRMC::PREFETE::SET);
        self.lock();
    }

    pub fn disable_prefetch(&mut self) {
        self.unlock();
        self.regs().frmc.modify(FRMC::PREFETE::CLEAR);
        self.lock();
    }

    /// Enable the read cache. The cache data is reset first.
    pub fn enable_cache(&mut self) {
        self.unlock();
        self.regs().frmc.modify(FRMC::CRST::SET);
        self.regs().frmc.modify(FRMC::CRST::CLEAR);
        self.regs().frmc.modify(FRMC::CACHE::SET);
        self.lock();
    }

    pub fn disable_cache(&mut self) {
        self.unlock();
        self.regs().frmc.modify(FRMC::CACHE::CLEAR);
        self.lock();
    }

    /// Restrict program/erase operations to `[start, end)`. Operations
    /// outside the window fail with [`Error::AccessViolation`].
    pub fn set_program_window(&mut self, start: u32, end: u32) -> Result<(), Error> {
        if start >= end || end > FLASH_END {
            return Err(Error::InvalidAddress);
        }
        self.unlock();
        self.regs().fpmtsw.write(FPMT::ADDR.val(start));
        self.regs().fpmtew.write(FPMT::ADDR.val(end));
        self.lock();
        Ok(())
    }

    /// Open the whole flash for program/erase operations again.
    pub fn clear_program_window(&mut self) {
        self.unlock();
        self.regs().fpmtsw.write(FPMT::ADDR.val(FLASH_BASE));
        self.regs().fpmtew.write(FPMT::ADDR.val(FLASH_END));
        self.lock();
    }

    fn enter_mode(&self, mode: tock_registers::fields::FieldValue<u32, FWMC::Register>) {
        self.regs().fwmc.write(mode + FWMC::PEMODE::SET);
    }

    fn leave_mode(&self) {
        self.regs()
            .fwmc
            .write(FWMC::PEMOD::ReadOnly + FWMC::PEMODE::CLEAR);
    }

    /// Collect the outcome of a finished operation and clear its flags.
    fn finish_operation(&self) -> Result<(), Error> {
        let fsr = self.regs().fsr.extract();
        self.regs().fsclr.write(
            FSR::PEWERR::SET
                + FSR::PEPRTERR::SET
                + FSR::PGMISMTCH::SET
                + FSR::OPTEND::SET
                + FSR::COLERR::SET,
        );
        if fsr.is_set(FSR::PEWERR) || fsr.is_set(FSR::PEPRTERR) {
            return Err(Error::AccessViolation);
        }
        if fsr.is_set(FSR::PGMISMTCH) {
            return Err(Error::VerifyFailed);
        }
        Ok(())
    }

    /// Program a 32-bit word.
    ///
    /// # Safety
    /// The target word must already be erased; flash bits only move from
    /// one to zero when programmed. Programming the region the CPU is
    /// executing from stalls instruction fetches until the write circuit
    /// is done.
    pub unsafe fn program_word(&mut self, address: u32, data: u32) -> Result<(), Error> {
        self.program_with_mode(address, data, FWMC::PEMOD::SingleProgram)
    }

    /// Program a 32-bit word and let the hardware read it back.
    ///
    /// # Safety
    /// Same contract as [`Self::program_word`]. A mismatch on read-back is
    /// reported as [`Error::VerifyFailed`].
    pub unsafe fn program_word_readback(&mut self, address: u32, data: u32) -> Result<(), Error> {
        self.program_with_mode(address, data, FWMC::PEMOD::ProgramReadBack)
    }

    unsafe fn program_with_mode(
        &mut self,
        address: u32,
        data: u32,
        mode: tock_registers::fields::FieldValue<u32, FWMC::Register>,
    ) -> Result<(), Error> {
        check_word_address(address)?;
        self.wait_ready(READY_TIMEOUT)?;
        self.unlock();
        self.enter_mode(mode);
        // The write circuit is triggered by a bus write to the target word
        core::ptr::write_volatile(address as *mut u32, data);
        let result = self
            .wait_ready(READY_TIMEOUT)
            .and_then(|_| self.finish_operation());
        self.leave_mode();
        self.lock();
        result
    }

    /// Erase the 512-byte sector containing `address`.
    ///
    /// # Safety
    /// Care must be taken not to erase the sector containing the executing
    /// code or live data.
    pub unsafe fn erase_sector(&mut self, address: u32) -> Result<(), Error> {
        check_sector_address(address)?;
        self.wait_ready(READY_TIMEOUT)?;
        self.unlock();
        self.enter_mode(FWMC::PEMOD::SectorErase);
        // Erase is triggered by a write of any value inside the sector
        core::ptr::write_volatile(address as *mut u32, 0);
        let result = self
            .wait_ready(ERASE_TIMEOUT)
            .and_then(|_| self.finish_operation());
        self.leave_mode();
        self.lock();
        result
    }

    /// Erase the whole main flash.
    ///
    /// # Safety
    /// This erases the executing program as well. Only callable from code
    /// running out of RAM.
    pub unsafe fn erase_chip(&mut self) -> Result<(), Error> {
        self.wait_ready(READY_TIMEOUT)?;
        self.unlock();
        self.enter_mode(FWMC::PEMOD::ChipErase);
        core::ptr::write_volatile(FLASH_BASE as *mut u32, 0);
        let result = self
            .wait_ready(ERASE_TIMEOUT)
            .and_then(|_| self.finish_operation());
        self.leave_mode();
        self.lock();
        result
    }

    /// Read a latched status flag.
    pub fn flag(&self, flag: Flag) -> bool {
        let fsr = &self.regs().fsr;
        match flag {
            Flag::WriteError => fsr.is_set(FSR::PEWERR),
            Flag::ProtectError => fsr.is_set(FSR::PEPRTERR),
            Flag::ProgramMismatch => fsr.is_set(FSR::PGMISMTCH),
            Flag::OperationEnd => fsr.is_set(FSR::OPTEND),
            Flag::Collision => fsr.is_set(FSR::COLERR),
        }
    }

    /// Clear a latched status flag.
    pub fn clear_flag(&mut self, flag: Flag) {
        self.unlock();
        self.regs().fsclr.write(match flag {
            Flag::WriteError => FSR::PEWERR::SET,
            Flag::ProtectError => FSR::PEPRTERR::SET,
            Flag::ProgramMismatch => FSR::PGMISMTCH::SET,
            Flag::OperationEnd => FSR::OPTEND::SET,
            Flag::Collision => FSR::COLERR::SET,
        });
        self.lock();
    }

    pub fn enable_interrupt(&mut self, interrupt: Interrupt) {
        self.unlock();
        self.regs().fite.modify(match interrupt {
            Interrupt::ProgramEraseError => FITE::PEERRITE::SET,
            Interrupt::OperationEnd => FITE::OPTENDITE::SET,
            Interrupt::Collision => FITE::COLERRITE::SET,
        });
        self.lock();
    }

    pub fn disable_interrupt(&mut self, interrupt: Interrupt) {
        self.unlock();
        self.regs().fite.modify(match interrupt {
            Interrupt::ProgramEraseError => FITE::PEERRITE::CLEAR,
            Interrupt::OperationEnd => FITE::OPTENDITE::CLEAR,
            Interrupt::Collision => FITE::COLERRITE::CLEAR,
        });
        self.lock();
    }
}

/// Moves the flash to its slowest read timing with caching off, for the
/// duration of a system clock source switch. Returns the previous FRMC
/// value for [`finish_clock_switch`].
pub(crate) fn prepare_clock_switch() -> u32 {
    let regs = raw_regs();
    let saved = regs.frmc.get();
    regs.faprt.set(UNLOCK_KEY1);
    regs.faprt.set(UNLOCK_KEY2);
    regs.frmc.write(
        FRMC::FLWT.val(WaitCycles::Two as u32) + FRMC::PREFETE::CLEAR + FRMC::CACHE::CLEAR,
    );
    saved
}

/// Combines the saved prefetch/cache state with the wait states required
/// for an AHB frequency into one FRMC value.
fn compose_switch_restore(saved_frmc: u32, hclk_hz: u32) -> u32 {
    let wait = WaitCycles::for_frequency(hclk_hz);
    let mut restored = tock_registers::LocalRegisterCopy::<u32, FRMC::Register>::new(saved_frmc);
    restored.modify(FRMC::FLWT.val(wait as u32));
    restored.get()
}

/// Restores the read timing for the AHB frequency reached after a clock
/// switch, and brings prefetch/cache back to their saved state.
///
/// The wait states and the saved bits go out in a single write; restoring
/// the saved FRMC first could expose a too-small FLWT at the new frequency
/// for the in-between access.
pub(crate) fn finish_clock_switch(saved_frmc: u32, hclk_hz: u32) {
    let regs = raw_regs();
    regs.frmc.set(compose_switch_restore(saved_frmc, hclk_hz));
    regs.faprt.set(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_cycles_follow_frequency_bands() {
        assert_eq!(WaitCycles::for_frequency(8_000_000), WaitCycles::Zero);
        assert_eq!(WaitCycles::for_frequency(33_000_000), WaitCycles::Zero);
        assert_eq!(WaitCycles::for_frequency(33_000_001), WaitCycles::One);
        assert_eq!(WaitCycles::for_frequency(66_000_000), WaitCycles::One);
        assert_eq!(WaitCycles::for_frequency(80_000_000), WaitCycles::Two);
    }

    #[test]
    fn switch_restore_composes_wait_states_into_one_value() {
        // Saved state: zero wait states with prefetch and cache enabled
        let saved = (1 << 16) | (1 << 17);
        let restored = compose_switch_restore(saved, 80_000_000);
        assert_eq!(restored & 0b111, WaitCycles::Two as u32);
        // The saved prefetch/cache bits survive the composition
        assert_ne!(restored & (1 << 16), 0);
        assert_ne!(restored & (1 << 17), 0);
        // Dropping back to a slow bus clears the wait states again
        let slow = compose_switch_restore(restored, 8_000_000);
        assert_eq!(slow & 0b111, WaitCycles::Zero as u32);
    }

    #[test]
    fn word_addresses_must_be_aligned_and_in_range() {
        assert!(check_word_address(0x0000_0000).is_ok());
        assert!(check_word_address(0x0001_FFFC).is_ok());
        assert_eq!(check_word_address(0x0000_0002), Err(Error::InvalidAddress));
        assert_eq!(check_word_address(FLASH_END), Err(Error::InvalidAddress));
    }

    #[test]
    fn sector_addresses_must_be_sector_aligned() {
        assert!(check_sector_address(0x0000_0000).is_ok());
        assert!(check_sector_address(0x0000_0200).is_ok());
        assert!(check_sector_address(FLASH_END - FLASH_SECTOR_SIZE).is_ok());
        assert_eq!(check_sector_address(0x0000_0100), Err(Error::InvalidAddress));
        assert_eq!(check_sector_address(FLASH_END), Err(Error::InvalidAddress));
    }
}
