//! # Clock Management Unit (CMU)
//! Handles the oscillators, the system clock tree and the peripheral
//! clock gates (FCG).
//!
//! Initialization of the [`Cmu`] peripheral is required to constrain the
//! CMU register file and safely use it within the HAL.

pub mod clocks;

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

const CMU_BASE: usize = 0x4004_4000;
const PWC_BASE: usize = 0x4004_8000;

register_structs! {
    /// CMU register file.
    pub CmuRegBlock {
        /// XTAL configuration (drive strength, oscillator/bypass mode)
        (0x00 => pub(crate) xtalcfgr: ReadWrite<u8, XTALCFGR::Register>),
        (0x01 => _reserved0),
        /// XTAL control
        (0x04 => pub(crate) xtalcr: ReadWrite<u8, XTALCR::Register>),
        (0x05 => _reserved1),
        /// High speed RC control
        (0x08 => pub(crate) hrccr: ReadWrite<u8, HRCCR::Register>),
        (0x09 => _reserved2),
        /// Middle speed RC control
        (0x0C => pub(crate) mrccr: ReadWrite<u8, MRCCR::Register>),
        (0x0D => _reserved3),
        /// Low speed RC control
        (0x10 => pub(crate) lrccr: ReadWrite<u8, LRCCR::Register>),
        (0x11 => _reserved4),
        /// Oscillator stability status
        (0x14 => pub(crate) oscstbsr: ReadOnly<u8, OSCSTBSR::Register>),
        (0x15 => _reserved5),
        /// System clock source switch
        (0x18 => pub(crate) ckswr: ReadWrite<u8, CKSWR::Register>),
        (0x19 => _reserved6),
        /// Bus clock dividers
        (0x1C => pub(crate) scfgr: ReadWrite<u32, SCFGR::Register>),
        /// PLL control
        (0x20 => pub(crate) pllcr: ReadWrite<u8, PLLCR::Register>),
        (0x21 => _reserved7),
        /// PLL configuration (source, M/N/P)
        (0x24 => pub(crate) pllcfgr: ReadWrite<u32, PLLCFGR::Register>),
        /// Clock output configuration
        (0x28 => pub(crate) mcocfgr: ReadWrite<u8, MCOCFGR::Register>),
        (0x29 => _reserved8),
        /// Peripheral clock gates. A set bit stops the peripheral clock.
        (0x2C => pub(crate) fcg: ReadWrite<u32, FCG::Register>),
        /// XTAL failure detection control
        (0x30 => pub(crate) xtalstdcr: ReadWrite<u8, XTALSTDCR::Register>),
        (0x31 => _reserved9),
        /// XTAL failure detection status
        (0x34 => pub(crate) xtalstdsr: ReadWrite<u8, XTALSTDSR::Register>),
        (0x35 => _reserved10),
        (0x38 => @END),
    },

    /// Power control register file, only the register protection command
    /// register is of interest to the clock code.
    pub PwcRegBlock {
        /// Register protection command. `0xA501` opens the clock registers
        /// for writing, `0xA500` closes them again.
        (0x00 => pub(crate) fprc: ReadWrite<u16, FPRC::Register>),
        (0x02 => @END),
    }
}

register_bitfields![u8,
    pub(crate) XTALCFGR [
        /// Drive strength, selected by the crystal frequency band
        XTALDRV OFFSET(4) NUMBITS(2) [
            High = 0,
            Mid = 1,
            Low = 2,
            UltraLow = 3,
        ],
        /// Oscillator mode or external clock bypass
        XTALMS OFFSET(6) NUMBITS(1) [
            Oscillator = 0,
            ExternalClock = 1,
        ],
    ],
    pub(crate) XTALCR [
        XTALSTP OFFSET(0) NUMBITS(1) [],
    ],
    pub(crate) HRCCR [
        HRCSTP OFFSET(0) NUMBITS(1) [],
    ],
    pub(crate) MRCCR [
        MRCSTP OFFSET(0) NUMBITS(1) [],
    ],
    pub(crate) LRCCR [
        LRCSTP OFFSET(0) NUMBITS(1) [],
    ],
    pub(crate) OSCSTBSR [
        HRCSTB OFFSET(0) NUMBITS(1) [],
        XTALSTB OFFSET(3) NUMBITS(1) [],
        PLLSTB OFFSET(5) NUMBITS(1) [],
    ],
    pub(crate) CKSWR [
        CKSW OFFSET(0) NUMBITS(3) [],
    ],
    pub(crate) PLLCR [
        PLLOFF OFFSET(0) NUMBITS(1) [],
    ],
    pub(crate) MCOCFGR [
        MCOSEL OFFSET(0) NUMBITS(4) [],
        MCODIV OFFSET(4) NUMBITS(3) [],
        MCOEN OFFSET(7) NUMBITS(1) [],
    ],
    pub(crate) XTALSTDCR [
        /// Failure detection enable
        STDE OFFSET(0) NUMBITS(1) [],
        /// Failure detection interrupt enable
        STDIE OFFSET(1) NUMBITS(1) [],
    ],
    pub(crate) XTALSTDSR [
        /// Failure detected flag, write zero to clear
        STDF OFFSET(0) NUMBITS(1) [],
    ],
];

register_bitfields![u32,
    pub(crate) SCFGR [
        /// APB1 divider, power of two
        PCLK1S OFFSET(0) NUMBITS(3) [],
        /// APB4 divider, power of two
        PCLK4S OFFSET(8) NUMBITS(3) [],
        /// AHB divider, power of two
        HCLKS OFFSET(24) NUMBITS(3) [],
    ],
    pub(crate) PLLCFGR [
        /// Reference divider, stored minus one
        PLLM OFFSET(0) NUMBITS(5) [],
        /// PLL reference source
        PLLSRC OFFSET(7) NUMBITS(1) [
            Xtal = 0,
            Hrc = 1,
        ],
        /// VCO multiplier, stored minus one
        PLLN OFFSET(8) NUMBITS(9) [],
        /// Output divider, stored minus one
        PLLP OFFSET(28) NUMBITS(4) [],
    ],
    pub(crate) FCG [
        TMRA1 OFFSET(4) NUMBITS(1) [],
        TMRA2 OFFSET(5) NUMBITS(1) [],
        TMRA3 OFFSET(6) NUMBITS(1) [],
        TMRA4 OFFSET(7) NUMBITS(1) [],
        EMB0 OFFSET(15) NUMBITS(1) [],
        EMB1 OFFSET(16) NUMBITS(1) [],
    ],
];

register_bitfields![u16,
    pub(crate) FPRC [
        /// Clock register write enable
        CKRWE OFFSET(0) NUMBITS(1) [],
        /// Protection password, must read 0xA5 for the write to take effect
        FPRCWE OFFSET(8) NUMBITS(8) [],
    ],
];

const FPRC_KEY: u16 = 0xA5;

/// Wrapper struct to constrain the CMU register file.
pub struct CmuRegisters {
    _cmu: crate::CMU,
}

impl CmuRegisters {
    #[inline(always)]
    pub(crate) fn regs(&self) -> &'static CmuRegBlock {
        // Safety: CmuRegisters owns the CMU token, the block is valid for
        // the lifetime of the device
        unsafe { &*(CMU_BASE as *const CmuRegBlock) }
    }

    #[inline(always)]
    fn pwc(&self) -> &'static PwcRegBlock {
        unsafe { &*(PWC_BASE as *const PwcRegBlock) }
    }

    /// Opens the clock registers for writing.
    pub(crate) fn unlock(&mut self) {
        self.pwc()
            .fprc
            .write(FPRC::FPRCWE.val(FPRC_KEY) + FPRC::CKRWE::SET);
    }

    /// Closes the clock registers again.
    pub(crate) fn lock(&mut self) {
        self.pwc()
            .fprc
            .write(FPRC::FPRCWE.val(FPRC_KEY) + FPRC::CKRWE::CLEAR);
    }

    /// Gates every peripheral clock and returns the previous gate mask.
    /// Used while the system clock source is being switched.
    pub(crate) fn freeze_fcg(&mut self) -> u32 {
        let saved = self.regs().fcg.get();
        self.unlock();
        self.regs().fcg.set(u32::MAX);
        self.lock();
        saved
    }

    /// Restores a gate mask saved by [`Self::freeze_fcg`].
    pub(crate) fn restore_fcg(&mut self, saved: u32) {
        self.unlock();
        self.regs().fcg.set(saved);
        self.lock();
    }
}

/// Clock Management Unit (CMU) Peripheral
pub struct Cmu {
    pub reg: CmuRegisters,
    pub osc_guards: clocks::OscillatorGuards,
    pub sys_clk: clocks::SystemClockConfig,
}

impl Cmu {
    pub fn new(cmu: crate::CMU) -> Self {
        Cmu {
            reg: CmuRegisters { _cmu: cmu },
            osc_guards: clocks::OscillatorGuards::new(),
            sys_clk: clocks::SystemClockConfig::new(),
        }
    }
}

/// Extension trait for enabling and disabling peripheral clocks.
pub trait ClockForPeripheral: crate::Sealed {
    /// Opens the peripheral's FCG gate.
    ///
    /// ## Safety
    /// It is recommended that this function is only called through the
    /// constructor of a HAL peripheral, rather than directly by the user.
    /// If called directly, the user should ensure that the peripheral clock
    /// is not already enabled.
    unsafe fn enable_clock(&self, reg: &mut CmuRegisters);

    /// Closes the peripheral's FCG gate.
    ///
    /// ## Safety
    /// The peripheral must be idle; register accesses with a stopped clock
    /// are lost.
    unsafe fn disable_clock(&self, reg: &mut CmuRegisters);
}

macro_rules! generate_fcg {
    ($TOKEN:ident, $FCG_FIELD:ident) => {
        impl crate::Sealed for crate::$TOKEN {}

        impl ClockForPeripheral for crate::$TOKEN {
            unsafe fn enable_clock(&self, reg: &mut CmuRegisters) {
                reg.unlock();
                reg.regs().fcg.modify(FCG::$FCG_FIELD::CLEAR);
                // FCG is a plain gate register, the readback reflects the
                // write immediately and cannot hang
                while reg.regs().fcg.is_set(FCG::$FCG_FIELD) {}
                reg.lock();
            }

            unsafe fn disable_clock(&self, reg: &mut CmuRegisters) {
                reg.unlock();
                reg.regs().fcg.modify(FCG::$FCG_FIELD::SET);
                // Same as enable_clock, a gate readback settles immediately
                while !reg.regs().fcg.is_set(FCG::$FCG_FIELD) {}
                reg.lock();
            }
        }
    };
}

generate_fcg!(TMRA1, TMRA1);
generate_fcg!(TMRA2, TMRA2);
generate_fcg!(TMRA3, TMRA3);
generate_fcg!(TMRA4, TMRA4);
generate_fcg!(EMB0, EMB0);
generate_fcg!(EMB1, EMB1);
