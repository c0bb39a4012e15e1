//! # Clock and Oscillator Configuration
//!
//! This module provides a [typestate](https://docs.rust-embedded.org/book/static-guarantees/typestate-programming.html)
//! API for enabling oscillators, configuring the PLL and switching the
//! system clock. Oscillators must be proven stable before anything may be
//! clocked from them, and every hardware stability poll is bounded by a
//! timeout that maps to [`Error::Timeout`].

use core::marker::PhantomData;

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use super::{
    CmuRegisters, CKSWR, HRCCR, LRCCR, MCOCFGR, MRCCR, OSCSTBSR, PLLCFGR, PLLCR, SCFGR, XTALCFGR,
    XTALCR, XTALSTDCR, XTALSTDSR,
};

/// Chip limits for the clock tree.
pub mod limits {
    /// Supported external crystal range.
    pub const XTAL_FREQ_MIN_HZ: u32 = 1_000_000;
    pub const XTAL_FREQ_MAX_HZ: u32 = 20_000_000;

    /// PLL reference (input / M) window.
    pub const PLL_REF_MIN_HZ: u32 = 4_000_000;
    pub const PLL_REF_MAX_HZ: u32 = 12_000_000;

    /// VCO (reference x N) window.
    pub const PLL_VCO_MIN_HZ: u32 = 240_000_000;
    pub const PLL_VCO_MAX_HZ: u32 = 480_000_000;

    /// Maximum system clock frequency.
    pub const SYSCLK_MAX_HZ: u32 = 80_000_000;

    pub const PLL_M_MIN: u32 = 1;
    pub const PLL_M_MAX: u32 = 24;
    pub const PLL_N_MIN: u32 = 20;
    pub const PLL_N_MAX: u32 = 480;
    pub const PLL_P_MIN: u32 = 2;
    pub const PLL_P_MAX: u32 = 16;
}

/// Budget for oscillator/PLL stability polls.
const STABILITY_TIMEOUT: u32 = 0x0002_0000;
/// Budget for the CKSWR switch readback.
const SWITCH_TIMEOUT: u32 = 0x1000;
/// Settle spin for the RC oscillators that have no stability flag.
const RC_SETTLE_CYCLES: u32 = 0x500;

/// Errors of the clock configuration code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A hardware stability or switch flag did not come up in time. The
    /// previous clock selection is left in place.
    Timeout,
    /// A divider, multiplier or frequency is outside the chip limits.
    InvalidConfig,
}

/// System clock source selection as encoded in CKSWR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysClockSource {
    /// High speed RC oscillator (48 MHz)
    Hrc = 0,
    /// Middle speed RC oscillator (8 MHz)
    Mrc = 1,
    /// Low speed RC oscillator (32.768 kHz)
    Lrc = 2,
    /// External crystal (1 MHz - 20 MHz)
    Xtal = 3,
    /// PLL output
    Pll = 5,
}

impl SysClockSource {
    #[inline(always)]
    fn cksw(self) -> u8 {
        self as u8
    }
}

/// Marker trait for an oscillator source.
pub trait OscillatorSource: crate::Sealed {
    const SOURCE: SysClockSource;
    const BASE_FREQUENCY: u32;
}

pub struct HighSpeedRcOscillator;
pub struct MiddleSpeedRcOscillator;
pub struct LowSpeedRcOscillator;
pub struct ExternalCrystalOscillator;
pub struct PllOscillator;

impl crate::Sealed for HighSpeedRcOscillator {}
impl crate::Sealed for MiddleSpeedRcOscillator {}
impl crate::Sealed for LowSpeedRcOscillator {}
impl crate::Sealed for ExternalCrystalOscillator {}
impl crate::Sealed for PllOscillator {}

impl OscillatorSource for HighSpeedRcOscillator {
    const SOURCE: SysClockSource = SysClockSource::Hrc;
    const BASE_FREQUENCY: u32 = 48_000_000; // 48 MHz
}
impl OscillatorSource for MiddleSpeedRcOscillator {
    const SOURCE: SysClockSource = SysClockSource::Mrc;
    const BASE_FREQUENCY: u32 = 8_000_000; // 8 MHz
}
impl OscillatorSource for LowSpeedRcOscillator {
    const SOURCE: SysClockSource = SysClockSource::Lrc;
    const BASE_FREQUENCY: u32 = 32_768; // 32.768 kHz
}
impl OscillatorSource for ExternalCrystalOscillator {
    const SOURCE: SysClockSource = SysClockSource::Xtal;
    // Board property, the real frequency comes from XtalConfig
    const BASE_FREQUENCY: u32 = 8_000_000;
}
impl OscillatorSource for PllOscillator {
    const SOURCE: SysClockSource = SysClockSource::Pll;
    // Always computed from the PLL dividers at enable time
    const BASE_FREQUENCY: u32 = 0;
}

/// Marker trait for oscillators the PLL can take its reference from.
pub trait PllSourceOscillator: OscillatorSource {
    const PLLSRC: u32;
}

impl PllSourceOscillator for ExternalCrystalOscillator {
    const PLLSRC: u32 = 0;
}
impl PllSourceOscillator for HighSpeedRcOscillator {
    const PLLSRC: u32 = 1;
}

/// Marker trait for the state of an oscillator.
pub trait OscillatorState: crate::Sealed {}

pub struct Disabled;
pub struct Enabled;

impl crate::Sealed for Disabled {}
impl crate::Sealed for Enabled {}

impl OscillatorState for Disabled {}
impl OscillatorState for Enabled {}

/// Marker trait for a bus clock produced by [`SystemClockConfig::freeze`].
pub trait ClockOption: crate::Sealed {}

pub struct SystemClock;
pub struct AhbBus;
pub struct Apb1Bus;
pub struct Apb4Bus;

impl crate::Sealed for SystemClock {}
impl crate::Sealed for AhbBus {}
impl crate::Sealed for Apb1Bus {}
impl crate::Sealed for Apb4Bus {}
impl ClockOption for SystemClock {}
impl ClockOption for AhbBus {}
impl ClockOption for Apb1Bus {}
impl ClockOption for Apb4Bus {}

impl ClockOption for HighSpeedRcOscillator {}
impl ClockOption for MiddleSpeedRcOscillator {}
impl ClockOption for LowSpeedRcOscillator {}
impl ClockOption for ExternalCrystalOscillator {}
impl ClockOption for PllOscillator {}

/// Oscillators represent the state of a physical oscillator. To use an
/// oscillator it must be enabled and proven stable first.
pub struct Oscillator<O: OscillatorSource, S: OscillatorState> {
    frequency: u32,
    _source: PhantomData<O>,
    _state: PhantomData<S>,
}

impl<O: OscillatorSource, S: OscillatorState> Oscillator<O, S> {
    /// Frequency of the oscillator in Hz.
    #[inline(always)]
    pub fn frequency(&self) -> u32 {
        self.frequency
    }
}

impl<O: OscillatorSource + ClockOption> Oscillator<O, Enabled> {
    /// Consumes the oscillator into a [`Clock`] that can drive the system
    /// clock. An oscillator turned into a clock can no longer be stopped,
    /// which keeps a running SYSCLK source alive by construction.
    ///
    /// ```compile_fail
    /// use hc32m423_hal as hal;
    /// let p = unsafe { hal::Peripherals::steal() };
    /// let mut cmu = hal::cmu::Cmu::new(p.cmu);
    /// let hrc = hal::cmu::clocks::Hrc::new(cmu.osc_guards.hrc)
    ///     .enable(&mut cmu.reg)
    ///     .unwrap();
    /// let clk = hrc.into_clock();
    /// cmu.sys_clk.set_source(&mut cmu.reg, &clk).unwrap();
    /// // The oscillator was moved into the clock, stopping it is an error
    /// hrc.disable(&mut cmu.reg);
    /// ```
    pub const fn into_clock(self) -> Clock<O> {
        Clock {
            _src: PhantomData,
            frequency: self.frequency,
        }
    }
}

/// Clocks are used to drive peripherals after the system clock is configured.
pub struct Clock<SRC: ClockOption> {
    _src: PhantomData<SRC>,
    pub frequency: u32,
}

/// An OscillatorGuard protects the initialization of an [`Oscillator`],
/// ensuring that each oscillator source is only initialized once.
pub struct OscillatorGuard<O: OscillatorSource> {
    _source: PhantomData<O>,
}

impl<O> OscillatorGuard<O>
where
    O: OscillatorSource,
{
    pub(super) fn new() -> Self {
        Self {
            _source: PhantomData,
        }
    }
}

/// A collection of OscillatorGuards for each [`Oscillator`] source.
pub struct OscillatorGuards {
    pub hrc: OscillatorGuard<HighSpeedRcOscillator>,
    pub mrc: OscillatorGuard<MiddleSpeedRcOscillator>,
    pub lrc: OscillatorGuard<LowSpeedRcOscillator>,
    pub xtal: OscillatorGuard<ExternalCrystalOscillator>,
    pub pll: OscillatorGuard<PllOscillator>,
}

impl OscillatorGuards {
    pub(super) fn new() -> Self {
        Self {
            hrc: OscillatorGuard::new(),
            mrc: OscillatorGuard::new(),
            lrc: OscillatorGuard::new(),
            xtal: OscillatorGuard::new(),
            pll: OscillatorGuard::new(),
        }
    }
}

/// Initialization of an [`Oscillator`] requires consumption of a
/// corresponding typed OscillatorGuard.
impl<O> Oscillator<O, Disabled>
where
    O: OscillatorSource,
{
    pub fn new(_guard: OscillatorGuard<O>) -> Self {
        Self {
            frequency: O::BASE_FREQUENCY,
            _source: PhantomData,
            _state: PhantomData,
        }
    }
}

fn rc_settle() {
    for _ in 0..RC_SETTLE_CYCLES {
        cortex_m::asm::nop();
    }
}

pub type Hrc = Oscillator<HighSpeedRcOscillator, Disabled>;
impl Hrc {
    pub fn enable(
        self,
        reg: &mut CmuRegisters,
    ) -> Result<Oscillator<HighSpeedRcOscillator, Enabled>, Error> {
        reg.unlock();
        reg.regs().hrccr.write(HRCCR::HRCSTP::CLEAR);
        let mut timeout = STABILITY_TIMEOUT;
        while !reg.regs().oscstbsr.is_set(OSCSTBSR::HRCSTB) {
            timeout -= 1;
            if timeout == 0 {
                reg.lock();
                return Err(Error::Timeout);
            }
        }
        reg.lock();
        Ok(Oscillator {
            frequency: self.frequency,
            _source: PhantomData,
            _state: PhantomData,
        })
    }
}

impl Oscillator<HighSpeedRcOscillator, Enabled> {
    /// Stops the oscillator again. Requires ownership, so a source that is
    /// still borrowed by the PLL or the system clock cannot be stopped.
    pub fn disable(self, reg: &mut CmuRegisters) -> Hrc {
        reg.unlock();
        reg.regs().hrccr.write(HRCCR::HRCSTP::SET);
        reg.lock();
        Oscillator {
            frequency: self.frequency,
            _source: PhantomData,
            _state: PhantomData,
        }
    }
}

pub type Mrc = Oscillator<MiddleSpeedRcOscillator, Disabled>;
impl Mrc {
    /// The MRC has no stability flag, a fixed settle spin is used instead.
    pub fn enable(self, reg: &mut CmuRegisters) -> Oscillator<MiddleSpeedRcOscillator, Enabled> {
        reg.unlock();
        reg.regs().mrccr.write(MRCCR::MRCSTP::CLEAR);
        reg.lock();
        rc_settle();
        Oscillator {
            frequency: self.frequency,
            _source: PhantomData,
            _state: PhantomData,
        }
    }
}

pub type Lrc = Oscillator<LowSpeedRcOscillator, Disabled>;
impl Lrc {
    /// The LRC has no stability flag, a fixed settle spin is used instead.
    pub fn enable(self, reg: &mut CmuRegisters) -> Oscillator<LowSpeedRcOscillator, Enabled> {
        reg.unlock();
        reg.regs().lrccr.write(LRCCR::LRCSTP::CLEAR);
        reg.lock();
        rc_settle();
        Oscillator {
            frequency: self.frequency,
            _source: PhantomData,
            _state: PhantomData,
        }
    }
}

/// Crystal drive strength, selected by the frequency band of the crystal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XtalDrive {
    /// 16 MHz - 20 MHz
    High,
    /// 8 MHz - 16 MHz
    Mid,
    /// 4 MHz - 8 MHz
    Low,
    /// 1 MHz - 4 MHz
    UltraLow,
}

impl XtalDrive {
    /// Picks the drive strength matching a crystal frequency.
    pub fn for_frequency(hz: u32) -> XtalDrive {
        match hz {
            0..=4_000_000 => XtalDrive::UltraLow,
            4_000_001..=8_000_000 => XtalDrive::Low,
            8_000_001..=16_000_000 => XtalDrive::Mid,
            _ => XtalDrive::High,
        }
    }
}

/// Crystal pad mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XtalMode {
    /// Drive a crystal between XTAL_IN/XTAL_OUT.
    Oscillator,
    /// Feed an external clock into XTAL_IN.
    ExternalClock,
}

/// External crystal configuration.
#[derive(Debug, Clone, Copy)]
pub struct XtalConfig {
    pub mode: XtalMode,
    pub drive: XtalDrive,
    pub frequency_hz: u32,
}

impl XtalConfig {
    /// Oscillator mode with the drive strength derived from the frequency.
    pub fn oscillator(frequency_hz: u32) -> Self {
        XtalConfig {
            mode: XtalMode::Oscillator,
            drive: XtalDrive::for_frequency(frequency_hz),
            frequency_hz,
        }
    }
}

impl Default for XtalConfig {
    fn default() -> Self {
        XtalConfig::oscillator(8_000_000)
    }
}

pub type Xtal = Oscillator<ExternalCrystalOscillator, Disabled>;
impl Xtal {
    pub fn enable(
        self,
        reg: &mut CmuRegisters,
        config: XtalConfig,
    ) -> Result<Oscillator<ExternalCrystalOscillator, Enabled>, Error> {
        if config.frequency_hz < limits::XTAL_FREQ_MIN_HZ
            || config.frequency_hz > limits::XTAL_FREQ_MAX_HZ
        {
            return Err(Error::InvalidConfig);
        }
        reg.unlock();
        reg.regs().xtalcfgr.write(
            match config.drive {
                XtalDrive::High => XTALCFGR::XTALDRV::High,
                XtalDrive::Mid => XTALCFGR::XTALDRV::Mid,
                XtalDrive::Low => XTALCFGR::XTALDRV::Low,
                XtalDrive::UltraLow => XTALCFGR::XTALDRV::UltraLow,
            } + match config.mode {
                XtalMode::Oscillator => XTALCFGR::XTALMS::Oscillator,
                XtalMode::ExternalClock => XTALCFGR::XTALMS::ExternalClock,
            },
        );
        reg.regs().xtalcr.write(XTALCR::XTALSTP::CLEAR);
        let mut timeout = STABILITY_TIMEOUT;
        while !reg.regs().oscstbsr.is_set(OSCSTBSR::XTALSTB) {
            timeout -= 1;
            if timeout == 0 {
                // Leave the pad stopped rather than half-configured
                reg.regs().xtalcr.write(XTALCR::XTALSTP::SET);
                reg.lock();
                return Err(Error::Timeout);
            }
        }
        reg.lock();
        Ok(Oscillator {
            frequency: config.frequency_hz,
            _source: PhantomData,
            _state: PhantomData,
        })
    }
}

impl Oscillator<ExternalCrystalOscillator, Enabled> {
    /// Stops the crystal again. Requires ownership, so a source that is
    /// still borrowed by the PLL or the system clock cannot be stopped.
    pub fn disable(self, reg: &mut CmuRegisters) -> Xtal {
        reg.unlock();
        reg.regs().xtalcr.write(XTALCR::XTALSTP::SET);
        reg.lock();
        Oscillator {
            frequency: ExternalCrystalOscillator::BASE_FREQUENCY,
            _source: PhantomData,
            _state: PhantomData,
        }
    }

    /// Arms the crystal failure detector. With `interrupt` set the
    /// detector raises the XTAL failure interrupt on loss of the clock.
    pub fn enable_failure_detection(&self, reg: &mut CmuRegisters, interrupt: bool) {
        reg.unlock();
        reg.regs().xtalstdcr.write(
            XTALSTDCR::STDE::SET
                + if interrupt {
                    XTALSTDCR::STDIE::SET
                } else {
                    XTALSTDCR::STDIE::CLEAR
                },
        );
        reg.lock();
    }

    /// Latched crystal failure flag.
    pub fn failure_detected(&self, reg: &CmuRegisters) -> bool {
        reg.regs().xtalstdsr.is_set(XTALSTDSR::STDF)
    }

    pub fn clear_failure_flag(&self, reg: &mut CmuRegisters) {
        reg.unlock();
        reg.regs().xtalstdsr.write(XTALSTDSR::STDF::CLEAR);
        reg.lock();
    }
}

/// PLL divider configuration.
///
/// The output frequency is `reference / m * n / p` where the reference is
/// the selected source oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    /// Reference divider, 1..=24.
    pub m: u32,
    /// VCO multiplier, 20..=480.
    pub n: u32,
    /// Output divider, 2..=16.
    pub p: u32,
}

impl PllConfig {
    /// Output frequency in Hz for a given reference, without range checks.
    pub fn output_frequency(&self, reference_hz: u32) -> u32 {
        (reference_hz as u64 / self.m as u64 * self.n as u64 / self.p as u64) as u32
    }

    /// Checks the dividers against the chip limits for a given reference
    /// and returns the resulting output frequency.
    pub fn validate(&self, reference_hz: u32) -> Result<u32, Error> {
        if self.m < limits::PLL_M_MIN || self.m > limits::PLL_M_MAX {
            return Err(Error::InvalidConfig);
        }
        if self.n < limits::PLL_N_MIN || self.n > limits::PLL_N_MAX {
            return Err(Error::InvalidConfig);
        }
        if self.p < limits::PLL_P_MIN || self.p > limits::PLL_P_MAX {
            return Err(Error::InvalidConfig);
        }
        let refclk = reference_hz / self.m;
        if refclk < limits::PLL_REF_MIN_HZ || refclk > limits::PLL_REF_MAX_HZ {
            return Err(Error::InvalidConfig);
        }
        let vco = refclk as u64 * self.n as u64;
        if vco < limits::PLL_VCO_MIN_HZ as u64 || vco > limits::PLL_VCO_MAX_HZ as u64 {
            return Err(Error::InvalidConfig);
        }
        let out = (vco / self.p as u64) as u32;
        if out > limits::SYSCLK_MAX_HZ {
            return Err(Error::InvalidConfig);
        }
        Ok(out)
    }

    /// Searches M/N/P dividers that produce `target_hz` from `reference_hz`.
    ///
    /// Prefers an exact hit and, among equally close candidates, the highest
    /// VCO frequency (lower output jitter). Returns `None` when no divider
    /// combination stays within the chip limits.
    pub fn from_frequency(reference_hz: u32, target_hz: u32) -> Option<PllConfig> {
        if target_hz == 0 || target_hz > limits::SYSCLK_MAX_HZ {
            return None;
        }
        let mut best: Option<(PllConfig, u32, u64)> = None; // (cfg, error, vco)
        for m in limits::PLL_M_MIN..=limits::PLL_M_MAX {
            let refclk = reference_hz / m;
            if refclk < limits::PLL_REF_MIN_HZ || refclk > limits::PLL_REF_MAX_HZ {
                continue;
            }
            for p in limits::PLL_P_MIN..=limits::PLL_P_MAX {
                // Nearest multiplier for this reference/output divider pair
                let n = ((target_hz as u64 * p as u64 + (refclk / 2) as u64) / refclk as u64) as u32;
                if n < limits::PLL_N_MIN || n > limits::PLL_N_MAX {
                    continue;
                }
                let cfg = PllConfig { m, n, p };
                let out = match cfg.validate(reference_hz) {
                    Ok(out) => out,
                    Err(_) => continue,
                };
                let error = out.abs_diff(target_hz);
                let vco = refclk as u64 * n as u64;
                let better = match best {
                    None => true,
                    Some((_, best_error, best_vco)) => {
                        error < best_error || (error == best_error && vco > best_vco)
                    }
                };
                if better {
                    best = Some((cfg, error, vco));
                }
            }
        }
        best.map(|(cfg, _, _)| cfg)
    }
}

pub type Pll = Oscillator<PllOscillator, Disabled>;
impl Pll {
    /// Programs the PLL dividers, starts the PLL from the given source
    /// oscillator and waits for lock.
    pub fn enable<S: PllSourceOscillator>(
        self,
        reg: &mut CmuRegisters,
        source: &Oscillator<S, Enabled>,
        config: PllConfig,
    ) -> Result<Oscillator<PllOscillator, Enabled>, Error> {
        let output = config.validate(source.frequency())?;
        reg.unlock();
        reg.regs().pllcfgr.write(
            PLLCFGR::PLLM.val(config.m - 1)
                + PLLCFGR::PLLSRC.val(S::PLLSRC)
                + PLLCFGR::PLLN.val(config.n - 1)
                + PLLCFGR::PLLP.val(config.p - 1),
        );
        reg.regs().pllcr.write(PLLCR::PLLOFF::CLEAR);
        let mut timeout = STABILITY_TIMEOUT;
        while !reg.regs().oscstbsr.is_set(OSCSTBSR::PLLSTB) {
            timeout -= 1;
            if timeout == 0 {
                reg.regs().pllcr.write(PLLCR::PLLOFF::SET);
                reg.lock();
                return Err(Error::Timeout);
            }
        }
        reg.lock();
        Ok(Oscillator {
            frequency: output,
            _source: PhantomData,
            _state: PhantomData,
        })
    }
}

impl Oscillator<PllOscillator, Enabled> {
    /// Stops the PLL again.
    pub fn disable(self, reg: &mut CmuRegisters) -> Pll {
        reg.unlock();
        reg.regs().pllcr.write(PLLCR::PLLOFF::SET);
        reg.lock();
        Oscillator {
            frequency: PllOscillator::BASE_FREQUENCY,
            _source: PhantomData,
            _state: PhantomData,
        }
    }
}

/// Power-of-two bus clock divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDivider {
    Div1 = 0,
    Div2 = 1,
    Div4 = 2,
    Div8 = 3,
    Div16 = 4,
    Div32 = 5,
    Div64 = 6,
}

impl BusDivider {
    #[inline(always)]
    pub const fn divisor(self) -> u32 {
        1 << (self as u32)
    }

    #[inline(always)]
    const fn bits(self) -> u32 {
        self as u32
    }
}

/// Bus divider selection for HCLK, PCLK1 and PCLK4.
#[derive(Debug, Clone, Copy)]
pub struct BusDividers {
    pub hclk: BusDivider,
    pub pclk1: BusDivider,
    pub pclk4: BusDivider,
}

impl Default for BusDividers {
    fn default() -> Self {
        BusDividers {
            hclk: BusDivider::Div1,
            pclk1: BusDivider::Div1,
            pclk4: BusDivider::Div1,
        }
    }
}

/// The peripheral buses may not run faster than the AHB.
fn check_dividers(div: BusDividers) -> Result<(), Error> {
    if div.pclk1.divisor() < div.hclk.divisor() || div.pclk4.divisor() < div.hclk.divisor() {
        return Err(Error::InvalidConfig);
    }
    Ok(())
}

/// System clock setup (source selection and bus dividers).
///
/// Created through [`super::Cmu::new`], which captures the reset state of
/// the chip: running from the MRC with all dividers at one.
pub struct SystemClockConfig {
    source: SysClockSource,
    source_freq: u32,
    dividers: BusDividers,
}

/// Frozen clock tree frequencies, consumed by the peripheral drivers.
pub struct Clocks {
    pub sysclk: Clock<SystemClock>,
    pub hclk: Clock<AhbBus>,
    pub pclk1: Clock<Apb1Bus>,
    pub pclk4: Clock<Apb4Bus>,
}

impl SystemClockConfig {
    pub(super) fn new() -> Self {
        SystemClockConfig {
            source: SysClockSource::Mrc,
            source_freq: MiddleSpeedRcOscillator::BASE_FREQUENCY,
            dividers: BusDividers::default(),
        }
    }

    /// Currently selected system clock source.
    pub fn source(&self) -> SysClockSource {
        self.source
    }

    /// Currently selected system clock frequency.
    pub fn sysclk(&self) -> u32 {
        self.source_freq
    }

    /// Currently resulting AHB frequency.
    pub fn hclk(&self) -> u32 {
        self.source_freq / self.dividers.hclk.divisor()
    }

    /// Programs the AHB/APB dividers.
    pub fn set_dividers(
        &mut self,
        reg: &mut CmuRegisters,
        dividers: BusDividers,
    ) -> Result<(), Error> {
        check_dividers(dividers)?;
        reg.unlock();
        reg.regs().scfgr.write(
            SCFGR::HCLKS.val(dividers.hclk.bits())
                + SCFGR::PCLK1S.val(dividers.pclk1.bits())
                + SCFGR::PCLK4S.val(dividers.pclk4.bits()),
        );
        reg.lock();
        self.dividers = dividers;
        Ok(())
    }

    /// Switches the system clock to a [`Clock`] made from an
    /// enabled-and-stable oscillator (see
    /// [`Oscillator::into_clock`](Oscillator::into_clock)). Taking a
    /// `Clock` rather than the oscillator means the source can no longer
    /// be stopped while it drives SYSCLK.
    ///
    /// During the switch the flash controller is moved to its slowest
    /// timing with the read cache off, and every FCG peripheral gate is
    /// closed; both are restored afterwards. On a timeout the previous
    /// source stays selected and [`Error::Timeout`] is returned.
    pub fn set_source<S: OscillatorSource + ClockOption>(
        &mut self,
        reg: &mut CmuRegisters,
        source: &Clock<S>,
    ) -> Result<(), Error> {
        let target_sysclk = source.frequency;
        if target_sysclk > limits::SYSCLK_MAX_HZ {
            return Err(Error::InvalidConfig);
        }
        let target_hclk = target_sysclk / self.dividers.hclk.divisor();

        let efm_state = crate::efm::prepare_clock_switch();
        let fcg_state = reg.freeze_fcg();

        reg.unlock();
        reg.regs().ckswr.write(CKSWR::CKSW.val(S::SOURCE.cksw()));
        let mut timeout = SWITCH_TIMEOUT;
        let switched = loop {
            if reg.regs().ckswr.read(CKSWR::CKSW) == S::SOURCE.cksw() {
                break true;
            }
            timeout -= 1;
            if timeout == 0 {
                break false;
            }
        };
        reg.lock();

        reg.restore_fcg(fcg_state);
        let hclk_after = if switched { target_hclk } else { self.hclk() };
        crate::efm::finish_clock_switch(efm_state, hclk_after);

        if switched {
            self.source = S::SOURCE;
            self.source_freq = target_sysclk;
            Ok(())
        } else {
            Err(Error::Timeout)
        }
    }

    /// Freezes the clock configuration and returns the resulting clock tree.
    pub fn freeze(self) -> Clocks {
        let sysclk = self.source_freq;
        Clocks {
            sysclk: Clock {
                _src: PhantomData,
                frequency: sysclk,
            },
            hclk: Clock {
                _src: PhantomData,
                frequency: sysclk / self.dividers.hclk.divisor(),
            },
            pclk1: Clock {
                _src: PhantomData,
                frequency: sysclk / self.dividers.pclk1.divisor(),
            },
            pclk4: Clock {
                _src: PhantomData,
                frequency: sysclk / self.dividers.pclk4.divisor(),
            },
        }
    }
}

/// Source selection for the clock output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McoSource {
    Hrc = 0,
    Mrc = 1,
    Lrc = 2,
    Xtal = 3,
    Pll = 4,
    SysClk = 5,
}

/// Power-of-two divider for the clock output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McoDivider {
    Div1 = 0,
    Div2 = 1,
    Div4 = 2,
    Div8 = 3,
    Div16 = 4,
    Div32 = 5,
    Div64 = 6,
    Div128 = 7,
}

/// Routes a divided clock to the MCO pin. The pin itself must be put into
/// its clock-output alternate function separately.
pub fn configure_mco(reg: &mut CmuRegisters, source: McoSource, divider: McoDivider) {
    reg.unlock();
    reg.regs().mcocfgr.write(
        MCOCFGR::MCOSEL.val(source as u8)
            + MCOCFGR::MCODIV.val(divider as u8)
            + MCOCFGR::MCOEN::CLEAR,
    );
    reg.lock();
}

pub fn enable_mco(reg: &mut CmuRegisters) {
    reg.unlock();
    reg.regs().mcocfgr.modify(MCOCFGR::MCOEN::SET);
    reg.lock();
}

pub fn disable_mco(reg: &mut CmuRegisters) {
    reg.unlock();
    reg.regs().mcocfgr.modify(MCOCFGR::MCOEN::CLEAR);
    reg.lock();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An 8 MHz crystal must reach the 80 MHz maximum exactly.
    #[test]
    fn pll_search_hits_80mhz_from_8mhz_xtal() {
        let cfg = PllConfig::from_frequency(8_000_000, 80_000_000)
            .expect("80 MHz must be reachable from an 8 MHz reference");
        let out = cfg
            .validate(8_000_000)
            .expect("search result must pass validation");
        assert_eq!(out, 80_000_000);
    }

    /// The 48 MHz HRC must also reach full speed.
    #[test]
    fn pll_search_hits_80mhz_from_hrc() {
        let hrc = HighSpeedRcOscillator::BASE_FREQUENCY;
        assert_eq!(hrc, 48_000_000);
        let cfg = PllConfig::from_frequency(hrc, 80_000_000)
            .expect("80 MHz must be reachable from the HRC");
        assert_eq!(cfg.validate(hrc).unwrap(), 80_000_000);
    }

    /// Among exact hits the search must pick the highest VCO.
    #[test]
    fn pll_search_prefers_high_vco() {
        let cfg = PllConfig::from_frequency(8_000_000, 60_000_000).unwrap();
        let refclk = 8_000_000 / cfg.m;
        let vco = refclk as u64 * cfg.n as u64;
        // 60 MHz is reachable with a VCO of 480 MHz (p = 8)
        assert_eq!(cfg.validate(8_000_000).unwrap(), 60_000_000);
        assert_eq!(vco, 480_000_000);
    }

    /// Targets below the lowest reachable output must be rejected.
    #[test]
    fn pll_search_rejects_unreachable_targets() {
        // Lowest reachable output is VCO_MIN / P_MAX = 15 MHz
        assert_eq!(PllConfig::from_frequency(8_000_000, 1_000_000), None);
        // Above the system clock ceiling
        assert_eq!(PllConfig::from_frequency(8_000_000, 100_000_000), None);
    }

    #[test]
    fn pll_validate_rejects_vco_out_of_range() {
        // 8 MHz reference, VCO would be 800 MHz
        let cfg = PllConfig { m: 1, n: 100, p: 2 };
        assert_eq!(cfg.validate(8_000_000), Err(Error::InvalidConfig));
        // VCO of 160 MHz is below the window
        let cfg = PllConfig { m: 1, n: 20, p: 2 };
        assert_eq!(cfg.validate(8_000_000), Err(Error::InvalidConfig));
    }

    #[test]
    fn pll_validate_rejects_bad_fields() {
        assert_eq!(
            PllConfig { m: 0, n: 60, p: 6 }.validate(8_000_000),
            Err(Error::InvalidConfig)
        );
        assert_eq!(
            PllConfig { m: 1, n: 60, p: 1 }.validate(8_000_000),
            Err(Error::InvalidConfig)
        );
        assert_eq!(
            PllConfig { m: 25, n: 60, p: 6 }.validate(8_000_000),
            Err(Error::InvalidConfig)
        );
    }

    #[test]
    fn pll_output_frequency_math() {
        // 8 MHz / 2 * 120 / 6 = 80 MHz
        let cfg = PllConfig { m: 2, n: 120, p: 6 };
        assert_eq!(cfg.output_frequency(8_000_000), 80_000_000);
    }

    #[test]
    fn bus_divider_divisors() {
        assert_eq!(BusDivider::Div1.divisor(), 1);
        assert_eq!(BusDivider::Div8.divisor(), 8);
        assert_eq!(BusDivider::Div64.divisor(), 64);
    }

    /// PCLK faster than HCLK is an invalid tree.
    #[test]
    fn bus_dividers_reject_pclk_above_hclk() {
        let bad = BusDividers {
            hclk: BusDivider::Div4,
            pclk1: BusDivider::Div2,
            pclk4: BusDivider::Div4,
        };
        assert_eq!(check_dividers(bad), Err(Error::InvalidConfig));
        let good = BusDividers {
            hclk: BusDivider::Div2,
            pclk1: BusDivider::Div4,
            pclk4: BusDivider::Div2,
        };
        assert!(check_dividers(good).is_ok());
    }

    #[test]
    fn xtal_drive_bands() {
        assert_eq!(XtalDrive::for_frequency(2_000_000), XtalDrive::UltraLow);
        assert_eq!(XtalDrive::for_frequency(8_000_000), XtalDrive::Low);
        assert_eq!(XtalDrive::for_frequency(12_000_000), XtalDrive::Mid);
        assert_eq!(XtalDrive::for_frequency(20_000_000), XtalDrive::High);
    }
}
