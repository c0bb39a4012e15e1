//! Timer A (TMRA)
//!
//! Four identical 16-bit timer units. Each unit counts up, down, or in
//! triangle (up-then-down) mode from PCLK1 through a power-of-two
//! prescaler, and carries two capture/compare channels that can drive
//! PWM outputs or time-stamp input edges.
use crate::cmu::ClockForPeripheral;
use paste::paste;
use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

const TMRA_BASE: usize = 0x4001_5000;
const TMRA_STRIDE: usize = 0x400;

/// Number of capture/compare channels per unit.
pub const CHANNEL_COUNT: usize = 2;

register_structs! {
    /// Register block of one TMRA unit.
    pub TmraRegBlock {
        /// Counter value
        (0x000 => cnter: ReadWrite<u16>),
        (0x002 => _reserved0),
        /// Period (counter reload / overflow point)
        (0x004 => perar: ReadWrite<u16>),
        (0x006 => _reserved1),
        /// Compare value, one register per channel
        (0x008 => cmpar: [ReadWrite<u16>; CHANNEL_COUNT]),
        (0x00C => _reserved2),
        /// Base control
        (0x040 => bcstr: ReadWrite<u16, BCSTR::Register>),
        (0x042 => _reserved3),
        /// Interrupt enable
        (0x044 => iconr: ReadWrite<u16, ICONR::Register>),
        (0x046 => _reserved4),
        /// Status flags
        (0x048 => stflr: ReadWrite<u16, STFLR::Register>),
        (0x04A => _reserved5),
        /// Port (PWM output) control, one register per channel
        (0x050 => pconr: [ReadWrite<u16, PCONR::Register>; CHANNEL_COUNT]),
        (0x054 => _reserved6),
        /// Capture control, one register per channel
        (0x060 => cconr: [ReadWrite<u16, CCONR::Register>; CHANNEL_COUNT]),
        (0x064 => _reserved7),
        (0x400 => @END),
    }
}

register_bitfields![u16,
    pub(crate) BCSTR [
        /// Counter start
        START OFFSET(0) NUMBITS(1) [],
        /// Count direction in sawtooth mode
        DIR OFFSET(1) NUMBITS(1) [
            Up = 0,
            Down = 1,
        ],
        /// Count waveform
        MODE OFFSET(2) NUMBITS(1) [
            Sawtooth = 0,
            Triangle = 1,
        ],
        /// Prescaler, PCLK1 / 2^CKDIV
        CKDIV OFFSET(4) NUMBITS(4) [],
        /// Overflow interrupt enable
        ITENOVF OFFSET(12) NUMBITS(1) [],
        /// Underflow interrupt enable
        ITENUDF OFFSET(13) NUMBITS(1) [],
        /// Overflow flag
        OVFF OFFSET(14) NUMBITS(1) [],
        /// Underflow flag
        UDFF OFFSET(15) NUMBITS(1) [],
    ],
    pub(crate) ICONR [
        /// Compare-match interrupt enable, channel 1
        ITEN1 OFFSET(0) NUMBITS(1) [],
        /// Compare-match interrupt enable, channel 2
        ITEN2 OFFSET(1) NUMBITS(1) [],
    ],
    pub(crate) STFLR [
        /// Compare-match flag, channel 1
        CMPF1 OFFSET(0) NUMBITS(1) [],
        /// Compare-match flag, channel 2
        CMPF2 OFFSET(1) NUMBITS(1) [],
    ],
    pub(crate) PCONR [
        /// Output level when the counter starts
        STAC OFFSET(0) NUMBITS(2) [
            Low = 0,
            High = 1,
            Hold = 2,
        ],
        /// Output level when the counter stops
        STPC OFFSET(2) NUMBITS(2) [
            Low = 0,
            High = 1,
            Hold = 2,
        ],
        /// Output action on compare match
        CMPC OFFSET(4) NUMBITS(2) [
            Low = 0,
            High = 1,
            Hold = 2,
            Invert = 3,
        ],
        /// Output action on period match
        PERC OFFSET(6) NUMBITS(2) [
            Low = 0,
            High = 1,
            Hold = 2,
            Invert = 3,
        ],
        /// Forced output level while a brake condition is active
        FORC OFFSET(8) NUMBITS(2) [
            Hold = 0,
            Low = 2,
            High = 3,
        ],
        /// Output enable
        OUTEN OFFSET(12) NUMBITS(1) [],
    ],
    pub(crate) CCONR [
        /// Channel function
        CAPMD OFFSET(0) NUMBITS(1) [
            Compare = 0,
            Capture = 1,
        ],
        /// Capture on the rising edge of the channel input
        HICP0 OFFSET(4) NUMBITS(1) [],
        /// Capture on the falling edge of the channel input
        HICP1 OFFSET(5) NUMBITS(1) [],
    ],
];

/// A TMRA unit instance.
///
/// Implemented for the [`crate::TMRA1`]..[`crate::TMRA4`] ownership
/// tokens, which are consumed by [`TimerA::new`].
pub trait Instance: crate::Sealed + ClockForPeripheral {
    #[doc(hidden)]
    const INDEX: usize;
}

macro_rules! tmra_instances {
    ($($UNIT:ident => $INDEX:expr),+ $(,)?) => {
        paste! {
            $(
                impl Instance for crate::$UNIT {
                    const INDEX: usize = $INDEX;
                }
            )+
        }
    };
}

tmra_instances! {
    TMRA1 => 0,
    TMRA2 => 1,
    TMRA3 => 2,
    TMRA4 => 3,
}

/// Errors from the timer driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A requested period or frequency cannot be produced from PCLK1.
    InvalidConfig,
    /// A compare value exceeds the configured period.
    CompareOutOfRange,
}

/// Counter waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountMode {
    /// Count in one direction, reload at the period match.
    #[default]
    Sawtooth,
    /// Count up to the period, then back down to zero.
    Triangle,
}

/// Count direction in sawtooth mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Up,
    Down,
}

/// Counter clock prescaler, dividing PCLK1 by a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ClockDivider {
    #[default]
    Div1 = 0,
    Div2 = 1,
    Div4 = 2,
    Div8 = 3,
    Div16 = 4,
    Div32 = 5,
    Div64 = 6,
    Div128 = 7,
    Div256 = 8,
    Div512 = 9,
    Div1024 = 10,
}

impl ClockDivider {
    /// The numeric divisor this setting applies to PCLK1.
    pub const fn divisor(self) -> u32 {
        1 << (self as u8)
    }

    const ALL: [ClockDivider; 11] = [
        ClockDivider::Div1,
        ClockDivider::Div2,
        ClockDivider::Div4,
        ClockDivider::Div8,
        ClockDivider::Div16,
        ClockDivider::Div32,
        ClockDivider::Div64,
        ClockDivider::Div128,
        ClockDivider::Div256,
        ClockDivider::Div512,
        ClockDivider::Div1024,
    ];
}

/// Capture/compare channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Channel {
    Ch1 = 0,
    Ch2 = 1,
}

/// Edges a capture channel reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEdge {
    Rising,
    Falling,
    Both,
}

/// Interrupt and flag sources of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Overflow,
    Underflow,
    CompareMatch(Channel),
}

/// Static configuration of one TMRA unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub clock_div: ClockDivider,
    pub mode: CountMode,
    pub direction: Direction,
    /// Counter value at which the period event fires.
    pub period: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clock_div: ClockDivider::Div1,
            mode: CountMode::Sawtooth,
            direction: Direction::Up,
            period: u16::MAX,
        }
    }
}

impl Config {
    /// A period of zero never produces a period event, so it is rejected
    /// in every count mode.
    fn validate(&self) -> Result<(), Error> {
        if self.period == 0 {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Derives a prescaler and period that hit `target_hz` period events
    /// per second as closely as the 16-bit counter allows.
    ///
    /// Walks the dividers from smallest to largest and takes the first
    /// one whose period fits in 16 bits, which keeps the counter
    /// resolution as high as possible. Targets that would need a period
    /// of zero (fewer than two counter ticks) are rejected.
    pub fn for_frequency(pclk1_hz: u32, target_hz: u32) -> Result<Self, Error> {
        if target_hz == 0 || target_hz > pclk1_hz {
            return Err(Error::InvalidConfig);
        }
        for div in ClockDivider::ALL {
            let ticks = pclk1_hz / div.divisor() / target_hz;
            if ticks <= 1 {
                // Larger dividers only shrink the tick count further
                return Err(Error::InvalidConfig);
            }
            if ticks <= u16::MAX as u32 + 1 {
                return Ok(Config {
                    clock_div: div,
                    mode: CountMode::Sawtooth,
                    direction: Direction::Up,
                    period: (ticks - 1) as u16,
                });
            }
        }
        Err(Error::InvalidConfig)
    }
}

/// Output waveform of a PWM channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmConfig {
    /// Output level when [`TimerA::start`] runs.
    pub start_high: bool,
    /// Output action on compare match.
    pub on_compare: OutputAction,
    /// Output action on period match.
    pub on_period: OutputAction,
}

impl Default for PwmConfig {
    /// Standard edge-aligned PWM, high until the compare match.
    fn default() -> Self {
        Self {
            start_high: true,
            on_compare: OutputAction::Low,
            on_period: OutputAction::High,
        }
    }
}

/// What a PWM output does at a match event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputAction {
    Low,
    High,
    Hold,
    Invert,
}

impl OutputAction {
    fn compare_field(self) -> FieldValue<u16, PCONR::Register> {
        match self {
            OutputAction::Low => PCONR::CMPC::Low,
            OutputAction::High => PCONR::CMPC::High,
            OutputAction::Hold => PCONR::CMPC::Hold,
            OutputAction::Invert => PCONR::CMPC::Invert,
        }
    }

    fn period_field(self) -> FieldValue<u16, PCONR::Register> {
        match self {
            OutputAction::Low => PCONR::PERC::Low,
            OutputAction::High => PCONR::PERC::High,
            OutputAction::Hold => PCONR::PERC::Hold,
            OutputAction::Invert => PCONR::PERC::Invert,
        }
    }
}

/// Driver for one TMRA unit.
pub struct TimerA<T: Instance> {
    _unit: T,
}

impl<T: Instance> TimerA<T> {
    #[inline(always)]
    fn regs(&self) -> &'static TmraRegBlock {
        // Safety: the unit token is owned by this driver
        unsafe { &*((TMRA_BASE + T::INDEX * TMRA_STRIDE) as *const TmraRegBlock) }
    }

    /// Takes ownership of a TMRA unit, enables its bus clock and applies
    /// `config` with the counter stopped.
    pub fn new(unit: T, config: Config, cmu: &mut crate::cmu::Cmu) -> Result<Self, Error> {
        config.validate()?;
        // Safety: the unit token is consumed here and gated until drop
        unsafe { unit.enable_clock(&mut cmu.reg) };
        let timer = Self { _unit: unit };
        let regs = timer.regs();
        let mode = match config.mode {
            CountMode::Sawtooth => BCSTR::MODE::Sawtooth,
            CountMode::Triangle => BCSTR::MODE::Triangle,
        };
        let dir = match config.direction {
            Direction::Up => BCSTR::DIR::Up,
            Direction::Down => BCSTR::DIR::Down,
        };
        regs.bcstr.write(
            BCSTR::START::CLEAR + mode + dir + BCSTR::CKDIV.val(config.clock_div as u16),
        );
        regs.perar.set(config.period);
        regs.cnter.set(0);
        Ok(timer)
    }

    /// Starts the counter.
    pub fn start(&mut self) {
        self.regs().bcstr.modify(BCSTR::START::SET);
    }

    /// Stops the counter, the value is retained.
    pub fn stop(&mut self) {
        self.regs().bcstr.modify(BCSTR::START::CLEAR);
    }

    /// Current counter value.
    pub fn counter(&self) -> u16 {
        self.regs().cnter.get()
    }

    /// Overwrites the counter. Usually done while stopped.
    pub fn set_counter(&mut self, value: u16) {
        self.regs().cnter.set(value);
    }

    /// Configured period value.
    pub fn period(&self) -> u16 {
        self.regs().perar.get()
    }

    /// Changes the period. Takes effect at the next reload.
    pub fn set_period(&mut self, period: u16) {
        self.regs().perar.set(period);
    }

    /// Compare value of `channel`.
    pub fn compare(&self, channel: Channel) -> u16 {
        self.regs().cmpar[channel as usize].get()
    }

    /// Sets the compare value of `channel`.
    ///
    /// Values above the period would never match, so they are rejected.
    pub fn set_compare(&mut self, channel: Channel, value: u16) -> Result<(), Error> {
        if value > self.period() {
            return Err(Error::CompareOutOfRange);
        }
        self.regs().cmpar[channel as usize].set(value);
        Ok(())
    }

    /// Turns `channel` into a PWM output with the given waveform.
    ///
    /// The compare value sets the switch point, so with the default
    /// waveform `compare / (period + 1)` is the duty cycle.
    pub fn enable_pwm(
        &mut self,
        channel: Channel,
        compare: u16,
        config: PwmConfig,
    ) -> Result<(), Error> {
        self.set_compare(channel, compare)?;
        let start = if config.start_high {
            PCONR::STAC::High
        } else {
            PCONR::STAC::Low
        };
        self.regs().cconr[channel as usize].modify(CCONR::CAPMD::Compare);
        self.regs().pconr[channel as usize].write(
            start
                + PCONR::STPC::Low
                + config.on_compare.compare_field()
                + config.on_period.period_field()
                + PCONR::FORC::Hold
                + PCONR::OUTEN::SET,
        );
        Ok(())
    }

    /// Disconnects `channel` from its output pin.
    pub fn disable_pwm(&mut self, channel: Channel) {
        self.regs().pconr[channel as usize].modify(PCONR::OUTEN::CLEAR);
    }

    /// Selects the output level forced onto `channel` while a brake
    /// condition from the emergency brake unit is active.
    pub fn set_brake_level(&mut self, channel: Channel, high: bool) {
        let level = if high { PCONR::FORC::High } else { PCONR::FORC::Low };
        self.regs().pconr[channel as usize].modify(level);
    }

    /// Turns `channel` into an input capture channel.
    pub fn enable_capture(&mut self, channel: Channel, edge: CaptureEdge) {
        let edges = match edge {
            CaptureEdge::Rising => CCONR::HICP0::SET + CCONR::HICP1::CLEAR,
            CaptureEdge::Falling => CCONR::HICP0::CLEAR + CCONR::HICP1::SET,
            CaptureEdge::Both => CCONR::HICP0::SET + CCONR::HICP1::SET,
        };
        self.regs().pconr[channel as usize].modify(PCONR::OUTEN::CLEAR);
        self.regs().cconr[channel as usize].write(CCONR::CAPMD::Capture + edges);
    }

    /// The counter value latched at the last capture event on `channel`.
    pub fn capture_value(&self, channel: Channel) -> u16 {
        self.regs().cmpar[channel as usize].get()
    }

    /// Arms the interrupt for `event`.
    pub fn enable_interrupt(&mut self, event: Event) {
        match event {
            Event::Overflow => self.regs().bcstr.modify(BCSTR::ITENOVF::SET),
            Event::Underflow => self.regs().bcstr.modify(BCSTR::ITENUDF::SET),
            Event::CompareMatch(Channel::Ch1) => self.regs().iconr.modify(ICONR::ITEN1::SET),
            Event::CompareMatch(Channel::Ch2) => self.regs().iconr.modify(ICONR::ITEN2::SET),
        }
    }

    pub fn disable_interrupt(&mut self, event: Event) {
        match event {
            Event::Overflow => self.regs().bcstr.modify(BCSTR::ITENOVF::CLEAR),
            Event::Underflow => self.regs().bcstr.modify(BCSTR::ITENUDF::CLEAR),
            Event::CompareMatch(Channel::Ch1) => self.regs().iconr.modify(ICONR::ITEN1::CLEAR),
            Event::CompareMatch(Channel::Ch2) => self.regs().iconr.modify(ICONR::ITEN2::CLEAR),
        }
    }

    /// Returns whether the flag for `event` is raised.
    pub fn flag(&self, event: Event) -> bool {
        match event {
            Event::Overflow => self.regs().bcstr.is_set(BCSTR::OVFF),
            Event::Underflow => self.regs().bcstr.is_set(BCSTR::UDFF),
            Event::CompareMatch(Channel::Ch1) => self.regs().stflr.is_set(STFLR::CMPF1),
            Event::CompareMatch(Channel::Ch2) => self.regs().stflr.is_set(STFLR::CMPF2),
        }
    }

    /// Clears the flag for `event`.
    pub fn clear_flag(&mut self, event: Event) {
        match event {
            Event::Overflow => self.regs().bcstr.modify(BCSTR::OVFF::CLEAR),
            Event::Underflow => self.regs().bcstr.modify(BCSTR::UDFF::CLEAR),
            Event::CompareMatch(Channel::Ch1) => self.regs().stflr.modify(STFLR::CMPF1::CLEAR),
            Event::CompareMatch(Channel::Ch2) => self.regs().stflr.modify(STFLR::CMPF2::CLEAR),
        }
    }

    /// Stops the counter and releases the unit token, gating its clock.
    pub fn free(mut self, cmu: &mut crate::cmu::Cmu) -> T {
        self.stop();
        // Safety: the driver is consumed, no further register access
        unsafe { self._unit.disable_clock(&mut cmu.reg) };
        self._unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divider_divisors_are_powers_of_two() {
        assert_eq!(ClockDivider::Div1.divisor(), 1);
        assert_eq!(ClockDivider::Div16.divisor(), 16);
        assert_eq!(ClockDivider::Div1024.divisor(), 1024);
    }

    #[test]
    fn for_frequency_prefers_small_divider() {
        // 8 MHz / 1 kHz = 8000 ticks, fits without any prescaling
        let config = Config::for_frequency(8_000_000, 1_000).unwrap();
        assert_eq!(config.clock_div, ClockDivider::Div1);
        assert_eq!(config.period, 7_999);
    }

    #[test]
    fn for_frequency_scales_up_for_slow_events() {
        // 80 MHz / 1 Hz needs 80 M ticks, Div1024 leaves 78125 which
        // still exceeds 16 bits, so 1 Hz is unreachable
        assert_eq!(
            Config::for_frequency(80_000_000, 1),
            Err(Error::InvalidConfig)
        );
        // 10 Hz works with Div128: 80 MHz / 128 / 10 = 62500 ticks
        let config = Config::for_frequency(80_000_000, 10).unwrap();
        assert_eq!(config.clock_div, ClockDivider::Div128);
        assert_eq!(config.period, 62_499);
    }

    #[test]
    fn for_frequency_rejects_single_tick_periods() {
        // A target equal to the counter clock would need a period of zero
        assert_eq!(
            Config::for_frequency(8_000_000, 8_000_000),
            Err(Error::InvalidConfig)
        );
        assert_eq!(
            Config::for_frequency(8_000_000, 7_999_999),
            Err(Error::InvalidConfig)
        );
    }

    #[test]
    fn zero_period_configs_are_rejected() {
        let config = Config {
            period: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidConfig));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn for_frequency_rejects_impossible_targets() {
        assert_eq!(Config::for_frequency(8_000_000, 0), Err(Error::InvalidConfig));
        assert_eq!(
            Config::for_frequency(8_000_000, 16_000_000),
            Err(Error::InvalidConfig)
        );
    }
}
