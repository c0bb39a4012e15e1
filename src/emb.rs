//! Emergency Brake (EMB)
//!
//! Two brake groups watch over the PWM outputs: EMB0 supervises the
//! motor-control timer outputs, EMB1 supervises the TMRA PWM channels.
//! When an enabled source trips, hardware forces the supervised output
//! pins to the force level their timer channel selects, without any
//! software in the loop. This driver only configures sources and
//! observes the latched status.
use crate::cmu::ClockForPeripheral;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

const EMB_BASE: usize = 0x4001_7C00;
const EMB_STRIDE: usize = 0x40;

register_structs! {
    /// Register block of one EMB group.
    pub EmbRegBlock {
        /// Control and source enables
        (0x00 => ctl: ReadWrite<u32, CTL::Register>),
        (0x04 => _reserved0),
        /// Latched brake flags and real-time port state
        (0x08 => stat: ReadOnly<u32, STAT::Register>),
        /// Flag clear, write one to clear
        (0x0C => statclr: WriteOnly<u32, STAT::Register>),
        /// Interrupt enable per source
        (0x10 => inten: ReadWrite<u32, INTEN::Register>),
        (0x14 => _reserved1),
        (0x40 => @END),
    }
}

register_bitfields![u32,
    pub(crate) CTL [
        /// Brake port input enable
        PORTINEN OFFSET(0) NUMBITS(1) [],
        /// Same-phase PWM detection enable
        PWMSEN OFFSET(1) NUMBITS(1) [],
        /// Comparator 1 brake enable
        CMPEN1 OFFSET(2) NUMBITS(1) [],
        /// Comparator 2 brake enable
        CMPEN2 OFFSET(3) NUMBITS(1) [],
        /// Comparator 3 brake enable
        CMPEN3 OFFSET(4) NUMBITS(1) [],
        /// Oscillation failure brake enable
        OSCEN OFFSET(5) NUMBITS(1) [],
        /// Brake port polarity
        INVSEL OFFSET(6) NUMBITS(1) [
            ActiveHigh = 0,
            ActiveLow = 1,
        ],
        /// Digital filter enable on the brake port
        NFEN OFFSET(7) NUMBITS(1) [],
        /// Filter sample clock, PCLK / 2^NFSEL
        NFSEL OFFSET(8) NUMBITS(2) [],
        /// Software brake
        SOFTBRK OFFSET(16) NUMBITS(1) [],
    ],
    pub(crate) STAT [
        /// Brake port flag
        PORTINF OFFSET(0) NUMBITS(1) [],
        /// Same-phase PWM flag
        PWMSF OFFSET(1) NUMBITS(1) [],
        /// Comparator 1 flag
        CMPF1 OFFSET(2) NUMBITS(1) [],
        /// Comparator 2 flag
        CMPF2 OFFSET(3) NUMBITS(1) [],
        /// Comparator 3 flag
        CMPF3 OFFSET(4) NUMBITS(1) [],
        /// Oscillation failure flag
        OSF OFFSET(5) NUMBITS(1) [],
        /// Real-time state of the brake port after polarity and filter
        PORTINST OFFSET(8) NUMBITS(1) [],
    ],
    pub(crate) INTEN [
        PORTINIEN OFFSET(0) NUMBITS(1) [],
        PWMSIEN OFFSET(1) NUMBITS(1) [],
        CMPIEN1 OFFSET(2) NUMBITS(1) [],
        CMPIEN2 OFFSET(3) NUMBITS(1) [],
        CMPIEN3 OFFSET(4) NUMBITS(1) [],
        OSIEN OFFSET(5) NUMBITS(1) [],
    ],
];

/// Errors from the brake driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The filter divider is outside the supported range.
    InvalidConfig,
}

/// An EMB group instance.
pub trait Instance: crate::Sealed + ClockForPeripheral {
    #[doc(hidden)]
    const INDEX: usize;
}

impl Instance for crate::EMB0 {
    const INDEX: usize = 0;
}

impl Instance for crate::EMB1 {
    const INDEX: usize = 1;
}

/// Brake sources a group can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrakeSource {
    /// Dedicated brake input pin.
    Port,
    /// Both outputs of a complementary PWM pair active at once.
    SamePhasePwm,
    /// Analog comparator 1..=3.
    Comparator(u8),
    /// Main oscillator failure detection.
    OscillatorFailure,
}

/// Polarity of the brake input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortPolarity {
    #[default]
    ActiveHigh,
    ActiveLow,
}

/// Digital filter on the brake input pin.
///
/// The pin must hold its level for several samples of PCLK divided by
/// the selected power of two before a brake fires, which rejects
/// glitches shorter than the sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilterDivider {
    Div1 = 0,
    Div8 = 1,
    Div32 = 2,
    Div128 = 3,
}

/// Static configuration of one EMB group. All sources are off by
/// default, matching the reset state of the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub port_brake: bool,
    pub port_polarity: PortPolarity,
    /// `Some` enables the digital filter on the brake port.
    pub port_filter: Option<FilterDivider>,
    pub same_phase_pwm: bool,
    /// Comparators 1..=3, index 0 is comparator 1.
    pub comparators: [bool; 3],
    pub oscillator_failure: bool,
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        // A filter without the port source never samples anything
        if self.port_filter.is_some() && !self.port_brake {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

/// Driver for one EMB group.
pub struct Emb<T: Instance> {
    _group: T,
}

impl<T: Instance> Emb<T> {
    #[inline(always)]
    fn regs(&self) -> &'static EmbRegBlock {
        // Safety: the group token is owned by this driver
        unsafe { &*((EMB_BASE + T::INDEX * EMB_STRIDE) as *const EmbRegBlock) }
    }

    /// Takes ownership of an EMB group, enables its bus clock and arms
    /// the sources selected in `config`.
    pub fn new(group: T, config: Config, cmu: &mut crate::cmu::Cmu) -> Result<Self, Error> {
        config.validate()?;
        // Safety: the group token is consumed here and gated until drop
        unsafe { group.enable_clock(&mut cmu.reg) };
        let emb = Self { _group: group };
        let polarity = match config.port_polarity {
            PortPolarity::ActiveHigh => CTL::INVSEL::ActiveHigh,
            PortPolarity::ActiveLow => CTL::INVSEL::ActiveLow,
        };
        let filter = match config.port_filter {
            Some(div) => CTL::NFEN::SET + CTL::NFSEL.val(div as u32),
            None => CTL::NFEN::CLEAR + CTL::NFSEL.val(0),
        };
        emb.regs().ctl.write(
            CTL::PORTINEN.val(config.port_brake as u32)
                + CTL::PWMSEN.val(config.same_phase_pwm as u32)
                + CTL::CMPEN1.val(config.comparators[0] as u32)
                + CTL::CMPEN2.val(config.comparators[1] as u32)
                + CTL::CMPEN3.val(config.comparators[2] as u32)
                + CTL::OSCEN.val(config.oscillator_failure as u32)
                + polarity
                + filter
                + CTL::SOFTBRK::CLEAR,
        );
        // Drop flags latched before the sources were armed
        emb.regs().statclr.write(
            STAT::PORTINF::SET
                + STAT::PWMSF::SET
                + STAT::CMPF1::SET
                + STAT::CMPF2::SET
                + STAT::CMPF3::SET
                + STAT::OSF::SET,
        );
        Ok(emb)
    }

    /// Returns whether the latched flag of `source` is raised.
    ///
    /// Comparator indices outside 1..=3 read as not raised.
    pub fn is_tripped(&self, source: BrakeSource) -> bool {
        let stat = self.regs().stat.extract();
        match source {
            BrakeSource::Port => stat.is_set(STAT::PORTINF),
            BrakeSource::SamePhasePwm => stat.is_set(STAT::PWMSF),
            BrakeSource::Comparator(1) => stat.is_set(STAT::CMPF1),
            BrakeSource::Comparator(2) => stat.is_set(STAT::CMPF2),
            BrakeSource::Comparator(3) => stat.is_set(STAT::CMPF3),
            BrakeSource::Comparator(_) => false,
            BrakeSource::OscillatorFailure => stat.is_set(STAT::OSF),
        }
    }

    /// Real-time level of the brake port after polarity and filtering.
    pub fn brake_port_active(&self) -> bool {
        self.regs().stat.is_set(STAT::PORTINST)
    }

    /// Clears the latched flag of `source`, releasing the brake if the
    /// condition itself has gone away.
    pub fn clear(&mut self, source: BrakeSource) {
        let flag = match source {
            BrakeSource::Port => STAT::PORTINF::SET,
            BrakeSource::SamePhasePwm => STAT::PWMSF::SET,
            BrakeSource::Comparator(1) => STAT::CMPF1::SET,
            BrakeSource::Comparator(2) => STAT::CMPF2::SET,
            BrakeSource::Comparator(3) => STAT::CMPF3::SET,
            BrakeSource::Comparator(_) => return,
            BrakeSource::OscillatorFailure => STAT::OSF::SET,
        };
        self.regs().statclr.write(flag);
    }

    /// Arms the interrupt of `source`.
    pub fn enable_interrupt(&mut self, source: BrakeSource) {
        if let Some(field) = Self::interrupt_field(source, true) {
            self.regs().inten.modify(field);
        }
    }

    pub fn disable_interrupt(&mut self, source: BrakeSource) {
        if let Some(field) = Self::interrupt_field(source, false) {
            self.regs().inten.modify(field);
        }
    }

    fn interrupt_field(
        source: BrakeSource,
        enable: bool,
    ) -> Option<tock_registers::fields::FieldValue<u32, INTEN::Register>> {
        let value = enable as u32;
        match source {
            BrakeSource::Port => Some(INTEN::PORTINIEN.val(value)),
            BrakeSource::SamePhasePwm => Some(INTEN::PWMSIEN.val(value)),
            BrakeSource::Comparator(1) => Some(INTEN::CMPIEN1.val(value)),
            BrakeSource::Comparator(2) => Some(INTEN::CMPIEN2.val(value)),
            BrakeSource::Comparator(3) => Some(INTEN::CMPIEN3.val(value)),
            BrakeSource::Comparator(_) => None,
            BrakeSource::OscillatorFailure => Some(INTEN::OSIEN.val(value)),
        }
    }

    /// Forces or releases the brake from software, independent of the
    /// configured hardware sources.
    pub fn software_brake(&mut self, engage: bool) {
        if engage {
            self.regs().ctl.modify(CTL::SOFTBRK::SET);
        } else {
            self.regs().ctl.modify(CTL::SOFTBRK::CLEAR);
        }
    }

    /// Releases the group token, gating its clock.
    pub fn free(self, cmu: &mut crate::cmu::Cmu) -> T {
        // Safety: the driver is consumed, no further register access
        unsafe { self._group.disable_clock(&mut cmu.reg) };
        self._group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_all_sources_off() {
        let config = Config::default();
        assert!(!config.port_brake);
        assert!(!config.same_phase_pwm);
        assert_eq!(config.comparators, [false; 3]);
        assert!(!config.oscillator_failure);
        assert!(config.port_filter.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn filter_without_port_source_is_rejected() {
        let config = Config {
            port_filter: Some(FilterDivider::Div8),
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn filter_with_port_source_is_accepted() {
        let config = Config {
            port_brake: true,
            port_filter: Some(FilterDivider::Div128),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
