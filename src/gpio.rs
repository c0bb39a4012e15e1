//! General Purpose Input/Output (PORT)
//!
//! Each pin carries a 16-bit configuration register (PCR) and a function
//! select register (PFSR); the per-port data registers provide atomic
//! set/reset/toggle access so output writes never race between pins.
use core::marker::PhantomData;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin, StatefulOutputPin};
use paste::paste;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

const PORT_BASE: usize = 0x4004_9800;
const PIN_CFG_OFFSET: usize = 0x400;
const PWPR_OFFSET: usize = 0x3FC;

register_structs! {
    /// Data registers of one port.
    pub PortDataRegBlock {
        /// Input data
        (0x00 => pidr: ReadOnly<u16>),
        (0x02 => _reserved0),
        /// Output data
        (0x04 => podr: ReadWrite<u16>),
        (0x06 => _reserved1),
        /// Output set, atomic
        (0x08 => posr: WriteOnly<u16>),
        (0x0A => _reserved2),
        /// Output reset, atomic
        (0x0C => porr: WriteOnly<u16>),
        (0x0E => _reserved3),
        /// Output toggle, atomic
        (0x10 => potr: WriteOnly<u16>),
        (0x12 => _reserved4),
        (0x20 => @END),
    },

    /// Configuration registers of one pin.
    pub PinCfgRegBlock {
        (0x00 => pcr: ReadWrite<u16, PCR::Register>),
        (0x02 => pfsr: ReadWrite<u16, PFSR::Register>),
        (0x04 => @END),
    },

    /// Port write protection.
    pub PortCommonRegBlock {
        (0x00 => pwpr: ReadWrite<u16, PWPR::Register>),
        (0x02 => @END),
    }
}

register_bitfields![u16,
    pub(crate) PCR [
        /// Output enable
        POUTE OFFSET(1) NUMBITS(1) [],
        /// Open drain output
        NOD OFFSET(2) NUMBITS(1) [],
        /// Internal pull-up
        PUU OFFSET(6) NUMBITS(1) [],
        /// Input state of the pad
        PIN OFFSET(8) NUMBITS(1) [],
        /// External interrupt enable
        INTE OFFSET(12) NUMBITS(1) [],
        /// Digital circuit disable (analog mode)
        DDIS OFFSET(14) NUMBITS(1) [],
    ],
    pub(crate) PFSR [
        /// Alternate function select
        FSEL OFFSET(0) NUMBITS(3) [],
    ],
    pub(crate) PWPR [
        /// Write enable for the pin configuration registers
        WE OFFSET(0) NUMBITS(1) [],
        /// Protection password, must be 0xA5
        WP OFFSET(8) NUMBITS(8) [],
    ],
];

const PWPR_KEY: u16 = 0xA5;

#[inline(always)]
const fn port_data_ptr<const P: u8>() -> *const PortDataRegBlock {
    (PORT_BASE + P as usize * 0x20) as *const PortDataRegBlock
}

#[inline(always)]
const fn pin_cfg_ptr<const P: u8, const N: u8>() -> *const PinCfgRegBlock {
    (PORT_BASE + PIN_CFG_OFFSET + (P as usize * 16 + N as usize) * 4) as *const PinCfgRegBlock
}

#[inline(always)]
fn common_regs() -> &'static PortCommonRegBlock {
    // Safety: concurrent access to the protection register is only done
    // around pin configuration, which happens on owned pins
    unsafe { &*((PORT_BASE + PWPR_OFFSET) as *const PortCommonRegBlock) }
}

fn unlock_cfg() {
    common_regs()
        .pwpr
        .write(PWPR::WP.val(PWPR_KEY) + PWPR::WE::SET);
}

fn lock_cfg() {
    common_regs()
        .pwpr
        .write(PWPR::WP.val(PWPR_KEY) + PWPR::WE::CLEAR);
}

/// Marker trait for GPIO pin modes.
pub trait PinMode: crate::Sealed {}

/// Digital input (reset state).
pub struct Input;
/// Digital output, push-pull or open drain.
pub struct Output;
/// Analog mode, digital circuit disabled.
pub struct Analog;
/// Alternate function `F` (0..=7).
pub struct Alternate<const F: u8>;

impl crate::Sealed for Input {}
impl crate::Sealed for Output {}
impl crate::Sealed for Analog {}
impl<const F: u8> crate::Sealed for Alternate<F> {}

impl PinMode for Input {}
impl PinMode for Output {}
impl PinMode for Analog {}
impl<const F: u8> PinMode for Alternate<F> {}

/// Zero-sized abstraction type for a GPIO pin.
///
/// Traits from [`embedded_hal::digital`] are also implemented for each pin.
///
/// - `P` is the port index (`0` for port A, `1` for port B, ...)
/// - `N` is the pin number within the port.
/// - `MODE` is one of [`Input`], [`Output`], [`Analog`], [`Alternate`].
pub struct Pin<const P: u8, const N: u8, MODE: PinMode = Input> {
    _mode: PhantomData<MODE>,
}

/// Default methods that work across all pin modes.
impl<const P: u8, const N: u8, MODE: PinMode> Pin<P, N, MODE> {
    const fn new() -> Self {
        Self { _mode: PhantomData }
    }

    #[doc(hidden)]
    #[inline(always)]
    fn cfg(&self) -> &'static PinCfgRegBlock {
        // Safety: each PCR/PFSR pair belongs to exactly one owned pin
        unsafe { &*pin_cfg_ptr::<P, N>() }
    }

    #[doc(hidden)]
    #[inline(always)]
    fn data(&self) -> &'static PortDataRegBlock {
        // Safety: writes go through the atomic set/reset/toggle registers
        unsafe { &*port_data_ptr::<P>() }
    }

    #[doc(hidden)]
    #[inline(always)]
    fn _is_high(&self) -> bool {
        self.data().pidr.get() & (1 << N) != 0
    }

    #[doc(hidden)]
    #[inline(always)]
    fn _is_low(&self) -> bool {
        self.data().pidr.get() & (1 << N) == 0
    }

    #[doc(hidden)]
    #[inline(always)]
    fn _set_high(&mut self) {
        self.data().posr.set(1 << N);
    }

    #[doc(hidden)]
    #[inline(always)]
    fn _set_low(&mut self) {
        self.data().porr.set(1 << N);
    }

    #[doc(hidden)]
    #[inline(always)]
    fn _toggle(&mut self) {
        self.data().potr.set(1 << N);
    }

    #[doc(hidden)]
    #[inline(always)]
    fn _is_set_high(&self) -> bool {
        self.data().podr.get() & (1 << N) != 0
    }

    #[doc(hidden)]
    #[inline(always)]
    fn _is_set_low(&self) -> bool {
        self.data().podr.get() & (1 << N) == 0
    }

    /// Configures the pin as a floating digital input.
    pub fn into_floating_input(self) -> Pin<P, N, Input> {
        unlock_cfg();
        self.cfg()
            .pcr
            .modify(PCR::DDIS::CLEAR + PCR::POUTE::CLEAR + PCR::PUU::CLEAR);
        lock_cfg();
        Pin::new()
    }

    /// Configures the pin as a digital input with the internal pull-up.
    pub fn into_pull_up_input(self) -> Pin<P, N, Input> {
        unlock_cfg();
        self.cfg()
            .pcr
            .modify(PCR::DDIS::CLEAR + PCR::POUTE::CLEAR + PCR::PUU::SET);
        lock_cfg();
        Pin::new()
    }

    /// Configures the pin as a push-pull output.
    pub fn into_push_pull_output(self) -> Pin<P, N, Output> {
        unlock_cfg();
        self.cfg()
            .pcr
            .modify(PCR::DDIS::CLEAR + PCR::NOD::CLEAR + PCR::POUTE::SET);
        lock_cfg();
        Pin::new()
    }

    /// Configures the pin as an open-drain output.
    pub fn into_open_drain_output(self) -> Pin<P, N, Output> {
        unlock_cfg();
        self.cfg()
            .pcr
            .modify(PCR::DDIS::CLEAR + PCR::NOD::SET + PCR::POUTE::SET);
        lock_cfg();
        Pin::new()
    }

    /// Disables the digital circuit of the pad.
    pub fn into_analog(self) -> Pin<P, N, Analog> {
        unlock_cfg();
        self.cfg().pcr.modify(PCR::DDIS::SET + PCR::POUTE::CLEAR);
        lock_cfg();
        Pin::new()
    }

    /// Routes the pin to alternate function `F`.
    pub fn into_alternate<const F: u8>(self) -> Pin<P, N, Alternate<F>> {
        unlock_cfg();
        self.cfg().pfsr.write(PFSR::FSEL.val(F as u16 & 0b111));
        self.cfg()
            .pcr
            .modify(PCR::DDIS::CLEAR + PCR::POUTE::CLEAR);
        lock_cfg();
        Pin::new()
    }

    /// Returns [`true`] if the pad is high, [`false`] if it is low.
    #[inline(always)]
    pub fn is_high(&self) -> bool {
        self._is_high()
    }

    /// Returns [`true`] if the pad is low, [`false`] if it is high.
    #[inline(always)]
    pub fn is_low(&self) -> bool {
        self._is_low()
    }
}

/// Methods for input pins.
impl<const P: u8, const N: u8> Pin<P, N, Input> {
    /// Arms the external interrupt of this pin.
    pub fn enable_interrupt(&mut self) {
        unlock_cfg();
        self.cfg().pcr.modify(PCR::INTE::SET);
        lock_cfg();
    }

    pub fn disable_interrupt(&mut self) {
        unlock_cfg();
        self.cfg().pcr.modify(PCR::INTE::CLEAR);
        lock_cfg();
    }
}

/// Methods for output pins.
impl<const P: u8, const N: u8> Pin<P, N, Output> {
    /// Sets the pin high.
    #[inline(always)]
    pub fn set_high(&mut self) {
        self._set_high();
    }

    /// Sets the pin low.
    #[inline(always)]
    pub fn set_low(&mut self) {
        self._set_low();
    }

    /// Toggles the pin through the hardware toggle register.
    #[inline(always)]
    pub fn toggle(&mut self) {
        self._toggle();
    }

    /// Returns [`true`] if the output latch is high.
    #[inline(always)]
    pub fn is_set_high(&self) -> bool {
        self._is_set_high()
    }

    /// Returns [`true`] if the output latch is low.
    #[inline(always)]
    pub fn is_set_low(&self) -> bool {
        self._is_set_low()
    }
}

/// embedded-hal ErrorType trait
impl<const P: u8, const N: u8, MODE: PinMode> ErrorType for Pin<P, N, MODE> {
    type Error = core::convert::Infallible;
}

/// embedded-hal InputPin trait
impl<const P: u8, const N: u8, MODE: PinMode> InputPin for Pin<P, N, MODE> {
    #[inline(always)]
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self._is_high())
    }

    #[inline(always)]
    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self._is_low())
    }
}

/// embedded-hal OutputPin trait
impl<const P: u8, const N: u8> OutputPin for Pin<P, N, Output> {
    #[inline(always)]
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self._set_high();
        Ok(())
    }

    #[inline(always)]
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self._set_low();
        Ok(())
    }
}

/// embedded-hal StatefulOutputPin trait
impl<const P: u8, const N: u8> StatefulOutputPin for Pin<P, N, Output> {
    #[inline(always)]
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self._is_set_high())
    }

    #[inline(always)]
    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self._is_set_low())
    }
}

/// Macro that generates a port module with its pin types and `Parts`.
///
/// - `$MODULE`: the name of the module to be generated (e.g., `porta`).
/// - `$LETTER`: the port letter used in pin names (e.g., `a`).
/// - `$PORT_NUM`: the port index (e.g., `0` for port A).
/// - `[$($PIN_NUM:literal),*]`: the pins bonded out on this package.
macro_rules! gpio {
    ($MODULE:ident, $LETTER:ident, $PORT_NUM:expr, [$($PIN_NUM:literal),*]) => {
        paste! {
            pub mod $MODULE {
                /// Collection of GPIO pins from a single port.
                pub struct Parts {
                    $(
                        pub [<p $LETTER $PIN_NUM>]: [<P $LETTER:upper $PIN_NUM>],
                    )+
                }

                impl Parts {
                    pub(crate) const fn new() -> Self {
                        Parts {
                            $(
                                [<p $LETTER $PIN_NUM>]: super::Pin::new(),
                            )+
                        }
                    }
                }

                // Creates a zero-sized type for each pin
                $(
                    #[doc=stringify!([<P $LETTER:upper $PIN_NUM>])]
                    #[doc=" pin"]
                    pub type [<P $LETTER:upper $PIN_NUM>] = super::Pin<$PORT_NUM, $PIN_NUM>;
                )+
            }
        }
    };
}

gpio!(porta, a, 0, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
gpio!(portb, b, 1, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
gpio!(portc, c, 2, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]);
gpio!(portd, d, 3, [0, 1, 2, 3, 4, 5, 6, 7]);

/// # General Purpose Input/Output (PORT) Peripheral
///
/// ## Example
/// ```no_run
/// use hc32m423_hal as hal;
/// let p = hal::Peripherals::take().unwrap();
/// let pins = hal::gpio::Port::new(p.port).split();
/// // Set up pins for LED control/output
/// let mut led_red = pins.a.pa4.into_push_pull_output();
/// let mut led_green = pins.a.pa5.into_push_pull_output();
/// // Set up a key input with the internal pull-up
/// let key1 = pins.b.pb1.into_pull_up_input();
/// ```
pub struct Port {
    _port: crate::PORT,
}

/// All pins of the device, one `Parts` per port.
pub struct Parts {
    pub a: porta::Parts,
    pub b: portb::Parts,
    pub c: portc::Parts,
    pub d: portd::Parts,
}

impl Port {
    /// Constructs the GPIO peripheral. The PORT block has no FCG gate,
    /// register writes are opened per configuration access instead.
    pub fn new(port: crate::PORT) -> Self {
        Self { _port: port }
    }

    /// Splits the peripheral into independent pins.
    pub fn split(self) -> Parts {
        Parts {
            a: porta::Parts::new(),
            b: portb::Parts::new(),
            c: portc::Parts::new(),
            d: portd::Parts::new(),
        }
    }
}
