//! Board support for the LQFP64 evaluation board.
//!
//! Thin wrappers over [`crate::gpio`] for the on-board user LEDs and
//! keys. Both LEDs sit between the pin and VCC, so driving the pin low
//! turns the LED on.
//!
//! ## Example
//! ```no_run
//! use hc32m423_hal as hal;
//! let p = hal::Peripherals::take().unwrap();
//! let pins = hal::gpio::Port::new(p.port).split();
//! let mut leds = hal::board::Leds::new(pins.a.pa4, pins.a.pa5);
//! let keys = hal::board::Keys::new(pins.b.pb1, pins.b.pb2);
//!
//! leds.red.on();
//! if keys.key1.is_pressed() {
//!     leds.green.toggle();
//! }
//! ```
use crate::gpio::{porta, portb, Input, Output, Pin};

/// An active-low LED.
pub struct Led<const P: u8, const N: u8> {
    pin: Pin<P, N, Output>,
}

impl<const P: u8, const N: u8> Led<P, N> {
    /// Turns the LED on by pulling the pin low.
    pub fn on(&mut self) {
        self.pin.set_low();
    }

    /// Turns the LED off.
    pub fn off(&mut self) {
        self.pin.set_high();
    }

    /// Flips the LED state through the hardware toggle register.
    pub fn toggle(&mut self) {
        self.pin.toggle();
    }

    /// Returns whether the LED is currently lit.
    pub fn is_on(&self) -> bool {
        self.pin.is_set_low()
    }
}

/// The red LED on PA4.
pub type RedLed = Led<0, 4>;
/// The green LED on PA5.
pub type GreenLed = Led<0, 5>;

/// Both user LEDs, off after construction.
pub struct Leds {
    pub red: RedLed,
    pub green: GreenLed,
}

impl Leds {
    pub fn new(pa4: porta::PA4, pa5: porta::PA5) -> Self {
        let mut red = Led {
            pin: pa4.into_push_pull_output(),
        };
        let mut green = Led {
            pin: pa5.into_push_pull_output(),
        };
        red.off();
        green.off();
        Leds { red, green }
    }
}

/// An active-low key with the internal pull-up enabled.
pub struct Key<const P: u8, const N: u8> {
    pin: Pin<P, N, Input>,
}

impl<const P: u8, const N: u8> Key<P, N> {
    /// Returns whether the key is held down.
    ///
    /// No debouncing, a pressed key may bounce for a few milliseconds.
    pub fn is_pressed(&self) -> bool {
        self.pin.is_low()
    }
}

/// KEY1 on PB1.
pub type Key1 = Key<1, 1>;
/// KEY2 on PB2.
pub type Key2 = Key<1, 2>;

/// Both user keys.
pub struct Keys {
    pub key1: Key1,
    pub key2: Key2,
}

impl Keys {
    pub fn new(pb1: portb::PB1, pb2: portb::PB2) -> Self {
        Keys {
            key1: Key {
                pin: pb1.into_pull_up_input(),
            },
            key2: Key {
                pin: pb2.into_pull_up_input(),
            },
        }
    }
}
