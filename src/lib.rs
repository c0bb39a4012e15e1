//! # Hardware Abstraction Layer for HC32M423 Microcontrollers
//!
//! The register layout of the HC32M423 is defined in this crate (there is no
//! published peripheral access crate for this part), one register block per
//! peripheral module. Ownership of the hardware is handed out once per boot
//! through [`Peripherals::take`], and every driver consumes the matching
//! token from it.
#![cfg_attr(not(test), no_std)]

/// Entry point for the runtime application.
#[cfg(feature = "rt")]
pub use cortex_m_rt::entry;

mod private {
    pub trait Sealed {}
}
use private::Sealed;

pub mod board;
pub mod cmu;
pub mod efm;
pub mod emb;
pub mod gpio;
pub mod timer_a;

use core::sync::atomic::{AtomicBool, Ordering};

macro_rules! peripheral_tokens {
    ($($(#[$doc:meta])* $NAME:ident: $field:ident,)+) => {
        $(
            $(#[$doc])*
            pub struct $NAME {
                _private: (),
            }
        )+

        /// All ownable peripheral instances of the device.
        pub struct Peripherals {
            $(
                $(#[$doc])*
                pub $field: $NAME,
            )+
        }

        impl Peripherals {
            /// Unchecked version of [`Peripherals::take`].
            ///
            /// ## Safety
            /// Each peripheral instance must only be used from one place at a
            /// time. Calling this while tokens from an earlier `take` or
            /// `steal` are live aliases the hardware.
            pub unsafe fn steal() -> Self {
                Peripherals {
                    $($field: $NAME { _private: () },)+
                }
            }
        }
    };
}

peripheral_tokens! {
    /// Clock Management Unit
    CMU: cmu,
    /// Embedded Flash Module
    EFM: efm,
    /// GPIO port controller
    PORT: port,
    /// Timer unit A, instance 1
    TMRA1: tmra1,
    /// Timer unit A, instance 2
    TMRA2: tmra2,
    /// Timer unit A, instance 3
    TMRA3: tmra3,
    /// Timer unit A, instance 4
    TMRA4: tmra4,
    /// Emergency brake group 0 (TMR4-class outputs)
    EMB0: emb0,
    /// Emergency brake group 1 (TMRA outputs)
    EMB1: emb1,
}

static PERIPHERALS_TAKEN: AtomicBool = AtomicBool::new(false);

impl Peripherals {
    /// Returns the device peripherals the first time it is called and `None`
    /// afterwards.
    pub fn take() -> Option<Self> {
        cortex_m::interrupt::free(|_| {
            if PERIPHERALS_TAKEN.load(Ordering::Relaxed) {
                None
            } else {
                PERIPHERALS_TAKEN.store(true, Ordering::Relaxed);
                Some(unsafe { Peripherals::steal() })
            }
        })
    }
}
