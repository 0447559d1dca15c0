//! This file ensures that defmt is optional, providing stubs if it's not available

#![macro_use]
#![allow(unused_macros)]

#[cfg(feature = "defmt")]
pub use defmt::{bitflags, debug, error, info, warn};

#[cfg(not(feature = "defmt"))]
pub use bitflags::bitflags;

#[cfg(not(feature = "defmt"))]
macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        let _ = ($(&$x),*);
    }};
}

#[cfg(not(feature = "defmt"))]
macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        let _ = ($(&$x),*);
    }};
}

#[cfg(not(feature = "defmt"))]
macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        let _ = ($(&$x),*);
    }};
}

#[cfg(not(feature = "defmt"))]
macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        let _ = ($(&$x),*);
    }};
}
