//! Utilities shared by the Kizuna crates: logging setup and clocks.

pub mod logger;
pub mod time;
