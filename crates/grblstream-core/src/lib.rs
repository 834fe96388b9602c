//! # grblstream Core
//!
//! Core types and utilities shared by the grblstream crates.
//! Provides the error taxonomy, axis and unit models, and the
//! locale-independent decimal formatting used for controller settings.

pub mod data;
pub mod error;
pub mod units;

pub use data::{Axis, Units};

pub use error::{ConnectionError, Error, FirmwareError, Result, StreamError};

pub use units::{format_setting_decimal, parse_setting_number};
