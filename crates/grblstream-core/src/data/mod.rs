//! Data models shared across the workspace
//!
//! This module provides:
//! - Machine axes addressed by per-axis controller settings
//! - Unit management (MM, INCH) as reported by the controller

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine coordinate units (millimeters or inches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    /// Millimeters (metric)
    MM,
    /// Inches (imperial)
    INCH,
    /// Unknown or uninitialized
    Unknown,
}

impl Units {
    /// Decode GRBL's "report in inches" flag
    ///
    /// `"0"` reports millimeters, `"1"` inches; anything else is unknown.
    pub fn from_report_inches_flag(value: &str) -> Self {
        match value {
            "0" => Units::MM,
            "1" => Units::INCH,
            _ => Units::Unknown,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::MM => write!(f, "mm"),
            Units::INCH => write!(f, "in"),
            Units::Unknown => write!(f, "unknown"),
        }
    }
}

/// Linear machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
}

impl Axis {
    /// All linear axes in controller order
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Bit of this axis in GRBL's per-axis invert masks
    pub fn mask_bit(self) -> u32 {
        match self {
            Axis::X => 0b001,
            Axis::Y => 0b010,
            Axis::Z => 0b100,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
        }
    }
}
