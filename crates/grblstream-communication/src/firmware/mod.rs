//! Controller firmware support
//!
//! Only GRBL is supported.

pub mod grbl;
pub mod settings;

pub use grbl::{GrblFirmwareSettings, GrblResponse, DEFAULT_WRITE_TIMEOUT};
pub use settings::{FirmwareSetting, FirmwareSettingsListener};
