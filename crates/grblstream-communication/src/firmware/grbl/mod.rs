//! GRBL firmware
//!
//! Response classification, error code descriptions and the `$n`
//! settings store.

pub mod error_decoder;
pub mod response_parser;
pub mod settings;

pub use error_decoder::{alarm_description, error_description};
pub use response_parser::{is_ok_error_response, parse_setting_report, GrblResponse, SettingReport};
pub use settings::{GrblFirmwareSettings, DEFAULT_WRITE_TIMEOUT};
