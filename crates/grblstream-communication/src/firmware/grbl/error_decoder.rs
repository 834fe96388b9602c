//! GRBL error and alarm code descriptions
//!
//! Descriptions follow the GRBL 1.1 numbering. Unknown codes yield `None`.

/// Short description of a GRBL `error:N` code
pub fn error_description(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Expected command letter",
        2 => "Bad number format",
        3 => "Invalid '$' system command",
        4 => "Negative value",
        5 => "Homing not enabled",
        6 => "Step pulse below 3 usec",
        7 => "EEPROM read failed, defaults restored",
        8 => "'$' command requires Idle state",
        9 => "G-code locked out during alarm or jog",
        10 => "Soft limits require homing",
        11 => "Line overflow",
        12 => "Step rate exceeds maximum",
        13 => "Safety door opened",
        14 => "Build info or startup line too long",
        15 => "Jog target exceeds travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported G-code command",
        21 => "Modal group violation",
        22 => "Undefined feed rate",
        23 => "Command requires an integer value",
        24 => "Multiple axis-word commands in block",
        25 => "Repeated G-code word",
        26 => "Missing axis words",
        27 => "Line number out of range",
        28 => "Missing P or L value word",
        29 => "Unsupported work coordinate system",
        30 => "G53 requires G0 or G1",
        31 => "Unused axis words with G80",
        32 => "Arc has no axis words in plane",
        33 => "Invalid motion target",
        34 => "Arc radius error",
        35 => "Arc missing IJK offset",
        36 => "Unused G-code words",
        37 => "Tool length offset axis mismatch",
        38 => "Tool number exceeds maximum",
        _ => return None,
    };
    Some(text)
}

/// Short description of a GRBL `ALARM:N` code
pub fn alarm_description(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Hard limit triggered",
        2 => "Soft limit exceeded",
        3 => "Reset while in motion",
        4 => "Probe not in expected initial state",
        5 => "Probe did not contact the workpiece",
        6 => "Homing reset",
        7 => "Safety door opened during homing",
        8 => "Homing pull-off failed to clear limit switch",
        9 => "Homing could not find limit switch",
        _ => return None,
    };
    Some(text)
}
