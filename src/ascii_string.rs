//! SRC ASCII reference-string construction and sanitization.

/// Total on-wire size of the SRC ASCII string field.
pub const ASCII_STRING_SIZE: usize = 32;

/// Builds the `TT SS RRRR` (8 significant characters, space padded to 32)
/// ASCII string. `src_type` is written verbatim (e.g. `"BD"`, `"11"`,
/// `"BC"`); `subsystem` is the two hex digits for the subsystem byte, or
/// `"00"` for non-BMC error types; `reason_code` is formatted as 4
/// upper-case hex digits.
pub fn build(src_type: &str, subsystem_byte: u8, reason_code: u16, zero_subsystem: bool) -> String {
    let subsystem = if zero_subsystem {
        "00".to_string()
    } else {
        format!("{:02X}", subsystem_byte)
    };
    let head = format!("{}{}{:04X}", src_type, subsystem, reason_code);
    let mut s = head;
    s.truncate(8);
    while s.len() < ASCII_STRING_SIZE {
        s.push(' ');
    }
    s
}

/// Replaces any byte that is not alphanumeric, space, `.`, `:`, or `/`
/// with a space, as required on unflatten.
pub fn sanitize(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| {
            let c = b as char;
            if c.is_ascii_alphanumeric() || c == ' ' || c == '.' || c == ':' || c == '/' {
                c
            } else {
                ' '
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_bmc_ascii_string() {
        // Registry entry with src.type=0xBD, reason_code=0xABCD, subsystem=0x37
        let s = build("BD", 0x37, 0xABCD, false);
        assert_eq!(s, "BD37ABCD                        ");
        assert_eq!(s.len(), 32);
    }

    #[test]
    fn s2_power_error_zeroes_subsystem() {
        let s = build("11", 0x37, 0xABCD, true);
        assert!(s.starts_with("1100ABCD"));
    }

    #[test]
    fn sanitize_replaces_non_printable() {
        let raw = b"BD37\x01\x02CD  ".to_vec();
        let s = sanitize(&raw);
        assert_eq!(s, "BD37  CD  ");
    }
}
