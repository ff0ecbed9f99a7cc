//! Serial number format rules.

/// Placeholder reported when a device must be given a fresh serial number.
pub const NEED_SERIAL_NUMBER: &str = "-- to be assigned --";

/// Lowest per-allocator sequence number ever issued.
pub const STARTING_SERIAL_NUMBER: u32 = 0x200;

/// Highest allocator id a new-style serial number may carry.
const MAX_ALLOCATOR_ID: u32 = 0x4f;

/// A factory batch shipped with this burned-in number; it is never trusted.
const FACTORY_DUPLICATE: (u32, u32) = (0x000c, 0x036a);

/// Loose check: `prefix` (case-insensitive) and ten characters long.
pub fn has_prefix_format(prefix: &str, srn: &str) -> bool {
    srn.len() == 10
        && srn
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Strict check for allocator-issued numbers: `A-` or `B-`, four hex digits
/// of allocator id, four hex digits of sequence.
pub fn is_new_style(srn: &str) -> bool {
    if srn.len() != 10 || !srn.is_ascii() {
        return false;
    }
    let bytes = srn.as_bytes();
    if bytes[1] != b'-' || !matches!(bytes[0].to_ascii_uppercase(), b'A' | b'B') {
        return false;
    }
    let (Ok(high), Ok(low)) = (
        u32::from_str_radix(&srn[2..6], 16),
        u32::from_str_radix(&srn[6..], 16),
    ) else {
        return false;
    };
    let allocator_ok = high < MAX_ALLOCATOR_ID || (high > 0x8000 && high < (0x8000 | MAX_ALLOCATOR_ID));
    allocator_ok && (high, low) != FACTORY_DUPLICATE && low >= STARTING_SERIAL_NUMBER
}

/// A first-generation device keeps its number only if it passes both checks.
pub fn new_serial_number_needed(prefix: &str, srn: &str) -> bool {
    !has_prefix_format(prefix, srn) || !is_new_style(srn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_format() {
        assert!(has_prefix_format("B-", "b-000c0300"));
        assert!(!has_prefix_format("B-", "A-000C0300"));
        assert!(!has_prefix_format("B-", "B-000C03"));
    }

    #[test]
    fn test_new_style() {
        assert!(is_new_style("B-000C0300"));
        assert!(is_new_style("a-80100200"));
        assert!(!is_new_style("B-000C01FF"), "below starting number");
        assert!(!is_new_style("B-00500300"), "allocator id out of range");
        assert!(!is_new_style("B-000C036A"), "factory duplicate");
        assert!(!is_new_style("C-000C0300"));
        assert!(!is_new_style("B_000C0300"));
        assert!(!is_new_style("B-000G0300"));
        assert!(!is_new_style(NEED_SERIAL_NUMBER));
    }

    #[test]
    fn test_new_serial_number_needed() {
        assert!(!new_serial_number_needed("B-", "B-000C0300"));
        assert!(new_serial_number_needed("B-", "A-000C0300"));
        assert!(new_serial_number_needed("B-", "UNKNOWN"));
    }
}
