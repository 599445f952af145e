//! Extension function signature table and literal parsing (§6.4).

use crate::types::{ExtensionKind, Type};

/// A fixed extension-function signature: parameter types and a return type.
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

/// Look up the fixed signature for an extension function name. `None` means
/// the name is unrecognized — callers treat that permissively (§6.4
/// "Unknown function name -> silent Unknown result").
pub fn signature(name: &str) -> Option<Signature> {
    use Type::{Bool, Long, String as Str};
    let ip = Type::Extension(ExtensionKind::IpAddr);
    let decimal = Type::Extension(ExtensionKind::Decimal);
    let datetime = Type::Extension(ExtensionKind::DateTime);
    let duration = Type::Extension(ExtensionKind::Duration);

    let (params, ret) = match name {
        "ip" | "ipaddr" => (vec![Str], ip.clone()),
        "isIpv4" | "isIpv6" | "isLoopback" | "isMulticast" => (vec![ip.clone()], Bool),
        "isInRange" => (vec![ip.clone(), ip.clone()], Bool),
        "decimal" => (vec![Str], decimal.clone()),
        "lessThan" | "lessThanOrEqual" | "greaterThan" | "greaterThanOrEqual" => {
            (vec![decimal.clone(), decimal.clone()], Bool)
        }
        "datetime" => (vec![Str], datetime.clone()),
        "duration" => (vec![Str], duration.clone()),
        "offset" => (vec![datetime.clone(), duration.clone()], datetime.clone()),
        "durationSince" => (vec![datetime.clone(), datetime.clone()], duration.clone()),
        "toDate" | "toTime" => (vec![datetime.clone()], datetime.clone()),
        "toDays" | "toHours" | "toMinutes" | "toSeconds" | "toMilliseconds" => {
            (vec![duration.clone()], Long)
        }
        _ => return None,
    };
    Some(Signature { params, ret })
}

/// Is `name` one of the four literal-parsing constructors?
pub fn constructor_kind(name: &str) -> Option<ExtensionKind> {
    match name {
        "ip" | "ipaddr" => Some(ExtensionKind::IpAddr),
        "decimal" => Some(ExtensionKind::Decimal),
        "datetime" => Some(ExtensionKind::DateTime),
        "duration" => Some(ExtensionKind::Duration),
        _ => None,
    }
}

/// Structurally validate a literal string for the given extension kind
/// (§6.4 "literal is parsed eagerly; parse failure emits `invalid_literal`").
pub fn parse_literal(kind: ExtensionKind, text: &str) -> bool {
    match kind {
        ExtensionKind::IpAddr => parse_ipaddr(text),
        ExtensionKind::Decimal => parse_decimal(text),
        ExtensionKind::DateTime => parse_datetime(text),
        ExtensionKind::Duration => parse_duration(text),
    }
}

fn parse_ipaddr(text: &str) -> bool {
    let (addr, prefix) = match text.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (text, None),
    };
    let Ok(parsed) = addr.parse::<std::net::IpAddr>() else {
        return false;
    };
    match prefix {
        None => true,
        Some(p) => {
            let Ok(bits) = p.parse::<u8>() else {
                return false;
            };
            match parsed {
                std::net::IpAddr::V4(_) => bits <= 32,
                std::net::IpAddr::V6(_) => bits <= 128,
            }
        }
    }
}

/// Decimal extension literal: an optional sign, one or more digits, a `.`,
/// and one to four fractional digits.
fn parse_decimal(text: &str) -> bool {
    let text = text.strip_prefix('-').unwrap_or(text);
    let Some((int_part, frac_part)) = text.split_once('.') else {
        return false;
    };
    !int_part.is_empty()
        && int_part.chars().all(|c| c.is_ascii_digit())
        && (1..=4).contains(&frac_part.len())
        && frac_part.chars().all(|c| c.is_ascii_digit())
}

/// Datetime extension literal: `YYYY-MM-DDTHH:MM:SS` with an optional
/// `.sss` fraction, followed by `Z` or a `+HH:MM`/`-HH:MM` offset.
fn parse_datetime(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() < 19 {
        return false;
    }
    let digits = |r: std::ops::Range<usize>| text[r].bytes().all(|b| b.is_ascii_digit());
    let date_ok = digits(0..4)
        && bytes[4] == b'-'
        && digits(5..7)
        && bytes[7] == b'-'
        && digits(8..10)
        && bytes[10] == b'T'
        && digits(11..13)
        && bytes[13] == b':'
        && digits(14..16)
        && bytes[16] == b':'
        && digits(17..19);
    if !date_ok {
        return false;
    }
    let rest = &text[19..];
    if rest == "Z" {
        return true;
    }
    let rest = rest.strip_prefix('.').map_or(rest, |frac| {
        match frac.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => &frac[idx..],
            None => "",
        }
    });
    match rest.as_bytes().first() {
        Some(b'Z') if rest.len() == 1 => true,
        Some(b'+') | Some(b'-') => {
            rest.len() == 6
                && rest.as_bytes()[3] == b':'
                && rest[1..3].bytes().all(|b| b.is_ascii_digit())
                && rest[4..6].bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

/// Duration extension literal: an optional leading `-`, then one or more
/// `<integer><unit>` segments with units from `d`, `h`, `m`, `s`, `ms`.
fn parse_duration(text: &str) -> bool {
    let text = text.strip_prefix('-').unwrap_or(text);
    if text.is_empty() {
        return false;
    }
    let mut rest = text;
    let mut saw_segment = false;
    while !rest.is_empty() {
        let digit_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digit_end == 0 {
            return false;
        }
        let (_, tail) = rest.split_at(digit_end);
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let unit = &tail[..unit_end];
        if !matches!(unit, "d" | "h" | "m" | "s" | "ms") {
            return false;
        }
        saw_segment = true;
        rest = &tail[unit_end..];
    }
    saw_segment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipaddr_accepts_v4_v6_and_cidr() {
        assert!(parse_ipaddr("127.0.0.1"));
        assert!(parse_ipaddr("::1"));
        assert!(parse_ipaddr("10.0.0.0/8"));
        assert!(!parse_ipaddr("not-an-ip"));
        assert!(!parse_ipaddr("10.0.0.0/99"));
    }

    #[test]
    fn decimal_requires_fractional_digits() {
        assert!(parse_decimal("1.5"));
        assert!(parse_decimal("-12.3456"));
        assert!(!parse_decimal("1"));
        assert!(!parse_decimal("1.23456"));
        assert!(!parse_decimal("abc"));
    }

    #[test]
    fn datetime_accepts_z_and_offset() {
        assert!(parse_datetime("2024-01-01T00:00:00Z"));
        assert!(parse_datetime("2024-01-01T00:00:00.123Z"));
        assert!(parse_datetime("2024-01-01T00:00:00+01:00"));
        assert!(!parse_datetime("not-a-datetime"));
    }

    #[test]
    fn duration_accepts_compound_units() {
        assert!(parse_duration("1d2h3m4s5ms"));
        assert!(parse_duration("-10s"));
        assert!(!parse_duration("10x"));
        assert!(!parse_duration(""));
    }

    #[test]
    fn signature_lookup_covers_table() {
        assert!(signature("isIpv4").is_some());
        assert!(signature("nonexistent").is_none());
        assert_eq!(constructor_kind("ip"), Some(ExtensionKind::IpAddr));
        assert_eq!(constructor_kind("isIpv4"), None);
    }
}
