//! Civil date parsing for observation feeds.
//!
//! Dates are calendar days with no time zone. Feeds use either ISO
//! `YYYY-MM-DD` or the CDEC export style `MM/DD/YYYY`.

use chrono::NaiveDate;

/// ISO calendar date, the canonical form everywhere downstream of the normalizer.
pub const ISO_FORMAT: &str = "%Y-%m-%d";

/// Date format used by the reservoir CSV exports: "MM/DD/YYYY"
pub const US_FORMAT: &str = "%m/%d/%Y";

/// Format a NaiveDate as "YYYY-MM-DD"
pub fn format_date(date: &NaiveDate) -> String {
    date.format(ISO_FORMAT).to_string()
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Exactly `dddd-dd-dd`. chrono alone would take signs and short fields.
fn is_iso_shaped(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && all_digits(&s[0..4])
        && all_digits(&s[5..7])
        && all_digits(&s[8..10])
}

/// One or two digit month and day, four digit year.
fn is_us_shaped(s: &str) -> bool {
    let mut parts = s.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(d), Some(y), None) => {
            all_digits(m)
                && m.len() <= 2
                && all_digits(d)
                && d.len() <= 2
                && all_digits(y)
                && y.len() == 4
        }
        _ => false,
    }
}

/// Parse a date string, trying ISO first and then "MM/DD/YYYY".
///
/// Returns `None` for anything else, including ISO strings carrying a time
/// component and years that are not four digits.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if is_iso_shaped(s) {
        if let Ok(date) = NaiveDate::parse_from_str(s, ISO_FORMAT) {
            return Some(date);
        }
    }
    if is_us_shaped(s) {
        return NaiveDate::parse_from_str(s, US_FORMAT).ok();
    }
    None
}
