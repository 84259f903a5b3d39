//! Lenient numeric parsing for spreadsheet cells
//!
//! Cells are read the way a browser `parseFloat` reads them: leading
//! whitespace is skipped and the longest numeric prefix wins, so `"12kg"`
//! is 12 and `"kg12"` is not a number.

use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").expect("valid regex")
});

/// Parse the numeric prefix of `s`; None when absent or not finite
pub fn parse_leading_number(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let m = LEADING_NUMBER.find(trimmed)?;
    m.as_str().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Like [`parse_leading_number`] after removing thousands separators
pub fn parse_number_loose(s: &str) -> Option<f64> {
    parse_leading_number(s.replace(',', "").trim())
}
