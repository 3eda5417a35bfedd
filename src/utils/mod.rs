//! Utility functions and helpers.

pub mod http;
#[cfg(test)]
pub(crate) mod testing;

/// Compact display form of a view count: `1234` → `1.2K`, `2500000` → `2.5M`.
pub fn format_view_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{}M", one_decimal(count as f64 / 1_000_000.0))
    } else if count >= 1_000 {
        format!("{}K", one_decimal(count as f64 / 1_000.0))
    } else {
        count.to_string()
    }
}

/// One decimal place, without a trailing `.0`.
fn one_decimal(value: f64) -> String {
    let s = format!("{:.1}", value);
    match s.strip_suffix(".0") {
        Some(whole) => whole.to_string(),
        None => s,
    }
}
