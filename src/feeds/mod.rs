//! Payload parsers for every upstream source.
//!
//! Parsers are pure and never fail loudly: anything malformed comes back as
//! `None` and the caller logs it at debug level and drops it.

pub mod binance;
pub mod sensors;
pub mod stocks;
pub mod weather;

use serde_json::Value;

/// Numeric field that may arrive as a JSON number or a numeric string.
pub(crate) fn num(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn num_accepts_numbers_and_numeric_strings() {
        assert_eq!(num(&json!(1.5)), Some(1.5));
        assert_eq!(num(&json!("42.10")), Some(42.1));
        assert_eq!(num(&json!("abc")), None);
        assert_eq!(num(&json!(null)), None);
        assert_eq!(num(&json!("NaN")), None);
    }
}
