use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{make_number_value, Value};

/// Seconds since the Unix epoch as a double. Installed as the `clock`
/// global at VM init.
pub fn clock_native(_args: &[Value]) -> Value {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    make_number_value(elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_number, is_number};

    #[test]
    fn test_clock_is_a_positive_number() {
        let value = clock_native(&[]);
        assert!(is_number(&value));
        assert!(as_number(&value) > 0.0);
    }

    #[test]
    fn test_clock_is_monotonic_enough() {
        let first = as_number(&clock_native(&[]));
        let second = as_number(&clock_native(&[]));
        assert!(second >= first);
    }
}
