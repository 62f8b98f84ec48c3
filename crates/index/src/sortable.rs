//! Order-preserving encoding of range index values
//!
//! Range keys must sort in value order under plain byte comparison:
//!
//! - numbers: `n` + 16 hex digits of the IEEE-754 bits, sign-flipped so that
//!   negative values sort below positive ones, then 4 hex digits holding
//!   the exact distance of an integer from that double. Integers beyond
//!   2^53 keep their order, and an integer equal to a double gets the same
//!   key.
//! - strings: `s` + lowercase hex of the UTF-8 bytes
//!
//! Hex output never contains the key separator, so no escaping is needed
//! and escaping cannot disturb the order. All numbers sort before all
//! strings.

use mosaic_core::FieldValue;

// Rounding an i64 to f64 is off by at most 1024
const RESIDUAL_BIAS: i32 = 0x8000;

fn encode_number(approx: f64, residual: i32) -> String {
    // Collapse -0.0 onto 0.0
    let v = if approx == 0.0 { 0.0 } else { approx };
    let bits = v.to_bits();
    let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    format!("n{:016x}{:04x}", ordered, residual + RESIDUAL_BIAS)
}

/// Encode a finite-or-infinite f64
pub fn encode_f64(v: f64) -> String {
    encode_number(v, 0)
}

/// Encode an i64 exactly
pub fn encode_i64(i: i64) -> String {
    let approx = i as f64;
    // Integral and at most 2^63 in magnitude, so the cast back is exact
    let residual = i128::from(i) - approx as i128;
    encode_number(approx, residual as i32)
}

/// Encode a string
pub fn encode_str(s: &str) -> String {
    let mut out = String::with_capacity(1 + s.len() * 2);
    out.push('s');
    for b in s.as_bytes() {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Encode a field value; `None` for kinds that have no order (null, NaN,
/// vectors, binary)
pub fn encode_value(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Int(i) => Some(encode_i64(*i)),
        FieldValue::Double(d) if !d.is_nan() => Some(encode_f64(*d)),
        FieldValue::Bool(b) => Some(encode_f64(if *b { 1.0 } else { 0.0 })),
        FieldValue::String(s) => Some(encode_str(s)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_numeric_order() {
        let values = [-1e9, -2.5, -1.0, 0.0, 0.5, 1.0, 2.0, 10.0, 1e12];
        let encoded: Vec<String> = values.iter().map(|v| encode_f64(*v)).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
        assert_eq!(encode_f64(-0.0), encode_f64(0.0));
    }

    #[test]
    fn test_large_ints_keep_their_order() {
        let big = 1i64 << 53;
        // big + 1 rounds to the same double as big
        assert_eq!((big + 1) as f64, big as f64);
        assert!(encode_i64(big) < encode_i64(big + 1));
        assert!(encode_i64(big + 1) < encode_i64(big + 2));
        assert!(encode_i64(i64::MAX - 1) < encode_i64(i64::MAX));
        assert!(encode_i64(i64::MIN) < encode_i64(i64::MIN + 1));
        assert!(encode_i64(-big - 1) < encode_i64(-big));
    }

    #[test]
    fn test_ints_and_doubles_interleave() {
        let big = 1i64 << 53;
        assert_eq!(encode_i64(big), encode_f64(big as f64));
        assert_eq!(encode_i64(-7), encode_f64(-7.0));
        assert!(encode_f64(2.5) < encode_i64(3));
        assert!(encode_i64(big + 1) < encode_f64((big + 2) as f64));
        assert!(encode_f64(big as f64) < encode_i64(big + 1));
    }

    #[test]
    fn test_numbers_before_strings() {
        assert!(encode_value(&FieldValue::Int(1_000_000)).unwrap() < encode_str("0"));
        assert!(encode_value(&FieldValue::Null).is_none());
    }

    proptest! {
        #[test]
        fn prop_f64_order_preserved(a in -1e15f64..1e15, b in -1e15f64..1e15) {
            let (ea, eb) = (encode_f64(a), encode_f64(b));
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), ea.cmp(&eb));
        }

        #[test]
        fn prop_i64_order_preserved(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(a.cmp(&b), encode_i64(a).cmp(&encode_i64(b)));
        }

        #[test]
        fn prop_str_order_preserved(a in "\\PC{0,12}", b in "\\PC{0,12}") {
            prop_assert_eq!(a.as_bytes().cmp(b.as_bytes()), encode_str(&a).cmp(&encode_str(&b)));
        }
    }
}
