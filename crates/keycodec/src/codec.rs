use quereus_core::{EncodingError, Value};

/// Tag ordinals: NULL < numeric < TEXT < BLOB.
const TAG_NULL: u8 = 0;
const TAG_NUMERIC: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_BLOB: u8 = 3;

const SIGN_NEGATIVE: u8 = 0;
const SIGN_ZERO: u8 = 1;
const SIGN_POSITIVE: u8 = 2;

/// Encodes a single SQL value into a byte string whose lexicographic
/// (memcmp) order matches `sql_compare`. Stateless: encoding depends only
/// on the value, never on connection or schema state.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<(), EncodingError> {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Integer(i) => {
            out.push(TAG_NUMERIC);
            encode_numeric(NumericMagnitude::from_i64(*i), out);
        }
        Value::Real(r) => {
            if r.is_nan() || r.is_infinite() {
                return Err(EncodingError {
                    reason: format!("REAL value {r} has no well-ordered key encoding"),
                });
            }
            out.push(TAG_NUMERIC);
            encode_numeric(NumericMagnitude::from_f64(*r), out);
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            encode_terminated_bytes(s.as_bytes(), out);
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            encode_terminated_bytes(b, out);
        }
    }
    Ok(())
}

/// Encodes a composite key: fields concatenated in order. No extra
/// separator is needed between fields because every field encoding is
/// already self-delimiting — NULL and numeric fields are fixed-width,
/// TEXT/BLOB fields carry their own escaped terminator — so concatenation
/// is unambiguous and preserves field-by-field lexicographic comparison.
pub fn encode_key(values: &[Value]) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(values.len() * 12);
    for v in values {
        encode_value(v, &mut out)?;
    }
    Ok(out)
}

/// Decodes a key produced by `encode_key`/`encode_value` back into a
/// sequence of SQL values. Numeric fields decode to `Integer` when the
/// magnitude is an exact whole number representable as `i64`, else `Real`
/// — encoding never distinguishes `Integer(3)` from `Real(3.0)` (their
/// keys are byte-identical, since `sql_compare` says they're equal), so
/// this is the canonical choice rather than a recorded one.
pub fn decode_key(mut bytes: &[u8]) -> Result<Vec<Value>, EncodingError> {
    let mut values = Vec::new();
    while !bytes.is_empty() {
        let (value, rest) = decode_value(bytes)?;
        values.push(value);
        bytes = rest;
    }
    Ok(values)
}

fn decode_value(bytes: &[u8]) -> Result<(Value, &[u8]), EncodingError> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| EncodingError { reason: "empty key".into() })?;
    match tag {
        TAG_NULL => Ok((Value::Null, rest)),
        TAG_NUMERIC => {
            let (magnitude, rest) = decode_numeric(rest)?;
            Ok((magnitude.into_value(), rest))
        }
        TAG_TEXT => {
            let (bytes, rest) = decode_terminated_bytes(rest)?;
            let text = String::from_utf8(bytes)
                .map_err(|e| EncodingError { reason: format!("invalid UTF-8 in TEXT key: {e}") })?;
            Ok((Value::Text(text.into_boxed_str()), rest))
        }
        TAG_BLOB => {
            let (bytes, rest) = decode_terminated_bytes(rest)?;
            Ok((Value::Blob(bytes.into_boxed_slice()), rest))
        }
        other => Err(EncodingError { reason: format!("unknown key tag {other}") }),
    }
}

/// A numeric value normalized to `sign * magnitude * 2^exponent`, with the
/// mantissa left-justified to 64 bits (implicit leading one), so integers
/// and reals share one comparable representation: `exponent` is exactly
/// `floor(log2(|value|))` for both.
struct NumericMagnitude {
    sign: u8,
    exponent: i16,
    mantissa: u64,
}

impl NumericMagnitude {
    fn from_i64(v: i64) -> Self {
        if v == 0 {
            return Self { sign: SIGN_ZERO, exponent: 0, mantissa: 0 };
        }
        let sign = if v < 0 { SIGN_NEGATIVE } else { SIGN_POSITIVE };
        // i64::MIN's absolute value overflows i64, so widen to u64 via
        // wrapping negation rather than `.abs()`.
        let magnitude = if v < 0 { (v as i64).unsigned_abs() } else { v as u64 };
        let shift = magnitude.leading_zeros();
        let exponent = 63 - shift as i16;
        let mantissa = magnitude << shift;
        Self { sign, exponent, mantissa }
    }

    fn from_f64(v: f64) -> Self {
        if v == 0.0 {
            return Self { sign: SIGN_ZERO, exponent: 0, mantissa: 0 };
        }
        let sign = if v.is_sign_negative() { SIGN_NEGATIVE } else { SIGN_POSITIVE };
        let bits = v.to_bits();
        let raw_exponent = ((bits >> 52) & 0x7FF) as i16;
        let raw_mantissa = bits & 0x000F_FFFF_FFFF_FFFF;
        let (exponent, mantissa52) = if raw_exponent == 0 {
            // Subnormal: no implicit leading bit. Normalize by shifting
            // until the leading bit lands where a normal float's would.
            let shift = raw_mantissa.leading_zeros() - 11; // 64-52-1
            (-1022 - shift as i16, raw_mantissa << shift)
        } else {
            (raw_exponent - 1023, raw_mantissa)
        };
        // Left-justify the 52-bit mantissa (with implicit leading 1) into
        // the top 64 bits.
        let mantissa = (1u64 << 63) | (mantissa52 << 11);
        Self { sign, exponent, mantissa }
    }

    fn into_value(self) -> Value {
        if self.sign == SIGN_ZERO {
            return Value::Integer(0);
        }
        // Reconstruct the magnitude. If it fits as a whole number in i64
        // (exponent in [0, 62] and the mantissa's low bits below the
        // binary point are all zero), decode as Integer; otherwise Real.
        if (0..=62).contains(&self.exponent) {
            let shift = 63 - self.exponent;
            if shift == 64 || (self.mantissa & ((1u64 << shift).wrapping_sub(1))) == 0 {
                let magnitude = if shift >= 64 { self.mantissa } else { self.mantissa >> shift };
                let signed = if self.sign == SIGN_NEGATIVE {
                    -(magnitude as i64)
                } else {
                    magnitude as i64
                };
                return Value::Integer(signed);
            }
        }
        let fraction = (self.mantissa >> 11) & 0x000F_FFFF_FFFF_FFFF;
        let biased_exponent = (self.exponent + 1023) as u64;
        let bits = (biased_exponent << 52) | fraction;
        let magnitude = f64::from_bits(bits);
        Value::Real(if self.sign == SIGN_NEGATIVE { -magnitude } else { magnitude })
    }
}

const NUMERIC_PAYLOAD_LEN: usize = 1 + 2 + 8;

fn encode_numeric(m: NumericMagnitude, out: &mut Vec<u8>) {
    let mut payload = [0u8; NUMERIC_PAYLOAD_LEN];
    payload[0] = m.sign;
    let biased_exponent = (m.exponent as i32 + 20_000) as u16;
    payload[1..3].copy_from_slice(&biased_exponent.to_be_bytes());
    payload[3..11].copy_from_slice(&m.mantissa.to_be_bytes());

    // Negative magnitudes sort in reverse: a larger magnitude is a
    // *smaller* value, so invert the magnitude bytes to flip their
    // byte-compare order within the negative sign class.
    if m.sign == SIGN_NEGATIVE {
        for b in &mut payload[1..] {
            *b = !*b;
        }
    }
    out.extend_from_slice(&payload);
}

fn decode_numeric(bytes: &[u8]) -> Result<(NumericMagnitude, &[u8]), EncodingError> {
    if bytes.len() < NUMERIC_PAYLOAD_LEN {
        return Err(EncodingError { reason: "truncated numeric key".into() });
    }
    let (payload, rest) = bytes.split_at(NUMERIC_PAYLOAD_LEN);
    let sign = payload[0];
    let mut magnitude_bytes = [0u8; NUMERIC_PAYLOAD_LEN - 1];
    magnitude_bytes.copy_from_slice(&payload[1..]);
    if sign == SIGN_NEGATIVE {
        for b in &mut magnitude_bytes {
            *b = !*b;
        }
    }
    let biased_exponent = u16::from_be_bytes([magnitude_bytes[0], magnitude_bytes[1]]);
    let exponent = biased_exponent as i32 - 20_000;
    let mantissa = u64::from_be_bytes(magnitude_bytes[2..10].try_into().unwrap());
    Ok((NumericMagnitude { sign, exponent: exponent as i16, mantissa }, rest))
}

/// Escapes embedded `0x00` bytes as `0x00 0xFF` and terminates with
/// `0x00 0x00`, so a prefix of a longer string always sorts first
/// (`0x00 0x00` < `0x00 0xFF ...`) exactly like memcmp on NUL-free byte
/// strings would.
fn encode_terminated_bytes(data: &[u8], out: &mut Vec<u8>) {
    for &b in data {
        if b == 0 {
            out.push(0);
            out.push(0xFF);
        } else {
            out.push(b);
        }
    }
    out.push(0);
    out.push(0);
}

fn decode_terminated_bytes(bytes: &[u8]) -> Result<(Vec<u8>, &[u8]), EncodingError> {
    let mut decoded = Vec::new();
    let mut i = 0;
    loop {
        match bytes.get(i) {
            Some(0) => match bytes.get(i + 1) {
                Some(0xFF) => {
                    decoded.push(0);
                    i += 2;
                }
                Some(0) => return Ok((decoded, &bytes[i + 2..])),
                _ => {
                    return Err(EncodingError { reason: "malformed escape in key".into() });
                }
            },
            Some(&b) => {
                decoded.push(b);
                i += 1;
            }
            None => return Err(EncodingError { reason: "unterminated key field".into() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quereus_core::sql_compare;

    fn roundtrip(v: Value) -> Value {
        let key = encode_key(std::slice::from_ref(&v)).unwrap();
        decode_key(&key).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn integers_roundtrip() {
        for v in [0i64, 1, -1, 42, -42, i64::MAX, i64::MIN, 1 << 40, -(1 << 40)] {
            assert_eq!(roundtrip(Value::Integer(v)), Value::Integer(v));
        }
    }

    #[test]
    fn reals_roundtrip() {
        for v in [0.5f64, -0.5, 3.25, -100.125, 1e10, -1e-10] {
            assert_eq!(roundtrip(Value::Real(v)), Value::Real(v));
        }
    }

    #[test]
    fn text_and_blob_roundtrip() {
        assert_eq!(roundtrip(Value::from("hello")), Value::from("hello"));
        assert_eq!(roundtrip(Value::from("with\0nul")), Value::from("with\0nul"));
        assert_eq!(roundtrip(Value::from(vec![1u8, 0, 2, 0, 0, 3])), Value::from(vec![1u8, 0, 2, 0, 0, 3]));
    }

    fn key_order_matches_value_order(a: Value, b: Value) {
        let ka = encode_key(std::slice::from_ref(&a)).unwrap();
        let kb = encode_key(std::slice::from_ref(&b)).unwrap();
        assert_eq!(ka.cmp(&kb), sql_compare(&a, &b), "a={a:?} b={b:?}");
    }

    #[test]
    fn byte_order_matches_sql_order() {
        let values = vec![
            Value::Null,
            Value::Integer(i64::MIN),
            Value::Integer(-1000),
            Value::Real(-0.5),
            Value::Integer(0),
            Value::Integer(1),
            Value::Real(1.5),
            Value::Integer(1_000_000),
            Value::Integer(i64::MAX),
            Value::from("abc"),
            Value::from("abd"),
            Value::from(vec![1u8, 2, 3]),
        ];
        for a in &values {
            for b in &values {
                key_order_matches_value_order(a.clone(), b.clone());
            }
        }
    }

    #[test]
    fn integer_and_real_of_equal_magnitude_produce_identical_keys() {
        let ki = encode_key(&[Value::Integer(7)]).unwrap();
        let kr = encode_key(&[Value::Real(7.0)]).unwrap();
        assert_eq!(ki, kr);
    }

    #[test]
    fn composite_keys_compare_lexicographically() {
        let k1 = encode_key(&[Value::Integer(1), Value::from("a")]).unwrap();
        let k2 = encode_key(&[Value::Integer(1), Value::from("b")]).unwrap();
        let k3 = encode_key(&[Value::Integer(2), Value::from("a")]).unwrap();
        assert!(k1 < k2);
        assert!(k2 < k3);
    }

    #[test]
    fn lo_greater_than_hi_range_is_empty_is_a_caller_concern() {
        // The codec only guarantees ordering; an empty `lo > hi` range is
        // enforced by the ordered tree's `range` (see tree.rs tests).
        let lo = encode_key(&[Value::Integer(5)]).unwrap();
        let hi = encode_key(&[Value::Integer(1)]).unwrap();
        assert!(lo > hi);
    }
}
