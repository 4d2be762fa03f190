//! The built-in scalar function registry `eval::eval` calls into for
//! `ScalarNode::ScalarFunctionCall`. Argument count/type mistakes are
//! reported as `QuereusError::Type`; an unknown name is `Misuse` (a plan
//! built against a known function list should never hit that arm, but a
//! hand-built plan in a test might).

use quereus_core::{QuereusError, QuereusResult, Value};

pub fn call(name: &str, args: &[Value]) -> QuereusResult<Value> {
    match name.to_ascii_lowercase().as_str() {
        "upper" => one_text(name, args, |s| Value::from(s.to_uppercase())),
        "lower" => one_text(name, args, |s| Value::from(s.to_lowercase())),
        "length" => match args {
            [Value::Null] => Ok(Value::Null),
            [Value::Text(s)] => Ok(Value::Integer(s.chars().count() as i64)),
            [Value::Blob(b)] => Ok(Value::Integer(b.len() as i64)),
            [other] => Ok(Value::Integer(display(other).chars().count() as i64)),
            _ => Err(arity_error(name, 1, args.len())),
        },
        "abs" => match args {
            [Value::Null] => Ok(Value::Null),
            [Value::Integer(i)] => Ok(Value::Integer(i.abs())),
            [Value::Real(r)] => Ok(Value::Real(r.abs())),
            [other] => other.as_real().map(|r| Value::Real(r.abs())).ok_or_else(|| type_error(name, other)),
            _ => Err(arity_error(name, 1, args.len())),
        },
        "round" => match args {
            [Value::Null, ..] => Ok(Value::Null),
            [v] => round(v, 0),
            [v, Value::Integer(n)] => round(v, *n),
            _ => Err(arity_error(name, 1, args.len())),
        },
        "coalesce" => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
        "ifnull" => match args {
            [a, b] => Ok(if a.is_null() { b.clone() } else { a.clone() }),
            _ => Err(arity_error(name, 2, args.len())),
        },
        "nullif" => match args {
            [a, b] => Ok(if a == b { Value::Null } else { a.clone() }),
            _ => Err(arity_error(name, 2, args.len())),
        },
        "typeof" => match args {
            [v] => Ok(Value::from(type_name(v))),
            _ => Err(arity_error(name, 1, args.len())),
        },
        "trim" => one_text(name, args, |s| Value::from(s.trim())),
        "ltrim" => one_text(name, args, |s| Value::from(s.trim_start())),
        "rtrim" => one_text(name, args, |s| Value::from(s.trim_end())),
        "substr" | "substring" => match args {
            [Value::Null, ..] => Ok(Value::Null),
            [s, start] => substr(s, start, None),
            [s, start, len] => substr(s, start, Some(len)),
            _ => Err(arity_error(name, 2, args.len())),
        },
        "replace" => match args {
            [Value::Null, ..] => Ok(Value::Null),
            [a, b, c] => {
                let haystack = text_of(name, a)?;
                let from = text_of(name, b)?;
                let to = text_of(name, c)?;
                if from.is_empty() {
                    Ok(Value::from(haystack.to_string()))
                } else {
                    Ok(Value::from(haystack.replace(from, to)))
                }
            }
            _ => Err(arity_error(name, 3, args.len())),
        },
        "instr" => match args {
            [Value::Null, ..] | [_, Value::Null] => Ok(Value::Null),
            [a, b] => {
                let haystack = text_of(name, a)?;
                let needle = text_of(name, b)?;
                let found = haystack.find(needle).map(|byte| haystack[..byte].chars().count() as i64 + 1).unwrap_or(0);
                Ok(Value::Integer(found))
            }
            _ => Err(arity_error(name, 2, args.len())),
        },
        other => Err(QuereusError::Misuse { message: format!("no such function: {other}") }),
    }
}

fn one_text(name: &str, args: &[Value], f: impl FnOnce(&str) -> Value) -> QuereusResult<Value> {
    match args {
        [Value::Null] => Ok(Value::Null),
        [v] => Ok(f(text_of(name, v)?)),
        _ => Err(arity_error(name, 1, args.len())),
    }
}

fn text_of<'a>(name: &str, v: &'a Value) -> QuereusResult<&'a str> {
    v.as_text().ok_or_else(|| QuereusError::Type { message: format!("{name}() expects TEXT, got {}", type_name(v)) })
}

fn round(v: &Value, digits: i64) -> QuereusResult<Value> {
    let r = v.as_real().ok_or_else(|| type_error("round", v))?;
    let factor = 10f64.powi(digits as i32);
    Ok(Value::Real((r * factor).round() / factor))
}

fn substr(s: &Value, start: &Value, len: Option<&Value>) -> QuereusResult<Value> {
    let text = text_of("substr", s)?;
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len() as i64;
    let start_1based = start.as_integer().ok_or_else(|| type_error("substr", start))?;
    // SQLite semantics: 1-based, negative start counts from the end.
    let start_0based = if start_1based > 0 { start_1based - 1 } else { (total + start_1based).max(0) };
    let start_0based = start_0based.clamp(0, total) as usize;
    let end = match len {
        Some(l) => {
            let n = l.as_integer().ok_or_else(|| type_error("substr", l))?;
            (start_0based as i64 + n.max(0)).clamp(0, total) as usize
        }
        None => chars.len(),
    };
    let end = end.max(start_0based);
    Ok(Value::from(chars[start_0based..end].iter().collect::<String>()))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::Text(s) => s.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Blob(b) => String::from_utf8_lossy(b).to_string(),
        Value::Null => String::new(),
    }
}

fn type_error(name: &str, v: &Value) -> QuereusError {
    QuereusError::Type { message: format!("{name}() cannot accept {}", type_name(v)) }
}

fn arity_error(name: &str, expected: usize, got: usize) -> QuereusError {
    QuereusError::Misuse { message: format!("{name}() expects {expected} argument(s), got {got}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn coalesce_skips_nulls() {
        assert_eq!(call("coalesce", &[Value::Null, Value::Null, Value::Integer(5)]).unwrap(), Value::Integer(5));
    }

    #[test]
    fn substr_negative_start_counts_from_end() {
        assert_eq!(call("substr", &[Value::from("hello"), Value::Integer(-3)]).unwrap(), Value::from("llo"));
    }

    #[test]
    fn typeof_reports_null() {
        assert_eq!(call("typeof", &[Value::Null]).unwrap(), Value::from("null"));
    }

    #[test]
    fn unknown_function_is_misuse() {
        assert!(matches!(call("no_such_fn", &[]), Err(QuereusError::Misuse { .. })));
    }
}
