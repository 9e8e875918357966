//! Argument coercion for command invocations.
//!
//! Models emit arguments as loosely-typed values (usually strings pulled out
//! of an `execute` block). Each value is converted to the parameter's declared
//! type with a best-effort conversion that fails closed: anything that cannot
//! be converted without guessing becomes an error, never a silent default.
//!
//! The same semantic value coerces identically whatever representation it
//! arrives in: `"42"`, `42` and `42.0` all become the integer `42`.

use serde_json::{Map, Number, Value};

use crate::command::{Arguments, ParamSpec, ParamType};
use crate::error::CommandError;

/// Coerce a single value to `ty`.
pub fn coerce(value: &Value, ty: ParamType) -> Result<Value, String> {
    match ty {
        ParamType::String => to_string(value),
        ParamType::Integer => to_integer(value),
        ParamType::Number => to_number(value),
        ParamType::Boolean => to_boolean(value),
        ParamType::Structured => to_structured(value),
    }
}

/// Coerce a raw argument map against declared parameters.
///
/// Unknown keys are dropped: only declared parameters reach the command.
/// Missing required parameters and uncoercible values are reported as
/// [`CommandError::Argument`].
pub fn coerce_arguments(params: &[ParamSpec], raw: &Arguments) -> Result<Arguments, CommandError> {
    let mut out = Map::new();
    for spec in params {
        match raw.get(&spec.name) {
            Some(Value::Null) | None => {
                if spec.required {
                    return Err(CommandError::Argument {
                        parameter: spec.name.clone(),
                        reason: "missing required argument".into(),
                    });
                }
            }
            Some(value) => {
                let coerced = coerce(value, spec.ty).map_err(|reason| CommandError::Argument {
                    parameter: spec.name.clone(),
                    reason,
                })?;
                out.insert(spec.name.clone(), coerced);
            }
        }
    }
    for key in raw.keys() {
        if !params.iter().any(|p| &p.name == key) {
            tracing::debug!(argument = %key, "Dropping undeclared argument");
        }
    }
    Ok(out)
}

fn describe(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 40 {
        let cut: String = rendered.chars().take(40).collect();
        format!("{cut}…")
    } else {
        rendered
    }
}

fn to_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        Value::Array(_) | Value::Object(_) => Ok(Value::String(value.to_string())),
        Value::Null => Err("expected string, got null".into()),
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

fn to_integer(value: &Value) -> Result<Value, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    parsed
        .map(|i| Value::Number(i.into()))
        .ok_or_else(|| format!("expected integer, got {}", describe(value)))
}

fn to_number(value: &Value) -> Result<Value, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("expected number, got {}", describe(value)))
}

fn to_boolean(value: &Value) -> Result<Value, String> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed
        .map(Value::Bool)
        .ok_or_else(|| format!("expected boolean, got {}", describe(value)))
}

fn to_structured(value: &Value) -> Result<Value, String> {
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(v @ (Value::Object(_) | Value::Array(_))) => Ok(v),
            _ => Err(format!("expected JSON object or array, got {}", describe(value))),
        },
        _ => Err(format!("expected JSON object or array, got {}", describe(value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_from_every_representation() {
        for raw in [json!("42"), json!(42), json!(42.0), json!(" 42 ")] {
            assert_eq!(coerce(&raw, ParamType::Integer).unwrap(), json!(42), "{raw}");
        }
        assert_eq!(coerce(&json!(true), ParamType::Integer).unwrap(), json!(1));
    }

    #[test]
    fn boolean_from_every_representation() {
        for raw in [json!(true), json!("true"), json!("YES"), json!(1), json!("1")] {
            assert_eq!(coerce(&raw, ParamType::Boolean).unwrap(), json!(true), "{raw}");
        }
        for raw in [json!(false), json!("false"), json!("off"), json!(0), json!("0")] {
            assert_eq!(coerce(&raw, ParamType::Boolean).unwrap(), json!(false), "{raw}");
        }
    }

    #[test]
    fn number_from_every_representation() {
        for raw in [json!("2.5"), json!(2.5)] {
            assert_eq!(coerce(&raw, ParamType::Number).unwrap(), json!(2.5));
        }
        assert_eq!(coerce(&json!(false), ParamType::Number).unwrap(), json!(0.0));
    }

    #[test]
    fn string_from_scalars() {
        assert_eq!(coerce(&json!(7), ParamType::String).unwrap(), json!("7"));
        assert_eq!(coerce(&json!(true), ParamType::String).unwrap(), json!("true"));
        assert!(coerce(&Value::Null, ParamType::String).is_err());
    }

    #[test]
    fn fails_closed_on_garbage() {
        assert!(coerce(&json!("lots"), ParamType::Integer).is_err());
        assert!(coerce(&json!(4.5), ParamType::Integer).is_err());
        assert!(coerce(&json!("maybe"), ParamType::Boolean).is_err());
        assert!(coerce(&json!(2), ParamType::Boolean).is_err());
        assert!(coerce(&json!("NaN"), ParamType::Number).is_err());
        assert!(coerce(&json!("plain text"), ParamType::Structured).is_err());
    }

    #[test]
    fn structured_parses_json_strings() {
        let v = coerce(&json!(r#"{"a": 1}"#), ParamType::Structured).unwrap();
        assert_eq!(v, json!({"a": 1}));
        let v = coerce(&json!([1, 2]), ParamType::Structured).unwrap();
        assert_eq!(v, json!([1, 2]));
    }

    #[test]
    fn arguments_checked_against_specs() {
        let params = vec![
            ParamSpec::required("query", ParamType::String, "what to look for"),
            ParamSpec::optional("limit", ParamType::Integer, "max hits"),
        ];

        let mut raw = Map::new();
        raw.insert("query".into(), json!("invoice"));
        raw.insert("limit".into(), json!("5"));
        raw.insert("api_key".into(), json!("forged"));
        let args = coerce_arguments(&params, &raw).unwrap();
        assert_eq!(args["limit"], json!(5));
        assert!(!args.contains_key("api_key"));

        let mut missing = Map::new();
        missing.insert("limit".into(), json!(3));
        let err = coerce_arguments(&params, &missing).unwrap_err();
        assert!(matches!(err, CommandError::Argument { ref parameter, .. } if parameter == "query"));

        raw.insert("limit".into(), json!("a few"));
        let err = coerce_arguments(&params, &raw).unwrap_err();
        assert!(matches!(err, CommandError::Argument { ref parameter, .. } if parameter == "limit"));
    }
}
