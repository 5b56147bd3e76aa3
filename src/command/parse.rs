//! Parameter parsing against the type grammar.

use std::collections::BTreeSet;

use super::{ParamType, Parameter};
use crate::error::CommandError;
use crate::value::{Record, Value};

/// Parses `input` against `params`, producing one field per declared
/// parameter plus, if a `*`-typed parameter is declared, a sub-record of
/// every unclaimed name in `input`.
///
/// Missing required parameters fail with [`CommandError::ParameterMissing`].
/// A present value that cannot be coerced to its declared type fails with
/// [`CommandError::ParameterType`], except inside `array(<t>)`, where an
/// unparseable element degrades to zero/empty rather than failing the
/// whole command.
pub fn parse(params: &[Parameter], input: &Record) -> Result<Record, CommandError> {
    let mut out = Record::new();
    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    let mut star: Option<&Parameter> = None;

    for param in params {
        if matches!(param.type_, ParamType::Star) {
            star = Some(param);
            continue;
        }
        claimed.insert(param.name.as_str());

        match input.get(&param.name) {
            Some(value) => {
                let parsed = parse_value(&param.type_, value).map_err(|_| {
                    CommandError::ParameterType {
                        name: param.name.clone(),
                        expected: param.type_.name(),
                    }
                })?;
                out.insert(param.name.clone(), parsed);
            }
            None => {
                if param.required {
                    return Err(CommandError::ParameterMissing(param.name.clone()));
                }
            }
        }
    }

    if let Some(star_param) = star {
        let leftovers: Record = input
            .iter()
            .filter(|(k, _)| !claimed.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.insert(star_param.name.clone(), Value::Map(leftovers));
    }

    Ok(out)
}

fn parse_value(type_: &ParamType, value: &Value) -> Result<Value, ()> {
    match type_ {
        ParamType::Int => value.as_int().map(Value::Int).ok_or(()),
        ParamType::Bool => value.as_bool().map(Value::Bool).ok_or(()),
        ParamType::Real => value.as_float().map(Value::Float).ok_or(()),
        ParamType::String => Ok(Value::String(value.to_string())),
        ParamType::Parameters => match value {
            Value::Map(_) => Ok(value.clone()),
            _ => Err(()),
        },
        ParamType::Star => Err(()),
        ParamType::Array(inner) => parse_array(inner, value),
    }
}

fn parse_array(inner: &ParamType, value: &Value) -> Result<Value, ()> {
    let elements: Vec<Value> = match value {
        Value::List(items) => items.clone(),
        Value::String(s) => parse_array_string(s)?,
        _ => return Err(()),
    };
    let parsed = elements
        .iter()
        .map(|el| coerce_array_element(inner, el))
        .collect();
    Ok(Value::List(parsed))
}

/// A bare string input for `array(<t>)` is either a JSON array literal or a
/// bracketed/parenthesized comma list.
fn parse_array_string(s: &str) -> Result<Vec<Value>, ()> {
    let trimmed = s.trim();
    if trimmed.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let serde_json::Value::Array(items) = json {
                return Ok(items.into_iter().map(Value::from).collect());
            }
        }
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .or_else(|| trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')))
        .unwrap_or(trimmed);
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner
        .split(',')
        .map(|tok| Value::String(tok.trim().trim_matches('"').to_string()))
        .collect())
}

/// Elements of an `array(<t>)` that fail to parse as `<t>` degrade rather
/// than failing the whole command: numerics become zero, strings are
/// preserved as-is.
fn coerce_array_element(inner: &ParamType, el: &Value) -> Value {
    match inner {
        ParamType::Int => Value::Int(el.as_int().unwrap_or(0)),
        ParamType::Real => Value::Float(el.as_float().unwrap_or(0.0)),
        ParamType::Bool => Value::Bool(el.as_bool().unwrap_or(false)),
        ParamType::String => Value::String(el.to_string()),
        ParamType::Parameters => el.clone(),
        ParamType::Star => el.clone(),
        ParamType::Array(nested) => match el {
            Value::List(items) => {
                Value::List(items.iter().map(|e| coerce_array_element(nested, e)).collect())
            }
            other => coerce_array_element(nested, other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn missing_required_parameter_fails() {
        let params = vec![Parameter::new("name", ParamType::String, true)];
        let err = parse(&params, &Record::new()).unwrap_err();
        assert_eq!(err, CommandError::ParameterMissing("name".into()));
    }

    #[test]
    fn bool_parses_leniently() {
        let params = vec![Parameter::new("flag", ParamType::Bool, true)];
        let input = rec(&[("flag", Value::String("YES".into()))]);
        let out = parse(&params, &input).unwrap();
        assert_eq!(out.get("flag"), Some(&Value::Bool(true)));
    }

    #[test]
    fn array_int_degrades_unparseable_elements_to_zero() {
        let params = vec![Parameter::new(
            "xs",
            ParamType::Array(Box::new(ParamType::Int)),
            true,
        )];
        let input = rec(&[("xs", Value::String("[1, 2, abc]".into()))]);
        let out = parse(&params, &input).unwrap();
        assert_eq!(
            out.get("xs"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(0)]))
        );
    }

    #[test]
    fn star_parameter_collects_unclaimed_names() {
        let params = vec![
            Parameter::new("name", ParamType::String, true),
            Parameter::new("rest", ParamType::Star, false),
        ];
        let input = rec(&[
            ("name", Value::String("sensor".into())),
            ("extra1", Value::Int(1)),
            ("extra2", Value::Bool(true)),
        ]);
        let out = parse(&params, &input).unwrap();
        assert_eq!(out.get("name"), Some(&Value::String("sensor".into())));
        let rest = out.get("rest").unwrap().as_map().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest.get("extra1"), Some(&Value::Int(1)));
    }

    #[test]
    fn parenthesized_comma_list_is_accepted() {
        let params = vec![Parameter::new(
            "xs",
            ParamType::Array(Box::new(ParamType::String)),
            true,
        )];
        let input = rec(&[("xs", Value::String("(a, b, c)".into()))]);
        let out = parse(&params, &input).unwrap();
        assert_eq!(
            out.get("xs"),
            Some(&Value::List(vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into()),
            ]))
        );
    }
}
