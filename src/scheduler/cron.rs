//! Cron-like schedule line parsing.
//!
//! `second minute hour dayOfWeek dayOfMonth month periodSeconds extraExpr
//! command` — 8 fields plus a trailing command name. `extraExpr` may be
//! omitted (a bare 8-token line, e.g. `"0 * * * * * * doBeep"`).
//!
//! Each field is compiled down to an explicit set of matching values
//! (ranges, steps and comma-lists are all bounded enumerations over a
//! known domain), then rendered as a boolean expression over `utc.<field>`
//! so the schedule becomes an ordinary [`crate::rules::Rule`] evaluated by
//! the periodic engine — no separate cron clock is needed.

use std::time::Duration;

use crate::error::ParseError;

struct FieldSpec {
    expr_name: &'static str,
    domain: (i64, i64),
    day_names: bool,
}

const FIELDS: [FieldSpec; 6] = [
    FieldSpec { expr_name: "second", domain: (0, 59), day_names: false },
    FieldSpec { expr_name: "minute", domain: (0, 59), day_names: false },
    FieldSpec { expr_name: "hour", domain: (0, 23), day_names: false },
    FieldSpec { expr_name: "dayofweek", domain: (0, 6), day_names: true },
    FieldSpec { expr_name: "day", domain: (1, 31), day_names: false },
    FieldSpec { expr_name: "month", domain: (1, 12), day_names: false },
];

pub struct ParsedCron {
    pub time_trigger: Duration,
    pub expression: String,
    pub command: String,
}

pub fn parse(line: &str) -> Result<ParsedCron, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 8 {
        return Err(ParseError::Cron(format!(
            "expected at least 8 tokens, found {}: '{line}'",
            tokens.len()
        )));
    }
    let command = tokens.last().unwrap().to_string();
    let field_tokens = &tokens[..tokens.len() - 1];
    // field_tokens is 6 time fields + periodSeconds [+ extraExpr]
    let period_token = field_tokens[6];
    let extra_expr = field_tokens.get(7).copied();

    let mut conjuncts: Vec<String> = Vec::new();
    let mut precision_secs: i64 = 24 * 3600;

    for (i, spec) in FIELDS.iter().enumerate() {
        let token = field_tokens[i];
        if token == "*" {
            continue;
        }
        let values = parse_field(token, spec)?;
        if values.len() == 1 {
            conjuncts.push(format!("utc.{} == {}", spec.expr_name, values[0]));
        } else {
            let ors: Vec<String> = values
                .iter()
                .map(|v| format!("utc.{} == {v}", spec.expr_name))
                .collect();
            conjuncts.push(format!("({})", ors.join(" OR ")));
        }
        precision_secs = precision_secs.min(field_precision_secs(i));
    }

    if let Some(extra) = extra_expr {
        if !extra.is_empty() && extra != "*" {
            conjuncts.push(format!("({extra})"));
        }
    }

    let expression = if conjuncts.is_empty() {
        "true".to_string()
    } else {
        conjuncts.join(" AND ")
    };

    let period_secs = if period_token == "*" {
        None
    } else {
        Some(
            period_token
                .parse::<i64>()
                .map_err(|_| ParseError::Cron(format!("invalid periodSeconds '{period_token}'")))?,
        )
    };

    let time_trigger_secs = match period_secs {
        Some(p) => precision_secs.min(p),
        None => precision_secs,
    };

    Ok(ParsedCron {
        time_trigger: Duration::from_secs(time_trigger_secs.max(0) as u64),
        expression,
        command,
    })
}

fn field_precision_secs(field_index: usize) -> i64 {
    match field_index {
        0 => 1,
        1 => 60,
        2 => 3600,
        3 | 4 => 86400,
        5 => 30 * 86400,
        _ => 86400,
    }
}

/// Expands a single field token (`*`, `a-b`, `a,b,c`, `base/step`) into the
/// explicit set of matching integer values.
fn parse_field(token: &str, spec: &FieldSpec) -> Result<Vec<i64>, ParseError> {
    let mut out = Vec::new();
    for part in token.split(',') {
        out.extend(parse_field_part(part, spec)?);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

fn parse_field_part(part: &str, spec: &FieldSpec) -> Result<Vec<i64>, ParseError> {
    if let Some((base, step)) = part.split_once('/') {
        let base_val = if base == "*" { spec.domain.0 } else { parse_value(base, spec)? };
        let step: i64 = step
            .parse()
            .map_err(|_| ParseError::Cron(format!("invalid step '{part}'")))?;
        if step <= 0 {
            return Err(ParseError::Cron(format!("invalid step '{part}'")));
        }
        let mut values = Vec::new();
        let mut v = base_val;
        while v <= spec.domain.1 {
            values.push(v);
            v += step;
        }
        return Ok(values);
    }
    if let Some((lo, hi)) = part.split_once('-') {
        let lo = parse_value(lo, spec)?;
        let hi = parse_value(hi, spec)?;
        return Ok((lo..=hi).collect());
    }
    Ok(vec![parse_value(part, spec)?])
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<i64, ParseError> {
    if let Ok(n) = token.parse::<i64>() {
        return Ok(n);
    }
    if spec.day_names {
        return day_name_to_index(token)
            .ok_or_else(|| ParseError::Cron(format!("unknown day name '{token}'")));
    }
    Err(ParseError::Cron(format!("invalid field value '{token}'")))
}

fn day_name_to_index(name: &str) -> Option<i64> {
    let lower = name.to_ascii_lowercase();
    let idx = match lower.as_str() {
        "sun" | "sunday" => 0,
        "mon" | "monday" => 1,
        "tue" | "tuesday" => 2,
        "wed" | "wednesday" => 3,
        "thu" | "thursday" => 4,
        "fri" | "friday" => 5,
        "sat" | "saturday" => 6,
        _ => return None,
    };
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_every_second_0_schedule() {
        let parsed = parse("0 * * * * * * doBeep").unwrap();
        assert_eq!(parsed.command, "doBeep");
        assert_eq!(parsed.expression, "utc.second == 0");
        assert_eq!(parsed.time_trigger, Duration::from_secs(1));
    }

    #[test]
    fn comma_list_becomes_or_chain() {
        let parsed = parse("0,30 * * * * * * tick").unwrap();
        assert_eq!(parsed.expression, "(utc.second == 0 OR utc.second == 30)");
    }

    #[test]
    fn day_name_range_and_extra_expr() {
        let parsed = parse("0 0 9 Mon-Fri * * * battery>10 report").unwrap();
        assert!(parsed.expression.contains("utc.dayofweek"));
        assert!(parsed.expression.contains("battery>10"));
    }

    #[test]
    fn step_expands_within_domain() {
        let parsed = parse("*/15 * * * * * * tick").unwrap();
        assert_eq!(parsed.expression, "(utc.second == 0 OR utc.second == 15 OR utc.second == 30 OR utc.second == 45)");
    }

    #[test]
    fn unknown_day_name_fails() {
        let err = parse("0 0 9 Funday * * * report").unwrap_err();
        assert!(matches!(err, ParseError::Cron(_)));
    }

    #[test]
    fn explicit_period_seconds_bounds_time_trigger() {
        let parsed = parse("0 * * * * * 5 tick").unwrap();
        assert_eq!(parsed.time_trigger, Duration::from_secs(1));
    }
}
