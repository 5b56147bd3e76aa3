//! `$name` text templating.

use crate::value::Record;

const MAX_PASSES: usize = 8;

/// Applies `$name` substitution against `globals` then `locals`, repeating
/// until a full pass changes nothing (capped at [`MAX_PASSES`] to guard
/// against a pathological value that re-introduces a `$name` token).
pub fn template(input: &str, globals: &Record, locals: &Record) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_PASSES {
        let next = substitute_once(&current, globals, &current, locals);
        if next == current {
            return next;
        }
        current = next;
    }
    current
}

fn substitute_once(s: &str, globals: &Record, _prev: &str, locals: &Record) -> String {
    let after_globals = substitute_pass(s, globals);
    substitute_pass(&after_globals, locals)
}

/// One pass of `$name` → value replacement using `table`. Names are the
/// longest run of ASCII alphanumerics/underscore following `$`.
fn substitute_pass(s: &str, table: &Record) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            if end > start {
                let name = &s[start..end];
                if let Some(value) = table.get(name) {
                    out.push_str(&value.to_string());
                    i = end;
                    continue;
                }
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn two_passes_resolve_global_then_local() {
        let globals = Record::from([("Id".to_string(), Value::String("D01".into()))]);
        let locals = Record::from([("name".to_string(), Value::String("sensor".into()))]);
        let out = template("dev:$Id msg from $name", &globals, &locals);
        assert_eq!(out, "dev:D01 msg from sensor");
    }

    #[test]
    fn unresolved_placeholders_pass_through() {
        let out = template("no such $thing here", &Record::new(), &Record::new());
        assert_eq!(out, "no such $thing here");
    }

    #[test]
    fn stable_under_a_third_pass() {
        let globals = Record::from([("Id".to_string(), Value::String("D01".into()))]);
        let locals = Record::new();
        let once = template("dev:$Id", &globals, &locals);
        let twice = template(&once, &globals, &locals);
        assert_eq!(once, twice);
    }
}
