//! Quote-preserving command-line tokenizer: tokens split on whitespace,
//! `"…"` substrings kept intact, `""` inside a quoted run is an escaped
//! literal quote character.

pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            in_token = true;
            loop {
                match chars.next() {
                    Some('"') => {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            current.push('"');
                        } else {
                            break;
                        }
                    }
                    Some(other) => current.push(other),
                    None => break,
                }
            }
        } else if c.is_whitespace() {
            if in_token {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
        } else {
            in_token = true;
            current.push(c);
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokenize("config Mail verbose=true"), vec!["config", "Mail", "verbose=true"]);
    }

    #[test]
    fn quoted_substring_kept_as_one_token() {
        assert_eq!(tokenize(r#"exec Mail body="hello world""#), vec!["exec", "Mail", "body=hello world"]);
    }

    #[test]
    fn doubled_quote_is_escaped_literal() {
        assert_eq!(tokenize(r#"exec Mail body="say ""hi""""#), vec!["exec", "Mail", r#"body=say "hi""#]);
    }

    #[test]
    fn empty_line_yields_no_tokens() {
        assert!(tokenize("   ").is_empty());
    }
}
