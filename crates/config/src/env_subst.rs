/// Expand environment placeholders in raw config text.
///
/// Recognised forms:
/// - `${NAME}`: replaced by the variable, left verbatim when unset
/// - `${NAME:-fallback}`: replaced by the variable, or `fallback` when unset
/// - `$NAME`: bare form, `NAME` limited to `[A-Z_][A-Z0-9_]*`
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Placeholder expansion against an arbitrary lookup, so tests never touch
/// the process environment.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed || body.is_empty() {
                    out.push_str("${");
                    out.push_str(&body);
                    continue;
                }
                let (name, fallback) = match body.split_once(":-") {
                    Some((name, fallback)) => (name, Some(fallback)),
                    None => (body.as_str(), None),
                };
                match (lookup(name), fallback) {
                    (Some(val), _) => out.push_str(&val),
                    (None, Some(fallback)) => out.push_str(fallback),
                    (None, None) => {
                        out.push_str("${");
                        out.push_str(&body);
                        out.push('}');
                    },
                }
            },
            Some(c) if c.is_ascii_uppercase() || *c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match lookup(&name) {
                    Some(val) => out.push_str(&val),
                    None => {
                        out.push('$');
                        out.push_str(&name);
                    },
                }
            },
            _ => out.push('$'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "CALC_TOKEN" => Some("abc123".into()),
            "PORT" => Some("9001".into()),
            _ => None,
        }
    }

    #[test]
    fn braced_placeholder() {
        assert_eq!(
            substitute_env_with("auth_token = \"${CALC_TOKEN}\"", lookup),
            "auth_token = \"abc123\""
        );
    }

    #[test]
    fn bare_placeholder() {
        assert_eq!(
            substitute_env_with("url = \"http://localhost:$PORT/mcp\"", lookup),
            "url = \"http://localhost:9001/mcp\""
        );
    }

    #[test]
    fn fallback_used_when_unset() {
        assert_eq!(substitute_env_with("${MISSING:-info}", lookup), "info");
        assert_eq!(substitute_env_with("${PORT:-8080}", lookup), "9001");
    }

    #[test]
    fn unresolved_left_verbatim() {
        assert_eq!(substitute_env_with("${MISSING}", lookup), "${MISSING}");
        assert_eq!(substitute_env_with("$MISSING!", lookup), "$MISSING!");
    }

    #[test]
    fn lone_dollar_and_unclosed_brace() {
        assert_eq!(substitute_env_with("cost: 5$ or $5", lookup), "cost: 5$ or $5");
        assert_eq!(substitute_env_with("${OPEN", lookup), "${OPEN");
    }
}
