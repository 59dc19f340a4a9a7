/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in raw config text.
///
/// Unresolvable variables without a fallback are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with a custom lookup, so tests don't touch the
/// process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated, emit the tail verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "BRIDGEWAY_TEST_ORIGIN" => Some("https://app.example.com".to_string()),
            _ => None,
        }
    }

    #[test]
    fn replaces_known_variable() {
        assert_eq!(
            substitute_env_with("origin = \"${BRIDGEWAY_TEST_ORIGIN}\"", lookup),
            "origin = \"https://app.example.com\""
        );
    }

    #[test]
    fn uses_fallback_when_unset() {
        assert_eq!(
            substitute_env_with("${BRIDGEWAY_MISSING:-http://localhost:3000}", lookup),
            "http://localhost:3000"
        );
    }

    #[test]
    fn set_variable_wins_over_fallback() {
        assert_eq!(
            substitute_env_with("${BRIDGEWAY_TEST_ORIGIN:-ignored}", lookup),
            "https://app.example.com"
        );
    }

    #[test]
    fn keeps_unknown_placeholder() {
        assert_eq!(
            substitute_env_with("key=${BRIDGEWAY_MISSING}", lookup),
            "key=${BRIDGEWAY_MISSING}"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_env_with("a ${OPEN", lookup), "a ${OPEN");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(substitute_env("no placeholders"), "no placeholders");
    }
}
