/// Replace `${ENV_VAR}` placeholders in config string values.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup function.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut var_name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            var_name.push(c);
        }

        match (closed && !var_name.is_empty())
            .then(|| lookup(&var_name))
            .flatten()
        {
            Some(val) => result.push_str(&val),
            None => {
                result.push_str("${");
                result.push_str(&var_name);
                if closed {
                    result.push('}');
                }
            },
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "ICLOUD_EMAIL" => Some("me@icloud.com".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("username = \"${ICLOUD_EMAIL}\"", lookup),
            "username = \"me@icloud.com\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${CALBRIDGE_NOPE}", lookup),
            "${CALBRIDGE_NOPE}"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_env_with("a ${ICLOUD_EMAIL", lookup), "a ${ICLOUD_EMAIL");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
