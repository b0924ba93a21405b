/// Replace `${ENV_VAR}` placeholders in config text.
///
/// Unresolvable variables are left as-is so validation can flag them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// True when `value` still contains an unexpanded `${...}` placeholder.
#[must_use]
pub fn has_unresolved_placeholder(value: &str) -> bool {
    value
        .find("${")
        .is_some_and(|start| value[start..].contains('}'))
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup function.
///
/// Split out from [`substitute_env`] so tests never touch the process
/// environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next(); // consume '{'
        let mut var_name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            var_name.push(c);
        }
        match (closed, lookup(&var_name)) {
            (true, Some(val)) if !var_name.is_empty() => result.push_str(&val),
            (true, _) => {
                result.push_str("${");
                result.push_str(&var_name);
                result.push('}');
            },
            // Malformed, emit literal.
            (false, _) => {
                result.push_str("${");
                result.push_str(&var_name);
            },
        }
    }

    result
}
