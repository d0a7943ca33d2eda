/// Current Unix time in seconds, matching the original's `time_t` arithmetic.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Escapes a string for embedding as a single-quoted SQL literal inside a
/// hand-built bulk statement: doubles backslashes, then escapes single
/// quotes, matching `mysqlpp::quote`'s escaping behavior.
pub fn sql_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}
