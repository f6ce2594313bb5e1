//! Display formatting for debuggee values.
//!
//! Every value shown to the debug client goes through here: a short
//! display string plus a type tag. Composite values are never traversed;
//! they render as `"<type>: <address>"` and drill-down happens lazily
//! through the handle cache.

use mlua::Value;

/// Maximum length (in bytes) of a formatted string value.
pub const MAX_TEXT_LEN: usize = 1024;

/// Convert a Lua value to a display string.
///
/// Primitives use their literal representation, strings are truncated at
/// [`MAX_TEXT_LEN`], and reference values (tables, functions, threads,
/// userdata) render by address identity the way Lua's own `tostring` does.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => {
            // No trailing zeros for integral floats
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{:.0}", n)
            } else {
                format!("{}", n)
            }
        }
        Value::String(s) => {
            let text = s
                .to_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| "<invalid utf8>".to_string());
            truncate_text(text)
        }
        Value::Error(e) => truncate_text(format!("error: {}", e)),
        other => format!("{}: {:p}", other.type_name(), other.to_pointer()),
    }
}

/// Type tag for a value, as the debug client displays it.
pub fn type_tag(value: &Value) -> &'static str {
    value.type_name()
}

fn truncate_text(mut text: String) -> String {
    if text.len() > MAX_TEXT_LEN {
        let mut end = MAX_TEXT_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Format a Lua error for display.
///
/// Syntax errors carry a noisy `[string "..."]:<line>:` prefix from the
/// interpreter; strip through the line number so the client sees only
/// the message.
pub fn format_lua_error(error: &mlua::Error) -> String {
    match error {
        mlua::Error::SyntaxError { message, .. } => {
            strip_chunk_prefix(message).unwrap_or_else(|| message.clone())
        }
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        _ => error.to_string(),
    }
}

/// `[string "..."]:1: msg` -> `msg`. The chunk name may itself contain
/// colons, so scan for the `": "` after the closing bracket.
fn strip_chunk_prefix(message: &str) -> Option<String> {
    let bracket = message.find("]:")?;
    let rest = &message[bracket + 2..];
    let msg_start = rest.find(": ")?;
    Some(rest[msg_start + 2..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    #[test]
    fn primitives_format_literally() {
        assert_eq!(display_value(&Value::Nil), "nil");
        assert_eq!(display_value(&Value::Boolean(true)), "true");
        assert_eq!(display_value(&Value::Integer(42)), "42");
        assert_eq!(display_value(&Value::Number(3.0)), "3");
        assert_eq!(display_value(&Value::Number(3.5)), "3.5");
    }

    #[test]
    fn strings_pass_through_untruncated_below_cap() {
        let lua = Lua::new();
        let s = lua.create_string("hello world").unwrap();
        assert_eq!(display_value(&Value::String(s)), "hello world");
    }

    #[test]
    fn long_strings_truncate_at_cap() {
        let lua = Lua::new();
        let s = lua.create_string("x".repeat(5000)).unwrap();
        let shown = display_value(&Value::String(s));
        assert_eq!(shown.len(), MAX_TEXT_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let lua = Lua::new();
        // 512 two-byte chars = 1024 bytes, plus one more to force a cut
        let text = "é".repeat(513);
        let s = lua.create_string(&text).unwrap();
        let shown = display_value(&Value::String(s));
        assert!(shown.len() <= MAX_TEXT_LEN);
        assert!(shown.is_char_boundary(shown.len()));
    }

    #[test]
    fn composite_values_format_by_identity() {
        let lua = Lua::new();
        let t = lua.create_table().unwrap();
        let shown = display_value(&Value::Table(t));
        assert!(shown.starts_with("table: 0x"), "got: {shown}");

        let f = lua.create_function(|_, ()| Ok(())).unwrap();
        let shown = display_value(&Value::Function(f));
        assert!(shown.starts_with("function: 0x"), "got: {shown}");
    }

    #[test]
    fn type_tags_match_lua_names() {
        assert_eq!(type_tag(&Value::Nil), "nil");
        assert_eq!(type_tag(&Value::Integer(1)), "integer");
        assert_eq!(type_tag(&Value::Boolean(false)), "boolean");
    }

    #[test]
    fn syntax_error_prefix_is_stripped() {
        let lua = Lua::new();
        let err = lua.load("if then").into_function().unwrap_err();
        let msg = format_lua_error(&err);
        assert!(msg.starts_with("unexpected symbol"), "got: {msg}");
        assert!(!msg.contains("[string"), "got: {msg}");
    }

    #[test]
    fn chunk_prefix_stripping_handles_odd_names() {
        assert_eq!(
            strip_chunk_prefix(r#"[string "a: b"]:12: '=' expected"#).as_deref(),
            Some("'=' expected")
        );
        assert_eq!(strip_chunk_prefix("no prefix here"), None);
    }
}
