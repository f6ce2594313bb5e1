//! Expression evaluation in the context of a paused frame.
//!
//! Input is tried as an expression first by prefixing it with `return `;
//! only when that fails to parse is it compiled as a raw statement. Both
//! forms run against a synthetic environment holding the frame's locals
//! and upvalues, falling through to the debuggee's globals, so `x + 1`
//! means what it would mean at the paused line.

use mlua::{MultiValue, Table, Thread};

use crate::error::BridgeError;
use crate::introspect::Introspection;
use crate::value::{display_value, format_lua_error};

pub struct Evaluator<'a> {
    debuggee: &'a mlua::Lua,
    intro: &'a Introspection,
}

impl<'a> Evaluator<'a> {
    pub fn new(debuggee: &'a mlua::Lua, intro: &'a Introspection) -> Self {
        Self { debuggee, intro }
    }

    /// Evaluate `input` as seen from `level` of `thread`, returning the
    /// results formatted for display.
    pub fn evaluate(
        &self,
        thread: &Thread,
        level: u32,
        input: &str,
    ) -> Result<String, BridgeError> {
        let frame = self
            .intro
            .frame(thread, level)?
            .ok_or(BridgeError::InvalidFrame(i64::from(level)))?;
        let env = self.frame_environment(thread, level, frame.is_native())?;

        // Expression form first. A successful parse commits us: runtime
        // errors from the expression go to the caller, not the fallback.
        // No parentheses in the wrapper, they would truncate multi-value
        // results to the first one.
        let wrapped = format!("return {}", input);
        let chunk = self
            .debuggee
            .load(&wrapped)
            .set_name("=[eval]")
            .set_environment(env.clone());
        if let Ok(func) = chunk.into_function() {
            let results = func
                .call::<MultiValue>(())
                .map_err(|e| BridgeError::Eval(format_lua_error(&e)))?;
            return Ok(format_results(&results));
        }

        let results = self
            .debuggee
            .load(input)
            .set_name("=[eval]")
            .set_environment(env)
            .eval::<MultiValue>()
            .map_err(|e| BridgeError::Eval(format_lua_error(&e)))?;
        Ok(format_results(&results))
    }

    /// Synthetic `_ENV` for the frame: upvalues first, then locals so
    /// the innermost binding wins, with globals behind an `__index`.
    fn frame_environment(
        &self,
        thread: &Thread,
        level: u32,
        native: bool,
    ) -> Result<Table, BridgeError> {
        let env = self.debuggee.create_table()?;

        if !native {
            if let Some(func) = self.intro.function_at(thread, level)? {
                let mut index = 1;
                while let Some((name, value)) = self.intro.upvalue_at(&func, index)? {
                    if !name.is_empty() {
                        env.set(name, value)?;
                    }
                    index += 1;
                }
            }
            let mut index = 1;
            while let Some((name, value)) = self.intro.local_at(thread, level, index)? {
                if !name.starts_with('(') {
                    env.set(name, value)?;
                }
                index += 1;
            }
        }

        let meta = self.debuggee.create_table()?;
        meta.set("__index", self.debuggee.globals())?;
        env.set_metatable(Some(meta));
        Ok(env)
    }
}

fn format_results(results: &MultiValue) -> String {
    if results.is_empty() {
        return "nil".to_string();
    }
    results
        .iter()
        .map(display_value)
        .collect::<Vec<_>>()
        .join(", ")
}
