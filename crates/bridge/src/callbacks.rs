//! Controller callback registry.
//!
//! The controller script declares global functions with well-known names;
//! after the script runs, the bridge resolves each name once and keeps
//! the function handles. Later redefinitions of the globals are
//! deliberately ignored so event dispatch cost stays flat.

use std::collections::HashMap;

use mlua::{Function, Lua, Value};

pub const ON_START: &str = "on_start";
pub const ON_STOP: &str = "on_stop";
pub const ON_NEW_THREAD: &str = "on_new_thread";
pub const ON_FREE_THREAD: &str = "on_free_thread";
pub const ON_CALL: &str = "on_call";
pub const ON_RETURN: &str = "on_return";
pub const ON_LINE: &str = "on_line";
pub const ON_OUTPUT: &str = "on_output";
pub const HANDLE_REQUEST: &str = "handle_request";
pub const DEBUGLOG: &str = "debuglog";

const ALL: [&str; 10] = [
    ON_START,
    ON_STOP,
    ON_NEW_THREAD,
    ON_FREE_THREAD,
    ON_CALL,
    ON_RETURN,
    ON_LINE,
    ON_OUTPUT,
    HANDLE_REQUEST,
    DEBUGLOG,
];

#[derive(Debug)]
pub enum CallbackError {
    /// The controller script never defined the global.
    Missing(&'static str),
    /// The global exists but is not a function.
    WrongShape(&'static str, &'static str),
    /// The callback ran and raised.
    Failed(&'static str, String),
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "{name} must be a function"),
            Self::WrongShape(name, got) => {
                write!(f, "{name} must be a function, got {got}")
            }
            Self::Failed(name, msg) => write!(f, "call {name} failed: {msg}"),
        }
    }
}

impl std::error::Error for CallbackError {}

enum Slot {
    Unresolved,
    Missing,
    WrongShape(&'static str),
    Resolved(Function),
}

/// Resolved controller entry points, keyed by well-known name.
pub struct Callbacks {
    slots: HashMap<&'static str, Slot>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self {
            slots: ALL.iter().map(|&name| (name, Slot::Unresolved)).collect(),
        }
    }

    /// Snapshot the controller's globals into the slots. Called once,
    /// after the controller script has executed.
    pub fn resolve(&mut self, controller: &Lua) -> Result<(), mlua::Error> {
        let globals = controller.globals();
        for (&name, slot) in &mut self.slots {
            *slot = match globals.get::<Value>(name)? {
                Value::Function(func) => Slot::Resolved(func),
                Value::Nil => Slot::Missing,
                other => Slot::WrongShape(other.type_name()),
            };
        }
        Ok(())
    }

    pub fn get(&self, name: &'static str) -> Result<Function, CallbackError> {
        match self.slots.get(name) {
            Some(Slot::Resolved(func)) => Ok(func.clone()),
            Some(Slot::WrongShape(got)) => Err(CallbackError::WrongShape(name, got)),
            _ => Err(CallbackError::Missing(name)),
        }
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::new()
    }
}
