//! Interpreter hook installation.
//!
//! The hook fires on calls, returns, and every line, and forwards each
//! event to the dispatcher. It stays installed for the life of the
//! bridge; per-event filtering (step vs. run, breakpoints) is the
//! controller's job, not ours.

use mlua::{DebugEvent, HookTriggers, Lua, VmState};

/// Install the dispatch hook on `lua`'s main thread.
///
/// The dispatcher must never raise: errors inside a line hook would be
/// attributed to whatever innocent debuggee statement was executing.
pub(crate) fn install(lua: &Lua, dispatch: impl Fn(&Lua, DebugEvent) + 'static) {
    let triggers = HookTriggers::new().on_calls().on_returns().every_line();
    lua.set_hook(triggers, move |lua, debug| {
        dispatch(lua, debug.event());
        Ok(VmState::Continue)
    });
}

pub(crate) fn clear(lua: &Lua) {
    lua.remove_hook();
}
