//! Thread identity, the live-thread registry, and coroutine creation
//! tracking inside the debuggee.
//!
//! Threads cross the bridge as integer ids derived from the coroutine's
//! address, since the controller state cannot hold debuggee references.
//! The registry pins each announced coroutine so its id stays valid (and
//! its address unrecycled) until the bridge reaps it after completion.

use std::collections::HashMap;

use mlua::{Function, Lua, Table, Thread, ThreadStatus};

use crate::error::BridgeError;

pub type ThreadId = i64;

/// Stable identity of a coroutine for the controller's benefit.
pub fn thread_id(thread: &Thread) -> ThreadId {
    thread.to_pointer() as usize as i64
}

/// Live coroutines announced to the controller, keyed by id.
#[derive(Default)]
pub struct ThreadRegistry {
    threads: HashMap<ThreadId, Thread>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, thread: &Thread) -> ThreadId {
        let id = thread_id(thread);
        self.threads.insert(id, thread.clone());
        id
    }

    pub fn resolve(&self, id: ThreadId) -> Option<Thread> {
        self.threads.get(&id).cloned()
    }

    /// Remove and return the ids of threads that can never run again.
    pub fn take_dead(&mut self) -> Vec<ThreadId> {
        let dead: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(_, thread)| {
                matches!(thread.status(), ThreadStatus::Finished | ThreadStatus::Error)
            })
            .map(|(&id, _)| id)
            .collect();
        for id in &dead {
            self.threads.remove(id);
        }
        dead
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

/// `coroutine.wrap` rebuilt on top of the instrumented `create`, so
/// wrapped coroutines are announced too.
const WRAP_SHIM: &str = r#"
local create = coroutine.create
local resume = coroutine.resume
local unpack = table.unpack
coroutine.wrap = function(f)
    local co = create(f)
    return function(...)
        local results = { resume(co, ...) }
        if results[1] then
            return unpack(results, 2)
        end
        error(results[2], 0)
    end
end
"#;

/// Intercept coroutine creation in `lua`, invoking `on_create` for
/// every new thread before it is handed back to the script.
pub(crate) fn instrument(
    lua: &Lua,
    on_create: impl Fn(&Lua, &Thread) + 'static,
) -> Result<(), BridgeError> {
    let coroutine: Table = lua.globals().get("coroutine")?;
    let original: Function = coroutine.get("create")?;
    let instrumented = lua.create_function(move |lua, func: Function| {
        let thread: Thread = original.call(func)?;
        on_create(lua, &thread);
        Ok(thread)
    })?;
    coroutine.set("create", instrumented)?;
    lua.load(WRAP_SHIM).set_name("=[bridge wrap]").exec()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn ids_are_stable_and_resolvable() {
        let lua = Lua::new();
        let thread = lua
            .create_thread(lua.load("return 1").into_function().unwrap())
            .unwrap();

        let mut registry = ThreadRegistry::new();
        let id = registry.register(&thread);
        assert_eq!(id, thread_id(&thread));

        let resolved = registry.resolve(id).unwrap();
        assert_eq!(thread_id(&resolved), id);
        assert!(registry.resolve(id + 1).is_none());
    }

    #[test]
    fn take_dead_removes_finished_threads_only() {
        let lua = Lua::new();
        let finished = lua
            .create_thread(lua.load("return 1").into_function().unwrap())
            .unwrap();
        let suspended = lua
            .create_thread(lua.load("coroutine.yield()").into_function().unwrap())
            .unwrap();
        finished.resume::<()>(()).unwrap();

        let mut registry = ThreadRegistry::new();
        let dead_id = registry.register(&finished);
        registry.register(&suspended);

        assert_eq!(registry.take_dead(), vec![dead_id]);
        assert_eq!(registry.len(), 1);
        assert!(registry.take_dead().is_empty());
    }

    #[test]
    fn instrumented_create_announces_new_threads() {
        let lua = Lua::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        instrument(&lua, move |_, thread| {
            sink.borrow_mut().push(thread_id(thread));
        })
        .unwrap();

        let co: Thread = lua
            .load("return coroutine.create(function() return 7 end)")
            .eval()
            .unwrap();
        assert_eq!(*seen.borrow(), vec![thread_id(&co)]);
        assert_eq!(co.resume::<i64>(()).unwrap(), 7);
    }

    #[test]
    fn wrap_goes_through_instrumented_create() {
        let lua = Lua::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        instrument(&lua, move |_, thread| {
            sink.borrow_mut().push(thread_id(thread));
        })
        .unwrap();

        let result: i64 = lua
            .load(
                r#"
                local gen = coroutine.wrap(function(x) return x * 2 end)
                return gen(21)
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn wrap_propagates_body_errors() {
        let lua = Lua::new();
        instrument(&lua, |_, _| {}).unwrap();

        let err = lua
            .load(
                r#"
                local boom = coroutine.wrap(function() error("kaput", 0) end)
                boom()
                "#,
            )
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("kaput"));
    }
}
