//! Stack introspection over the target state's own `debug` library.
//!
//! The bridge never reimplements stack walking; it captures the target's
//! `debug.getinfo`, `debug.getlocal`, and `debug.getupvalue` functions at
//! attach time and drives them from Rust. Capturing the function handles
//! up front means a debuggee script that later clobbers the `debug`
//! global cannot blind the bridge.
//!
//! One wrinkle: when the inspected thread is the currently running one,
//! `debug.getinfo(0)` describes `getinfo` itself, so every level must be
//! shifted by one. Suspended coroutines have no such phantom frame.

use mlua::{Function, Lua, Table, Thread, Value};

use crate::error::BridgeError;

/// Levels scanned before a stack walk gives up. Lua's own default stack
/// limit is 200 C levels, so anything deeper is runaway recursion.
const MAX_STACK_SCAN: u32 = 200;

/// What `debug.getinfo` reports about one activation record.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub name: Option<String>,
    pub what: String,
    pub source: Option<String>,
    pub short_src: Option<String>,
    pub current_line: i64,
    pub num_params: u32,
    pub is_vararg: bool,
}

impl FrameSnapshot {
    /// True for activation records of C functions, which have no
    /// source position and no inspectable locals.
    pub fn is_native(&self) -> bool {
        self.what == "C"
    }
}

/// Captured introspection entry points for one interpreter state.
pub struct Introspection {
    lua: Lua,
    getinfo: Function,
    getlocal: Function,
    getupvalue: Function,
}

impl Introspection {
    /// Capture the debug entry points from `lua`'s globals.
    ///
    /// Fails when the state was created without the `debug` library,
    /// which is the embedder's responsibility to open.
    pub fn capture(lua: &Lua) -> Result<Self, BridgeError> {
        let debug: Table = match lua.globals().get::<Value>("debug")? {
            Value::Table(t) => t,
            _ => {
                return Err(BridgeError::Lua(
                    "debug library is not loaded in the target state".to_string(),
                ))
            }
        };
        Ok(Self {
            lua: lua.clone(),
            getinfo: debug.get("getinfo")?,
            getlocal: debug.get("getlocal")?,
            getupvalue: debug.get("getupvalue")?,
        })
    }

    fn is_current(&self, thread: &Thread) -> bool {
        thread.to_pointer() == self.lua.current_thread().to_pointer()
    }

    /// Map a caller-visible frame level to a `debug.getinfo` level.
    fn effective_level(&self, thread: &Thread, level: u32) -> u32 {
        if self.is_current(thread) {
            level + 1
        } else {
            level
        }
    }

    /// Snapshot the activation record at `level`, or `None` past the
    /// bottom of the stack.
    pub fn frame(
        &self,
        thread: &Thread,
        level: u32,
    ) -> Result<Option<FrameSnapshot>, BridgeError> {
        let lv = self.effective_level(thread, level);
        let info: Option<Table> = self.getinfo.call((thread.clone(), lv, "nSlu"))?;
        let Some(info) = info else {
            return Ok(None);
        };
        Ok(Some(FrameSnapshot {
            name: info.get("name")?,
            what: info.get::<Option<String>>("what")?.unwrap_or_default(),
            source: info.get("source")?,
            short_src: info.get("short_src")?,
            current_line: info.get::<Option<i64>>("currentline")?.unwrap_or(-1),
            num_params: info.get::<Option<u32>>("nparams")?.unwrap_or(0),
            is_vararg: info.get::<Option<bool>>("isvararg")?.unwrap_or(false),
        }))
    }

    /// The function object running at `level`.
    pub fn function_at(
        &self,
        thread: &Thread,
        level: u32,
    ) -> Result<Option<Function>, BridgeError> {
        let lv = self.effective_level(thread, level);
        let info: Option<Table> = self.getinfo.call((thread.clone(), lv, "f"))?;
        match info {
            Some(info) => Ok(info.get("func")?),
            None => Ok(None),
        }
    }

    /// Read one local slot. Negative indices address varargs. Returns
    /// `None` when the slot does not exist at that level.
    pub fn local_at(
        &self,
        thread: &Thread,
        level: u32,
        index: i32,
    ) -> Result<Option<(String, Value)>, BridgeError> {
        let lv = self.effective_level(thread, level);
        let (name, value): (Option<String>, Value) =
            self.getlocal.call((thread.clone(), lv, index))?;
        Ok(name.map(|name| (name, value)))
    }

    /// Read one upvalue of `func`. Returns `None` past the last one.
    pub fn upvalue_at(
        &self,
        func: &Function,
        index: u32,
    ) -> Result<Option<(String, Value)>, BridgeError> {
        let (name, value): (Option<String>, Value) =
            self.getupvalue.call((func.clone(), index))?;
        Ok(name.map(|name| (name, value)))
    }

    /// Number of activation records on `thread`'s stack.
    pub fn stack_depth(&self, thread: &Thread) -> Result<u32, BridgeError> {
        let mut depth = 0;
        while depth < MAX_STACK_SCAN {
            if self.frame(thread, depth)?.is_none() {
                break;
            }
            depth += 1;
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Thread;

    fn debug_lua() -> Lua {
        unsafe { Lua::unsafe_new() }
    }

    fn suspended_coroutine(lua: &Lua) -> Thread {
        lua.load(
            r#"
            return coroutine.create(function(a, b)
                local sum = a + b
                coroutine.yield()
                return sum
            end)
            "#,
        )
        .eval::<Thread>()
        .unwrap()
    }

    #[test]
    fn capture_fails_without_debug_library() {
        let lua = Lua::new_with(mlua::StdLib::NONE, mlua::LuaOptions::default()).unwrap();
        let err = match Introspection::capture(&lua) {
            Ok(_) => panic!("capture should fail without the debug library"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("debug library"));
    }

    #[test]
    fn suspended_frame_reports_shape() {
        let lua = debug_lua();
        let intro = Introspection::capture(&lua).unwrap();
        let co = suspended_coroutine(&lua);
        co.resume::<()>((3, 4)).unwrap();

        // Level 0 is the C frame of coroutine.yield itself
        let top = intro.frame(&co, 0).unwrap().unwrap();
        assert!(top.is_native());

        let frame = intro.frame(&co, 1).unwrap().unwrap();
        assert_eq!(frame.what, "Lua");
        assert_eq!(frame.num_params, 2);
        assert!(!frame.is_vararg);
        assert!(frame.current_line > 0);

        assert!(intro.frame(&co, 50).unwrap().is_none());
    }

    #[test]
    fn locals_of_a_suspended_frame_are_readable() {
        let lua = debug_lua();
        let intro = Introspection::capture(&lua).unwrap();
        let co = suspended_coroutine(&lua);
        co.resume::<()>((3, 4)).unwrap();

        // Level 0 is the yield C frame; the body sits at level 1
        let (name, value) = intro.local_at(&co, 1, 1).unwrap().unwrap();
        assert_eq!(name, "a");
        assert_eq!(value, Value::Integer(3));

        let (name, value) = intro.local_at(&co, 1, 3).unwrap().unwrap();
        assert_eq!(name, "sum");
        assert_eq!(value, Value::Integer(7));
    }

    #[test]
    fn current_thread_levels_skip_the_probe_machinery() {
        let lua = debug_lua();
        let intro = Introspection::capture(&lua).unwrap();

        let probe = lua
            .create_function(move |lua, ()| {
                let here = lua.current_thread();
                // Frame 0 is this closure, frame 1 its Lua caller
                let own = intro
                    .frame(&here, 0)
                    .map_err(mlua::Error::external)?
                    .ok_or_else(|| mlua::Error::external("missing frame 0"))?;
                assert!(own.is_native());

                let caller = intro
                    .frame(&here, 1)
                    .map_err(mlua::Error::external)?
                    .ok_or_else(|| mlua::Error::external("missing frame 1"))?;
                assert_eq!(caller.what, "Lua");
                assert_eq!(caller.name.as_deref(), Some("named_caller"));
                Ok(())
            })
            .unwrap();
        lua.globals().set("probe", probe).unwrap();
        lua.load(
            r#"
            local function named_caller()
                probe()
            end
            named_caller()
            "#,
        )
        .exec()
        .unwrap();
    }

    #[test]
    fn upvalues_are_readable_by_index() {
        let lua = debug_lua();
        let intro = Introspection::capture(&lua).unwrap();
        let func: Function = lua
            .load(
                r#"
                local captured = "hello"
                return function() return captured end
                "#,
            )
            .eval()
            .unwrap();

        let (name, value) = intro.upvalue_at(&func, 1).unwrap().unwrap();
        assert_eq!(name, "captured");
        assert_eq!(value, Value::String(lua.create_string("hello").unwrap()));
        assert!(intro.upvalue_at(&func, 9).unwrap().is_none());
    }

    #[test]
    fn stack_depth_counts_suspended_frames() {
        let lua = debug_lua();
        let intro = Introspection::capture(&lua).unwrap();
        let co: Thread = lua
            .load(
                r#"
                local function inner() coroutine.yield() end
                local function outer() inner() return 1 end
                return coroutine.create(function() outer() return 2 end)
                "#,
            )
            .eval()
            .unwrap();
        co.resume::<()>(()).unwrap();

        assert_eq!(intro.stack_depth(&co).unwrap(), 4);
    }
}
