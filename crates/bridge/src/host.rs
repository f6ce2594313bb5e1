//! The bridge host: owns both interpreter states and wires them together.
//!
//! Two states live side by side. The debuggee runs user scripts with the
//! hook installed on its main thread; the controller runs the debug
//! adapter logic and sees the debuggee only through the `bridge` module
//! and plain-data callback arguments. No reference value ever crosses
//! between the two states, only integers and strings.
//!
//! Event flow is strictly synchronous: a hook event calls straight into
//! the controller callback, which may issue any number of bridge queries
//! before returning, at which point the debuggee resumes.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::{Rc, Weak};

use mlua::{
    DebugEvent, Function, IntoLuaMulti, Lua, LuaSerdeExt, Table, Thread, Value, Variadic,
};

use crate::callbacks::{self, CallbackError, Callbacks};
use crate::error::BridgeError;
use crate::eval::Evaluator;
use crate::frames::{FrameEntry, FrameWalker, VarEntry};
use crate::handles::{decode_var_ref, encode_scope_ref, HandleCache, ScopeKind};
use crate::hooks;
use crate::introspect::Introspection;
use crate::threads::{self, thread_id, ThreadId, ThreadRegistry};
use crate::value::format_lua_error;

/// Default frame count served when the controller does not cap a trace.
const DEFAULT_MAX_FRAMES: u32 = 64;

/// Debug bridge between a debuggee state and its controller script.
///
/// Dropping the host removes the hook and fires the controller's
/// `on_stop` callback.
pub struct BridgeHost {
    shared: Rc<BridgeShared>,
}

struct BridgeShared {
    debuggee: Lua,
    controller: Lua,
    introspect: Introspection,
    callbacks: RefCell<Callbacks>,
    cache: RefCell<HandleCache>,
    threads: RefCell<ThreadRegistry>,
    main_thread: Thread,
    /// Re-entrancy latch: while a controller callback (or an eval it
    /// requested) is running debuggee code, hook events are dropped.
    busy: Cell<bool>,
}

impl BridgeHost {
    /// Attach a controller script to `debuggee` and start delivering
    /// events.
    ///
    /// The debuggee must have its `debug` library open; opening it is
    /// the embedder's decision since it is what makes the state
    /// debuggable in the first place.
    pub fn new(debuggee: Lua, controller_script: &Path) -> Result<Self, BridgeError> {
        let controller = Lua::new();
        let introspect = Introspection::capture(&debuggee)?;
        let main_thread = debuggee.current_thread();

        let shared = Rc::new(BridgeShared {
            debuggee: debuggee.clone(),
            controller: controller.clone(),
            introspect,
            callbacks: RefCell::new(Callbacks::new()),
            cache: RefCell::new(HandleCache::new()),
            threads: RefCell::new(ThreadRegistry::new()),
            main_thread,
            busy: Cell::new(false),
        });

        // Controller modules resolve next to the controller script
        let origin = controller_script
            .parent()
            .filter(|p| !p.as_os_str().is_empty());
        if let Some(origin) = origin {
            add_search_paths(&controller, Some(&module_search_path(origin)), None)?;
        }

        let weak = Rc::downgrade(&shared);
        threads::instrument(&debuggee, {
            let weak = weak.clone();
            move |_, thread| {
                if let Some(shared) = weak.upgrade() {
                    shared.adopt_thread(thread);
                }
            }
        })?;
        install_print_override(&debuggee, weak.clone())?;
        register_bridge_module(&controller, weak.clone())?;

        run_controller_script(&controller, controller_script);
        shared.callbacks.borrow_mut().resolve(&controller)?;

        // Only now is it safe to start the event flood
        hooks::install(&debuggee, {
            let weak = weak.clone();
            move |lua, event| {
                if let Some(shared) = weak.upgrade() {
                    shared.dispatch_hook_event(lua, event);
                }
            }
        });

        shared.invoke_callback(callbacks::ON_START, ());
        let main_id = shared.threads.borrow_mut().register(&shared.main_thread);
        shared.invoke_callback(callbacks::ON_NEW_THREAD, main_id);

        Ok(Self { shared })
    }

    /// Hand control to the controller's request loop.
    pub fn handle_request(&self) -> Result<(), BridgeError> {
        let func = self
            .shared
            .callbacks
            .borrow()
            .get(callbacks::HANDLE_REQUEST)
            .map_err(|e| BridgeError::Lua(e.to_string()))?;
        func.call::<()>(())
            .map_err(|e| BridgeError::Lua(format_lua_error(&e)))
    }

    /// Forward a diagnostic line to the controller, silently dropped
    /// when the controller declares no `debuglog`.
    pub fn debug_log(&self, text: &str) {
        let func = match self.shared.callbacks.borrow().get(callbacks::DEBUGLOG) {
            Ok(func) => func,
            Err(_) => return,
        };
        if let Err(err) = func.call::<()>(text) {
            eprintln!("call {} failed: {}", callbacks::DEBUGLOG, format_lua_error(&err));
        }
    }

    /// Load and run a debuggee script with arguments, under the hook.
    pub fn run_script(&self, path: &Path, args: &[String]) -> Result<(), BridgeError> {
        self.shared.run_script(path, args)
    }

    /// Extend the debuggee's module search paths.
    pub fn add_search_paths(
        &self,
        path: Option<&str>,
        cpath: Option<&str>,
    ) -> Result<(), BridgeError> {
        add_search_paths(&self.shared.debuggee, path, cpath)
    }

    pub fn main_thread_id(&self) -> ThreadId {
        thread_id(&self.shared.main_thread)
    }

    pub fn debuggee(&self) -> &Lua {
        &self.shared.debuggee
    }

    pub fn controller(&self) -> &Lua {
        &self.shared.controller
    }
}

impl Drop for BridgeHost {
    fn drop(&mut self) {
        hooks::clear(&self.shared.debuggee);
        self.shared.invoke_callback(callbacks::ON_STOP, ());
    }
}

impl BridgeShared {
    /// Call a controller callback, reporting failures to stderr rather
    /// than letting them unwind into the debuggee.
    fn invoke_callback(&self, name: &'static str, args: impl IntoLuaMulti) {
        let func = match self.callbacks.borrow().get(name) {
            Ok(func) => func,
            Err(CallbackError::Missing(_)) if missing_is_silent(name) => return,
            Err(err) => {
                eprintln!("{err}");
                return;
            }
        };
        if let Err(err) = func.call::<()>(args) {
            eprintln!("{}", CallbackError::Failed(name, format_lua_error(&err)));
        }
    }

    fn adopt_thread(&self, thread: &Thread) {
        let id = self.threads.borrow_mut().register(thread);
        self.invoke_callback(callbacks::ON_NEW_THREAD, id);
    }

    fn dispatch_hook_event(&self, lua: &Lua, event: DebugEvent) {
        if self.busy.get() {
            return;
        }
        let thread = lua.current_thread();
        let id = thread_id(&thread);

        // Frame 0 is the function the event happened in
        let frame = match self.introspect.frame(&thread, 0) {
            Ok(Some(frame)) => frame,
            _ => return,
        };
        let source = frame.source.clone().or(frame.short_src.clone());

        self.busy.set(true);
        match event {
            DebugEvent::Call | DebugEvent::TailCall => {
                let depth = self.introspect.stack_depth(&thread).unwrap_or(0);
                self.invoke_callback(
                    callbacks::ON_CALL,
                    (id, source, frame.what, frame.name, frame.current_line, depth),
                );
            }
            DebugEvent::Ret => {
                let depth = self.introspect.stack_depth(&thread).unwrap_or(0);
                self.invoke_callback(
                    callbacks::ON_RETURN,
                    (id, source, frame.what, frame.name, frame.current_line, depth),
                );
            }
            DebugEvent::Line => {
                self.invoke_callback(
                    callbacks::ON_LINE,
                    (id, source, frame.what, frame.name, frame.current_line),
                );
            }
            _ => {}
        }
        self.busy.set(false);
    }

    /// Deliver one captured `print` call to the controller, attributed
    /// to the debuggee source line that issued it when known.
    fn emit_output(&self, lua: &Lua, text: String) {
        let thread = lua.current_thread();
        // Frame 0 is the print closure itself; its caller is frame 1
        match self.introspect.frame(&thread, 1) {
            Ok(Some(frame)) if frame.current_line > 0 => {
                let source = frame.source.or(frame.short_src);
                self.invoke_callback(
                    callbacks::ON_OUTPUT,
                    (text, source, frame.current_line),
                );
            }
            _ => {
                self.invoke_callback(callbacks::ON_OUTPUT, (text, Value::Nil, -1));
            }
        }
    }

    fn run_script(&self, path: &Path, args: &[String]) -> Result<(), BridgeError> {
        let source = fs::read_to_string(path)
            .map_err(|e| BridgeError::Load(format!("{}: {e}", path.display())))?;
        let func = self
            .debuggee
            .load(&source)
            .set_name(format!("@{}", path.display()))
            .into_function()
            .map_err(|e| BridgeError::Load(format_lua_error(&e)))?;
        let args = Variadic::from_iter(args.iter().cloned());
        func.call::<()>(args)
            .map_err(|e| BridgeError::Load(format_lua_error(&e)))
    }

    fn resolve_thread(&self, id: ThreadId) -> Result<Thread, BridgeError> {
        self.threads
            .borrow()
            .resolve(id)
            .ok_or(BridgeError::UnknownThread(id))
    }

    fn list_frames(
        &self,
        id: ThreadId,
        max_frames: u32,
    ) -> Result<Vec<FrameEntry>, BridgeError> {
        let thread = self.resolve_thread(id)?;
        FrameWalker::new(&self.introspect, &self.cache).list_frames(&thread, max_frames)
    }

    fn get_vars(&self, id: ThreadId, var_ref: i64) -> Result<Vec<VarEntry>, BridgeError> {
        let thread = self.resolve_thread(id)?;
        let (kind_code, level, object_id) = decode_var_ref(var_ref);
        let walker = FrameWalker::new(&self.introspect, &self.cache);
        if object_id == 0 {
            match ScopeKind::from_code(kind_code) {
                Some(ScopeKind::Params) => walker.params(&thread, level),
                Some(ScopeKind::Locals) => walker.locals(&thread, level),
                Some(ScopeKind::Upvalues) => walker.upvalues(&thread, level),
                None => Err(BridgeError::InvalidScope(var_ref)),
            }
        } else {
            let table = self
                .cache
                .borrow()
                .resolve(object_id)
                .ok_or(BridgeError::StaleHandle(object_id))?;
            walker.expand_members(&table)
        }
    }

    fn evaluate(&self, id: ThreadId, level: u32, input: &str) -> Result<String, BridgeError> {
        let thread = self.resolve_thread(id)?;
        Evaluator::new(&self.debuggee, &self.introspect).evaluate(&thread, level, input)
    }

    /// Sweep finished coroutines out of the registry, announcing each.
    fn reap_threads(&self) {
        let dead = self.threads.borrow_mut().take_dead();
        for id in dead {
            self.invoke_callback(callbacks::ON_FREE_THREAD, id);
        }
    }
}

/// Whether an undeclared callback may be skipped without operator
/// noise. Only the optional `debuglog` qualifies; a controller missing
/// any event callback is a configuration error worth reporting.
fn missing_is_silent(name: &str) -> bool {
    name == callbacks::DEBUGLOG
}

/// `?`-pattern search entries for modules living next to `origin`.
fn module_search_path(origin: &Path) -> String {
    format!("{0}/?.lua;{0}/?/init.lua", origin.display())
}

/// Append entries to `package.path` / `package.cpath`, skipping
/// additions already present so repeated configuration stays idempotent.
fn add_search_paths(
    lua: &Lua,
    path: Option<&str>,
    cpath: Option<&str>,
) -> Result<(), BridgeError> {
    let package: Table = lua.globals().get("package")?;
    for (key, addition) in [("path", path), ("cpath", cpath)] {
        let Some(addition) = addition else {
            continue;
        };
        if addition.is_empty() {
            continue;
        }
        let current: String = package.get(key)?;
        if !current.contains(addition) {
            package.set(key, format!("{current};{addition}"))?;
        }
    }
    Ok(())
}

fn install_print_override(debuggee: &Lua, weak: Weak<BridgeShared>) -> Result<(), BridgeError> {
    // Capture the real tostring so __tostring metamethods keep working
    let tostring: Function = debuggee.globals().get("tostring")?;
    let print = debuggee.create_function(move |lua, parts: Variadic<Value>| {
        let Some(shared) = weak.upgrade() else {
            return Ok(());
        };
        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts.iter() {
            let piece: mlua::String = tostring.call(part.clone())?;
            pieces.push(piece.to_string_lossy().to_string());
        }
        let mut text = pieces.join("\t");
        text.push('\n');
        shared.emit_output(lua, text);
        Ok(())
    })?;
    debuggee.globals().set("print", print)?;
    Ok(())
}

fn run_controller_script(controller: &Lua, script: &Path) {
    let source = match fs::read_to_string(script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}: {err}", script.display());
            return;
        }
    };
    let result = controller
        .load(&source)
        .set_name(format!("@{}", script.display()))
        .exec();
    if let Err(err) = result {
        eprintln!("{}", format_lua_error(&err));
    }
}

/// Expose the bridge operations to the controller state as the `bridge`
/// module. Every function returns `(true, ...)` on success and
/// `(false, message)` on failure, the usual Lua protected-call shape.
fn register_bridge_module(
    controller: &Lua,
    weak: Weak<BridgeShared>,
) -> Result<(), BridgeError> {
    let bridge = controller.create_table()?;

    let upgrade = move || {
        weak.upgrade()
            .ok_or_else(|| mlua::Error::external("bridge detached"))
    };

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "run_script",
            controller.create_function(move |_, (path, args): (String, Variadic<String>)| {
                let shared = upgrade()?;
                match shared.run_script(Path::new(&path), &args) {
                    Ok(()) => Ok((true, None::<String>)),
                    Err(err) => Ok((false, Some(err.to_string()))),
                }
            })?,
        )?;
    }

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "list_frames",
            controller.create_function(
                move |lua, (id, max_frames): (ThreadId, Option<u32>)| {
                    let shared = upgrade()?;
                    let max_frames = max_frames.unwrap_or(DEFAULT_MAX_FRAMES);
                    match shared.list_frames(id, max_frames) {
                        Ok(frames) => Ok((true, lua.to_value(&frames)?)),
                        Err(err) => Ok((false, lua.to_value(&err.to_string())?)),
                    }
                },
            )?,
        )?;
    }

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "start_frame",
            controller.create_function(move |_, id: ThreadId| {
                let shared = upgrade()?;
                shared.resolve_thread(id).map_err(mlua::Error::external)?;
                shared.cache.borrow_mut().clear();
                Ok(())
            })?,
        )?;
    }

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "get_vars",
            controller.create_function(move |lua, (id, var_ref): (ThreadId, i64)| {
                let shared = upgrade()?;
                match shared.get_vars(id, var_ref) {
                    Ok(vars) => Ok((true, lua.to_value(&vars)?)),
                    Err(err) => Ok((false, lua.to_value(&err.to_string())?)),
                }
            })?,
        )?;
    }

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "evaluate",
            controller.create_function(
                move |_, (id, input, level): (ThreadId, String, u32)| {
                    let shared = upgrade()?;
                    match shared.evaluate(id, level, &input) {
                        Ok(result) => Ok((true, result)),
                        Err(err) => Ok((false, err.to_string())),
                    }
                },
            )?,
        )?;
    }

    bridge.set(
        "scope_ref",
        controller.create_function(move |_, (kind_code, level): (i64, u32)| {
            Ok(ScopeKind::from_code(kind_code).map(|kind| encode_scope_ref(kind, level)))
        })?,
    )?;

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "add_search_paths",
            controller.create_function(
                move |_, (path, cpath): (Option<String>, Option<String>)| {
                    let shared = upgrade()?;
                    add_search_paths(&shared.debuggee, path.as_deref(), cpath.as_deref())
                        .map_err(mlua::Error::external)
                },
            )?,
        )?;
    }

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "reap_threads",
            controller.create_function(move |_, ()| {
                upgrade()?.reap_threads();
                Ok(())
            })?,
        )?;
    }

    {
        let upgrade = upgrade.clone();
        bridge.set(
            "main_thread",
            controller.create_function(move |_, ()| {
                Ok(thread_id(&upgrade()?.main_thread))
            })?,
        )?;
    }

    controller.globals().set("bridge", &bridge)?;
    let loaded: Table = controller
        .globals()
        .get::<Table>("package")?
        .get("loaded")?;
    loaded.set("bridge", bridge)?;
    Ok(())
}
