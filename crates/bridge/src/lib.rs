//! In-process debug bridge for embedded Lua.
//!
//! Two interpreter states cooperate: a *debuggee* running user scripts
//! with a line/call/return hook installed, and a *controller* running a
//! Lua script that implements the actual debug-adapter logic. The bridge
//! sits between them, translating hook events into controller callbacks
//! and controller queries (stack traces, variable scopes, expression
//! evaluation) into introspection of the paused debuggee.
//!
//! Architecture:
//! - [`host`] owns both states and routes events and queries
//! - `hooks` installs the interpreter hook on the debuggee
//! - [`introspect`] drives the debuggee's captured `debug` library
//! - [`frames`] shapes stack and variable descriptors for clients
//! - [`handles`] packs variable references and caches composites
//! - [`eval`] evaluates expressions in a paused frame's scope
//! - [`threads`] tracks coroutine identity and lifecycle
//! - [`callbacks`] resolves the controller's entry points
//!
//! Everything is single-threaded and synchronous: a hook event does not
//! return to the debuggee until the controller callback does.

pub mod callbacks;
pub mod error;
pub mod eval;
pub mod frames;
pub mod handles;
mod hooks;
pub mod host;
pub mod introspect;
pub mod threads;
pub mod value;

pub use error::BridgeError;
pub use frames::{FrameEntry, SourceRef, VarEntry, MAX_EXPAND_MEMBERS};
pub use handles::{decode_var_ref, encode_scope_ref, HandleCache, ScopeKind};
pub use host::BridgeHost;
pub use introspect::{FrameSnapshot, Introspection};
pub use threads::{thread_id, ThreadId, ThreadRegistry};
pub use value::{display_value, format_lua_error, type_tag, MAX_TEXT_LEN};
