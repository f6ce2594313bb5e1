use std::fmt;

/// Error type for bridge operations.
///
/// User-facing variants render as plain text; the controller script is
/// responsible for mapping them onto whatever protocol schema the debug
/// client speaks. Nothing here is fatal to the debuggee process.
#[derive(Debug)]
pub enum BridgeError {
    /// Script failed to load, compile, or run (`run_script`).
    Load(String),
    /// Both evaluation strategies failed for an expression.
    Eval(String),
    /// The requested stack level does not exist.
    InvalidFrame(i64),
    /// Variable reference decoded to an unknown scope kind.
    InvalidScope(i64),
    /// Handle was issued before the last stop event and is no longer valid.
    StaleHandle(i64),
    /// Thread handle does not map to a live execution context.
    UnknownThread(i64),
    /// Internal interpreter failure (bad state, allocation, conversion).
    Lua(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(msg) => write!(f, "{msg}"),
            Self::Eval(msg) => write!(f, "{msg}"),
            Self::InvalidFrame(_) => write!(f, "frameId invalid"),
            Self::InvalidScope(_) => write!(f, "scope invalid"),
            Self::StaleHandle(_) => write!(f, "variable invalid"),
            Self::UnknownThread(_) => write!(f, "unknown thread"),
            Self::Lua(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<mlua::Error> for BridgeError {
    fn from(error: mlua::Error) -> Self {
        Self::Lua(crate::value::format_lua_error(&error))
    }
}
