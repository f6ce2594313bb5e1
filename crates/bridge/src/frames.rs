//! Frame and variable descriptors served to the debug client.
//!
//! The walker turns raw introspection results into the flat descriptor
//! lists a protocol layer can serialize directly: stack traces, scope
//! variable lists, and lazy member expansion of composite values.

use std::cell::RefCell;

use mlua::{Table, Thread, Value};
use serde::Serialize;

use crate::error::BridgeError;
use crate::handles::HandleCache;
use crate::introspect::{FrameSnapshot, Introspection};
use crate::value::{display_value, type_tag};

/// Cap on members reported when expanding one composite value. Huge
/// tables stay browsable without flooding the client.
pub const MAX_EXPAND_MEMBERS: usize = 100;

/// One named value in a scope or expansion result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VarEntry {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Non-zero when the value can be expanded further.
    pub variables_reference: i64,
}

/// Where a frame's code lives, if anywhere the client can open.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<&'static str>,
}

/// One stack frame in a trace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEntry {
    pub id: u32,
    pub name: String,
    pub source: SourceRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// Builds descriptor lists for one interpreter state, assigning handle
/// ids through the shared cache as it goes.
pub struct FrameWalker<'a> {
    intro: &'a Introspection,
    cache: &'a RefCell<HandleCache>,
}

impl<'a> FrameWalker<'a> {
    pub fn new(intro: &'a Introspection, cache: &'a RefCell<HandleCache>) -> Self {
        Self { intro, cache }
    }

    fn entry(&self, name: String, value: &Value) -> VarEntry {
        let variables_reference = match value {
            Value::Table(t) => self.cache.borrow_mut().get_or_assign(t),
            _ => 0,
        };
        VarEntry {
            name,
            value: display_value(value),
            type_name: type_tag(value).to_string(),
            variables_reference,
        }
    }

    fn frame_or_invalid(
        &self,
        thread: &Thread,
        level: u32,
    ) -> Result<FrameSnapshot, BridgeError> {
        self.intro
            .frame(thread, level)?
            .ok_or(BridgeError::InvalidFrame(i64::from(level)))
    }

    /// Named parameters of the frame, varargs included.
    pub fn params(&self, thread: &Thread, level: u32) -> Result<Vec<VarEntry>, BridgeError> {
        let frame = self.frame_or_invalid(thread, level)?;
        if frame.is_native() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for index in 1..=frame.num_params as i32 {
            if let Some((name, value)) = self.intro.local_at(thread, level, index)? {
                out.push(self.entry(name, &value));
            }
        }
        if frame.is_vararg {
            let mut index = -1;
            while let Some((_, value)) = self.intro.local_at(thread, level, index)? {
                out.push(self.entry(format!("vararg{}", -index), &value));
                index -= 1;
            }
        }
        Ok(out)
    }

    /// Locals declared in the frame body, parameters and the
    /// interpreter's internal `(...)` slots excluded.
    pub fn locals(&self, thread: &Thread, level: u32) -> Result<Vec<VarEntry>, BridgeError> {
        let frame = self.frame_or_invalid(thread, level)?;
        if frame.is_native() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut index = frame.num_params as i32 + 1;
        while let Some((name, value)) = self.intro.local_at(thread, level, index)? {
            if !name.starts_with('(') {
                out.push(self.entry(name, &value));
            }
            index += 1;
        }
        Ok(out)
    }

    /// Upvalues captured by the frame's function.
    pub fn upvalues(&self, thread: &Thread, level: u32) -> Result<Vec<VarEntry>, BridgeError> {
        self.frame_or_invalid(thread, level)?;
        let Some(func) = self.intro.function_at(thread, level)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut index = 1;
        while let Some((name, value)) = self.intro.upvalue_at(&func, index)? {
            // C closures report upvalues with empty names
            if !name.is_empty() {
                out.push(self.entry(name, &value));
            }
            index += 1;
        }
        Ok(out)
    }

    /// Members of a cached composite value, capped at
    /// [`MAX_EXPAND_MEMBERS`] entries.
    pub fn expand_members(&self, table: &Table) -> Result<Vec<VarEntry>, BridgeError> {
        let mut out = Vec::new();
        for pair in table.pairs::<Value, Value>().take(MAX_EXPAND_MEMBERS) {
            let (key, value) = pair?;
            out.push(self.entry(display_value(&key), &value));
        }
        Ok(out)
    }

    /// Walk the stack top-down into client-facing frame entries.
    pub fn list_frames(
        &self,
        thread: &Thread,
        max_frames: u32,
    ) -> Result<Vec<FrameEntry>, BridgeError> {
        let mut out = Vec::new();
        for level in 0..max_frames {
            let Some(frame) = self.intro.frame(thread, level)? else {
                break;
            };
            out.push(self.frame_entry(level, &frame));
        }
        Ok(out)
    }

    fn frame_entry(&self, level: u32, frame: &FrameSnapshot) -> FrameEntry {
        let name = match frame.name.clone() {
            Some(name) => name,
            None if frame.what == "main" => "main chunk".to_string(),
            None => "?".to_string(),
        };

        // A leading '@' marks sources loaded from a file the client can
        // open; everything else (native frames, string chunks) gets
        // deemphasized instead of a path.
        let file_path = frame
            .source
            .as_deref()
            .filter(|_| frame.what == "Lua" || frame.what == "main")
            .and_then(|src| src.strip_prefix('@'))
            .map(str::to_string);

        let (source, column) = match file_path {
            Some(path) => (
                SourceRef {
                    path: Some(path),
                    presentation_hint: None,
                },
                Some(1),
            ),
            None => (
                SourceRef {
                    path: None,
                    presentation_hint: Some("deemphasize"),
                },
                None,
            ),
        };

        FrameEntry {
            id: level,
            name,
            source,
            line: (frame.current_line > 0).then_some(frame.current_line),
            column,
        }
    }
}
