//! Variable-reference encoding and the per-stop handle cache.
//!
//! A variable reference packs `(scope kind, frame level, object id)` into
//! one integer so the debug client can hand it back opaquely. When the
//! object id is zero the reference addresses a frame's parameter, local,
//! or upvalue list; otherwise it addresses a composite value cached here
//! for lazy drill-down.
//!
//! The cache is only meaningful between two consecutive stop events:
//! once the debuggee resumes, every cached value and frame level is
//! stale, so the cache must be cleared at the start of each stop.

use std::collections::HashMap;

use mlua::Table;

/// Radix span reserved for object ids inside a packed reference.
pub const MEMBER_ID_SPAN: i64 = 10_000_000;

/// Radix span reserved for frame levels inside a packed reference.
pub const LEVEL_SPAN: i64 = 100;

/// Which variable list of a frame a scope reference addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Params = 1,
    Locals = 2,
    Upvalues = 3,
}

impl ScopeKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Params),
            2 => Some(Self::Locals),
            3 => Some(Self::Upvalues),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Pack a frame-scope reference (object id zero).
pub fn encode_scope_ref(kind: ScopeKind, level: u32) -> i64 {
    (kind.code() * LEVEL_SPAN + i64::from(level)) * MEMBER_ID_SPAN
}

/// Unpack a variable reference into `(kind code, level, object id)`.
///
/// The kind code is returned raw; callers validate it through
/// [`ScopeKind::from_code`] only when the object id is zero.
pub fn decode_var_ref(var_ref: i64) -> (i64, u32, i64) {
    let id = var_ref % MEMBER_ID_SPAN;
    let scope = var_ref / MEMBER_ID_SPAN;
    ((scope / LEVEL_SPAN), (scope % LEVEL_SPAN) as u32, id)
}

/// Cache of composite values addressable by object id for one stop event.
///
/// Both directions are kept: id to value for `resolve`, and value
/// identity (address) to id so repeated references to the same table
/// reuse one id within an episode.
#[derive(Default)]
pub struct HandleCache {
    by_id: HashMap<i64, Table>,
    ids: HashMap<usize, i64>,
    next_id: i64,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every mapping and reset the id generator.
    ///
    /// Must run exactly once at the start of every stop event, before
    /// any frame or member query for that event.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.ids.clear();
        self.next_id = 0;
    }

    /// Return the id already assigned to `table`, or assign the next one.
    pub fn get_or_assign(&mut self, table: &Table) -> i64 {
        let identity = table.to_pointer() as usize;
        if let Some(&id) = self.ids.get(&identity) {
            return id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_id.insert(id, table.clone());
        self.ids.insert(identity, id);
        id
    }

    /// Look up a previously cached value.
    ///
    /// `None` after a `clear` is the normal stale-handle case, not a
    /// corruption signal.
    pub fn resolve(&self, id: i64) -> Option<Table> {
        self.by_id.get(&id).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    #[test]
    fn scope_refs_decode_to_their_parts() {
        for kind in [ScopeKind::Params, ScopeKind::Locals, ScopeKind::Upvalues] {
            for level in [0u32, 1, 17, 99] {
                let r = encode_scope_ref(kind, level);
                let (k, l, id) = decode_var_ref(r);
                assert_eq!(k, kind.code());
                assert_eq!(l, level);
                assert_eq!(id, 0);
            }
        }
    }

    #[test]
    fn scope_refs_are_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for kind in [ScopeKind::Params, ScopeKind::Locals, ScopeKind::Upvalues] {
            for level in 0..100u32 {
                assert!(seen.insert(encode_scope_ref(kind, level)));
            }
        }
    }

    #[test]
    fn member_ids_decode_with_zero_kind() {
        let (kind, level, id) = decode_var_ref(12345);
        assert_eq!(kind, 0);
        assert_eq!(level, 0);
        assert_eq!(id, 12345);
    }

    #[test]
    fn id_survives_round_trip_inside_scope_ref() {
        let base = encode_scope_ref(ScopeKind::Locals, 3);
        let (kind, level, id) = decode_var_ref(base + 9_999_999);
        assert_eq!(kind, 2);
        assert_eq!(level, 3);
        assert_eq!(id, 9_999_999);
    }

    #[test]
    fn cache_round_trips_by_identity() {
        let lua = Lua::new();
        let mut cache = HandleCache::new();
        let t = lua.create_table().unwrap();

        let id = cache.get_or_assign(&t);
        assert!(id > 0);
        let resolved = cache.resolve(id).unwrap();
        assert_eq!(resolved.to_pointer(), t.to_pointer());
    }

    #[test]
    fn assignment_is_idempotent_within_an_episode() {
        let lua = Lua::new();
        let mut cache = HandleCache::new();
        let t = lua.create_table().unwrap();

        let first = cache.get_or_assign(&t);
        let second = cache.get_or_assign(&t);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_tables_get_distinct_ids() {
        let lua = Lua::new();
        let mut cache = HandleCache::new();
        let a = lua.create_table().unwrap();
        let b = lua.create_table().unwrap();
        assert_ne!(cache.get_or_assign(&a), cache.get_or_assign(&b));
    }

    #[test]
    fn clear_invalidates_issued_ids() {
        let lua = Lua::new();
        let mut cache = HandleCache::new();
        let t = lua.create_table().unwrap();
        let id = cache.get_or_assign(&t);

        cache.clear();
        assert!(cache.resolve(id).is_none());

        // Ids restart from one in the next episode
        assert_eq!(cache.get_or_assign(&t), 1);
    }
}
