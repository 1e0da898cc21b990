use crate::state::{ScriptState, ScriptStr, ScriptValue};
use std::collections::HashMap;

/// Maps interned member names to their position in a member list.
///
/// Matching compares the identity of the runtime's interned string, so a
/// lookup is one hash probe regardless of name length.
#[derive(Debug, Default)]
pub struct MemberMatcher {
    names: Vec<ScriptStr>,
    positions: HashMap<usize, usize>,
}

impl MemberMatcher {
    /// Interns `names` in `state`. Duplicate names keep their first position.
    pub fn intern<S: AsRef<str>>(state: &mut ScriptState, names: &[S]) -> Self {
        let mut matcher = MemberMatcher {
            names: Vec::with_capacity(names.len()),
            positions: HashMap::with_capacity(names.len()),
        };
        for (position, name) in names.iter().enumerate() {
            let interned = state.intern(name.as_ref());
            matcher.positions.entry(interned.identity()).or_insert(position);
            matcher.names.push(interned);
        }
        matcher
    }

    pub fn match_value(&self, key: &ScriptValue) -> Option<usize> {
        match key {
            ScriptValue::String(text) => self.positions.get(&text.identity()).copied(),
            _ => None,
        }
    }

    /// `match(stackSlot)`
    pub fn match_slot(&self, state: &ScriptState, idx: usize) -> Option<usize> {
        state.slot(idx).and_then(|key| self.match_value(key))
    }

    pub fn name(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(ScriptStr::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
