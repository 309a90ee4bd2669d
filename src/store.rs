//! Where operators' parameter sets are kept between sessions.

use std::collections::HashMap;

use crate::mode::Mode;
use crate::schema::ParameterSchema;
use crate::validate::{default_inputs, CanonicalParameterSet, RawInputs};

/// Raw per-user, per-mode parameter maps.
///
/// Stores hold plain strings; whatever comes back out goes through
/// validation again before it can be encoded.
pub trait ParameterStore {
    fn load(&self, user: &str, mode: Mode) -> Option<RawInputs>;

    fn save(&mut self, user: &str, params: &CanonicalParameterSet);

    /// Saved inputs for `user`, with schema defaults for anything not saved.
    fn load_or_defaults(&self, schema: &ParameterSchema, user: &str, mode: Mode) -> RawInputs {
        let mut inputs = default_inputs(schema, mode);
        if let Some(saved) = self.load(user, mode) {
            inputs.extend(saved);
        }
        inputs
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<(String, Mode), RawInputs>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ParameterStore for MemoryStore {
    fn load(&self, user: &str, mode: Mode) -> Option<RawInputs> {
        self.entries.get(&(user.to_string(), mode)).cloned()
    }

    fn save(&mut self, user: &str, params: &CanonicalParameterSet) {
        log::debug!("saving {} parameters for {} ({})", params.len(), user, params.mode());
        self.entries
            .insert((user.to_string(), params.mode()), params.to_raw());
    }
}
