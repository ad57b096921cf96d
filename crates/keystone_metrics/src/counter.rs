//! Named counters for tracking store events

use std::collections::HashMap;

/// Monotonic event counters keyed by static names.
#[derive(Debug, Default, Clone)]
pub struct Counter {
    counters: HashMap<&'static str, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
        }
    }

    pub fn increment(&mut self, name: &'static str, value: usize) {
        *self.counters.entry(name).or_insert(0) += value;
    }

    pub fn get(&self, name: &str) -> usize {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    /// All counters sorted by name, for stable log output.
    pub fn snapshot(&self) -> Vec<(&'static str, usize)> {
        let mut out: Vec<_> = self.counters.iter().map(|(k, v)| (*k, *v)).collect();
        out.sort_unstable_by_key(|(k, _)| *k);
        out
    }
}
