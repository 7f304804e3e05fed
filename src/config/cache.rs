use std::collections::HashMap;

/// How a cached path was rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Mode {
    /// Printed for string lookups.
    Display,
    /// Serialized by the loader codec for typed lookups.
    Encoded,
}

/// Memoized path renderings for one property source.
///
/// Both modes of the same path are kept side by side, so a string lookup
/// never hands its printed form to a typed lookup.
#[derive(Debug, Default)]
pub(crate) struct ResolutionCache {
    entries: HashMap<(Mode, String), String>,
}

impl ResolutionCache {
    pub(crate) fn get(&self, mode: Mode, path: &str) -> Option<&str> {
        self.entries
            .get(&(mode, path.to_string()))
            .map(String::as_str)
    }

    pub(crate) fn insert(&mut self, mode: Mode, path: &str, rendered: String) {
        self.entries.insert((mode, path.to_string()), rendered);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
