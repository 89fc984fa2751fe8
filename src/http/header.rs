//! Ordered, case-insensitive multi-map of header fields.

/// One header name with every value received for it, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

impl HeaderEntry {
    /// Header name, spelled as first seen.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All values in insertion order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Header table keyed by case-insensitive name.
///
/// Names keep the spelling of their first insertion; values accumulate in
/// insertion order. Entries iterate in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    entries: Vec<HeaderEntry>,
}

impl HeaderTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Append a value under `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].values.push(value),
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value],
            }),
        }
    }

    /// Replace every value of `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].values = vec![value],
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value],
            }),
        }
    }

    /// Whether `name` has at least one value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_at(name, 0)
    }

    /// The `index`-th value of `name`.
    #[must_use]
    pub fn get_at(&self, name: &str, index: usize) -> Option<&str> {
        self.position(name)
            .and_then(|idx| self.entries[idx].values.get(index))
            .map(String::as_str)
    }

    /// Every value of `name`, empty if absent.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name)
            .map_or(&[][..], |idx| self.entries[idx].values.as_slice())
    }

    /// Remove `name` and all its values. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove the `index`-th value of `name`, dropping the name once no
    /// value remains.
    pub fn remove_at(&mut self, name: &str, index: usize) -> Option<String> {
        let idx = self.position(name)?;
        let entry = &mut self.entries[idx];
        if index >= entry.values.len() {
            return None;
        }
        let value = entry.values.remove(index);
        if entry.values.is_empty() {
            self.entries.remove(idx);
        }
        Some(value)
    }

    /// Number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table holds no names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate entries in order of first appearance.
    pub fn iter(&self) -> std::slice::Iter<'_, HeaderEntry> {
        self.entries.iter()
    }

    /// Iterate `(name, value)` pairs, one per value.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|entry| {
            entry
                .values
                .iter()
                .map(move |value| (entry.name.as_str(), value.as_str()))
        })
    }

    /// Serialize as `Name: value\r\n` lines, one per value.
    ///
    /// The terminating blank line is not included.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (name, value) in self.pairs() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
}

impl<'a> IntoIterator for &'a HeaderTable {
    type Item = &'a HeaderEntry;
    type IntoIter = std::slice::Iter<'a, HeaderEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderTable {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, value) in iter {
            table.append(name, value);
        }
        table
    }
}
