/// Last-known device metadata as a flat string mapping.
use std::collections::HashMap;

/// Aggregated device metadata (`"ProductType" -> "iPhone14,5"`, ...).
///
/// Key order is irrelevant; two states are equal when they hold the same
/// pairs. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    values: HashMap<String, String>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Pairs sorted by key, for stable display.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        pairs
    }

    /// Merge another mapping into this one; later values win on key clashes.
    pub fn extend(&mut self, other: DeviceState) {
        self.values.extend(other.values);
    }
}

impl From<HashMap<String, String>> for DeviceState {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_insertion_order() {
        let a: DeviceState = [("a", "1"), ("b", "2")].into_iter().collect();
        let b: DeviceState = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn sorted_is_by_key() {
        let s: DeviceState = [("z", "1"), ("a", "2")].into_iter().collect();
        assert_eq!(s.sorted(), vec![("a", "2"), ("z", "1")]);
    }
}
