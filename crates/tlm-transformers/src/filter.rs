// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload key filter

use std::collections::BTreeSet;

/// Filter entry that permits every key.
pub const WILDCARD: &str = "*";

/// Set of top-level payload keys a transformer keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyFilter {
    /// Keep every key
    #[default]
    All,
    /// Keep only the listed keys
    Only(BTreeSet<String>),
}

impl KeyFilter {
    /// Build a filter from configured entries.
    ///
    /// Any `"*"` entry, or an empty list, yields [`KeyFilter::All`].
    pub fn from_list<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for key in keys {
            let key = key.into();
            if key == WILDCARD {
                return KeyFilter::All;
            }
            set.insert(key);
        }

        if set.is_empty() {
            KeyFilter::All
        } else {
            KeyFilter::Only(set)
        }
    }

    pub fn permits(&self, key: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Only(keys) => keys.contains(key),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, KeyFilter::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_filter_from_list() {
        let filter = KeyFilter::from_list(["key1", "key2"]);
        assert!(filter.permits("key1"));
        assert!(filter.permits("key2"));
        assert!(!filter.permits("key3"));
        assert!(!filter.is_wildcard());
    }

    #[test]
    fn test_key_filter_wildcard() {
        assert!(KeyFilter::from_list(["key1", "*"]).is_wildcard());
        assert!(KeyFilter::from_list(Vec::<String>::new()).is_wildcard());
        assert!(KeyFilter::default().permits("anything"));
    }
}
