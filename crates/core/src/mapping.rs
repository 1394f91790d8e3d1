//! Legacy template identifier -> output qualifier table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Static symbolic mapping from legacy (qualified) identifiers to the
/// short qualifiers used to name generated outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable(BTreeMap<String, String>);

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, legacy: impl Into<String>, qualifier: impl Into<String>) {
        self.0.insert(legacy.into(), qualifier.into());
    }

    /// Look up the qualifier of `legacy`, failing hard when unmapped.
    pub fn qualifier(&self, legacy: &str) -> Result<&str> {
        self.0
            .get(legacy)
            .map(String::as_str)
            .ok_or_else(|| MigrateError::UnknownQualifier(legacy.to_owned()))
    }

    /// Merge `other` over this table; entries of `other` win.
    pub fn extend(&mut self, other: MappingTable) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MappingTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MappingTable(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
