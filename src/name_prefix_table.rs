use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::fib::Fib;
use crate::routing_table::{NexthopSet, RoutingTable};
use crate::RouterName;

/// Maps advertised name prefixes to the routers that can satisfy them.
/// Adjacency and coordinate LSAs register the origin's own router name
/// here, so a router is reachable by name as soon as its topology LSA is.
#[derive(Debug, Default)]
pub struct NamePrefixTable {
    entries: BTreeMap<String, BTreeSet<RouterName>>,
}

impl NamePrefixTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the (prefix, origin) pair was not present yet.
    pub fn add_entry(&mut self, prefix: &str, origin: &str) -> bool {
        let added = self
            .entries
            .entry(prefix.to_string())
            .or_default()
            .insert(origin.to_string());
        if added {
            debug!("name prefix {} now served by {}", prefix, origin);
        }
        added
    }

    /// Removes one origin from a prefix. Returns true when the prefix has
    /// no origins left and was dropped entirely (the caller should then
    /// withdraw its FIB entry).
    pub fn remove_entry(&mut self, prefix: &str, origin: &str) -> bool {
        let Some(origins) = self.entries.get_mut(prefix) else {
            return false;
        };
        if origins.remove(origin) {
            debug!("name prefix {} no longer served by {}", prefix, origin);
        }
        if origins.is_empty() {
            self.entries.remove(prefix);
            return true;
        }
        false
    }

    pub fn origins_of(&self, prefix: &str) -> Option<&BTreeSet<RouterName>> {
        self.entries.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<RouterName>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-derive the forwarding entry of every prefix from the current
    /// routing table: the union of the next hops toward each origin that
    /// is presently reachable.
    pub fn update_forwarding(&self, routing_table: &RoutingTable, fib: &mut Fib) {
        for (prefix, origins) in &self.entries {
            let mut merged = NexthopSet::default();
            for origin in origins {
                if let Some(entry) = routing_table.lookup(origin) {
                    for hop in entry.nexthops.iter() {
                        merged.insert(hop.clone());
                    }
                }
            }
            if merged.is_empty() {
                fib.remove(prefix);
            } else {
                fib.update(prefix, &merged);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_track_origin_sets() {
        let mut npt = NamePrefixTable::new();
        assert!(npt.add_entry("/video", "/net/a"));
        assert!(!npt.add_entry("/video", "/net/a"));
        assert!(npt.add_entry("/video", "/net/b"));
        assert_eq!(npt.origins_of("/video").unwrap().len(), 2);

        assert!(!npt.remove_entry("/video", "/net/a"));
        assert!(npt.remove_entry("/video", "/net/b"));
        assert!(npt.origins_of("/video").is_none());
        assert!(npt.is_empty());
    }

    #[test]
    fn remove_unknown_prefix_is_a_no_op() {
        let mut npt = NamePrefixTable::new();
        assert!(!npt.remove_entry("/nowhere", "/net/a"));
    }
}
