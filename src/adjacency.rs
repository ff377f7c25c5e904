use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RouterName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjacencyStatus {
    /// Initial state, never probed successfully or to exhaustion.
    Unknown,
    Inactive,
    Active,
}

/// A configured neighbor of this router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjacent {
    pub name: RouterName,
    pub face_uri: String,
    /// 0 means no data-plane face bound yet.
    pub face_id: u64,
    pub link_cost: f64,
    pub status: AdjacencyStatus,
    pub timed_out_probes: u32,
}

impl Adjacent {
    pub fn new(name: RouterName, face_uri: String, link_cost: f64) -> Self {
        Self {
            name,
            face_uri,
            face_id: 0,
            link_cost,
            status: AdjacencyStatus::Unknown,
            timed_out_probes: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdjacencyError {
    #[error("neighbor {0} is already present")]
    Duplicate(RouterName),
}

/// Ordered set of neighbors, unique by name.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyList {
    list: Vec<Adjacent>,
}

impl AdjacencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, adjacent: Adjacent) -> Result<(), AdjacencyError> {
        if self.get(&adjacent.name).is_some() {
            return Err(AdjacencyError::Duplicate(adjacent.name));
        }
        self.list.push(adjacent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Adjacent> {
        self.list.iter().find(|a| a.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Adjacent> {
        self.list.iter_mut().find(|a| a.name == name)
    }

    pub fn find_by_face_uri(&self, face_uri: &str) -> Option<&Adjacent> {
        self.list.iter().find(|a| a.face_uri == face_uri)
    }

    pub fn find_by_face_id(&self, face_id: u64) -> Option<&Adjacent> {
        self.list.iter().find(|a| a.face_id != 0 && a.face_id == face_id)
    }

    /// Returns true when the entry exists and the status actually changed.
    pub fn update_status(&mut self, name: &str, status: AdjacencyStatus) -> bool {
        match self.get_mut(name) {
            Some(adjacent) if adjacent.status != status => {
                adjacent.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn increment_timed_out(&mut self, name: &str) -> u32 {
        match self.get_mut(name) {
            Some(adjacent) => {
                adjacent.timed_out_probes += 1;
                adjacent.timed_out_probes
            }
            None => 0,
        }
    }

    pub fn reset_timed_out(&mut self, name: &str) {
        if let Some(adjacent) = self.get_mut(name) {
            adjacent.timed_out_probes = 0;
        }
    }

    /// Safe to snapshot into an adjacency LSA only when no neighbor is
    /// still mid-probe: everyone is Active, or Inactive with the probe
    /// budget exhausted.
    pub fn is_adj_lsa_buildable(&self, max_retries: u32) -> bool {
        self.list.iter().all(|a| match a.status {
            AdjacencyStatus::Active => true,
            AdjacencyStatus::Inactive => a.timed_out_probes >= max_retries,
            AdjacencyStatus::Unknown => false,
        })
    }

    pub fn active_count(&self) -> usize {
        self.list
            .iter()
            .filter(|a| a.status == AdjacencyStatus::Active)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Adjacent> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacent(name: &str) -> Adjacent {
        Adjacent::new(name.to_string(), "udp4://10.0.0.1:6363".to_string(), 10.0)
    }

    #[test]
    fn insert_rejects_duplicate_name() {
        let mut list = AdjacencyList::new();
        list.insert(adjacent("/net/b")).unwrap();
        assert_eq!(
            list.insert(adjacent("/net/b")),
            Err(AdjacencyError::Duplicate("/net/b".to_string()))
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn buildability_waits_for_every_neighbor_to_resolve() {
        let mut list = AdjacencyList::new();
        list.insert(adjacent("/net/b")).unwrap();
        list.insert(adjacent("/net/c")).unwrap();

        // Both unknown: not buildable.
        assert!(!list.is_adj_lsa_buildable(3));

        list.update_status("/net/b", AdjacencyStatus::Active);
        assert!(!list.is_adj_lsa_buildable(3));

        // Inactive but still below the retry budget: mid-probe, not buildable.
        list.update_status("/net/c", AdjacencyStatus::Inactive);
        list.increment_timed_out("/net/c");
        assert!(!list.is_adj_lsa_buildable(3));

        list.increment_timed_out("/net/c");
        list.increment_timed_out("/net/c");
        assert!(list.is_adj_lsa_buildable(3));
    }

    #[test]
    fn active_count_ignores_other_statuses() {
        let mut list = AdjacencyList::new();
        list.insert(adjacent("/net/b")).unwrap();
        list.insert(adjacent("/net/c")).unwrap();
        list.insert(adjacent("/net/d")).unwrap();
        list.update_status("/net/b", AdjacencyStatus::Active);
        list.update_status("/net/c", AdjacencyStatus::Inactive);
        assert_eq!(list.active_count(), 1);
    }

    #[test]
    fn update_status_reports_real_changes_only() {
        let mut list = AdjacencyList::new();
        list.insert(adjacent("/net/b")).unwrap();
        assert!(list.update_status("/net/b", AdjacencyStatus::Active));
        assert!(!list.update_status("/net/b", AdjacencyStatus::Active));
        assert!(!list.update_status("/net/missing", AdjacencyStatus::Active));
    }

    #[test]
    fn face_id_zero_is_never_matched() {
        let mut list = AdjacencyList::new();
        list.insert(adjacent("/net/b")).unwrap();
        assert!(list.find_by_face_id(0).is_none());
        list.get_mut("/net/b").unwrap().face_id = 7;
        assert_eq!(list.find_by_face_id(7).unwrap().name, "/net/b");
    }
}
