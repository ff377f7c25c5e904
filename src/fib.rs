use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::routing_table::{NextHop, NexthopSet};

/// The data-plane boundary. The daemon only ever hands it genuine
/// changes; the diffing lives in [`Fib`].
pub trait ForwardingPlane: Send + Sync {
    fn install(&self, name: &str, face_uri: &str, cost: u64);
    fn withdraw(&self, name: &str, face_uri: &str);
}

/// Stand-in plane that records intent in the log.
pub struct LogForwardingPlane;

impl ForwardingPlane for LogForwardingPlane {
    fn install(&self, name: &str, face_uri: &str, cost: u64) {
        info!("fib install {} via {} cost {}", name, face_uri, cost);
    }

    fn withdraw(&self, name: &str, face_uri: &str) {
        info!("fib withdraw {} via {}", name, face_uri);
    }
}

pub struct Fib {
    entries: BTreeMap<String, Vec<NextHop>>,
    plane: Arc<dyn ForwardingPlane>,
    /// 0 means no limit.
    max_faces_per_prefix: usize,
}

impl Fib {
    pub fn new(plane: Arc<dyn ForwardingPlane>, max_faces_per_prefix: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            plane,
            max_faces_per_prefix,
        }
    }

    /// Reconcile one name against a freshly computed next-hop set:
    /// withdraw faces that fell out, install faces that are new or whose
    /// cost moved.
    pub fn update(&mut self, name: &str, nexthops: &NexthopSet) {
        let desired: Vec<NextHop> = nexthops.best(self.max_faces_per_prefix).cloned().collect();
        if desired.is_empty() {
            self.remove(name);
            return;
        }

        let installed = self.entries.get(name).cloned().unwrap_or_default();

        for old in &installed {
            if !desired.iter().any(|h| h.face_uri == old.face_uri) {
                self.plane.withdraw(name, &old.face_uri);
            }
        }
        for hop in &desired {
            let unchanged = installed
                .iter()
                .any(|h| h.face_uri == hop.face_uri && h.adjusted_cost() == hop.adjusted_cost());
            if !unchanged {
                self.plane.install(name, &hop.face_uri, hop.adjusted_cost());
            }
        }

        self.entries.insert(name.to_string(), desired);
    }

    pub fn remove(&mut self, name: &str) {
        if let Some(installed) = self.entries.remove(name) {
            debug!("removing fib entry for {}", name);
            for hop in &installed {
                self.plane.withdraw(name, &hop.face_uri);
            }
        }
    }

    pub fn nexthops_of(&self, name: &str) -> Option<&[NextHop]> {
        self.entries.get(name).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
