use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::adjacency::AdjacencyList;
use crate::event::{Event, TimeoutTask};
use crate::RouterName;

/// Liveness-probe collaborator: deliver one probe to a neighbor's face.
/// Replies come back as [`Event::HelloReply`] through the transport.
pub trait HelloTransport: Send + Sync {
    fn send_probe(&self, face_uri: &str, probe_id: u64);
}

struct PendingProbe {
    probe_id: u64,
    /// Armed timeout; dropped (cancelled) when the reply arrives.
    _timeout: TimeoutTask,
}

/// Bookkeeping for in-flight probes. Probe ids are re-validated when a
/// timeout fires, the same defense the LSA timers use against firing for
/// a state they no longer match.
#[derive(Default)]
pub struct HelloState {
    next_probe_id: u64,
    pending: HashMap<RouterName, PendingProbe>,
}

impl HelloState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe every neighbor that is not already being probed.
    pub fn probe_all(
        &mut self,
        adjacencies: &AdjacencyList,
        transport: &Arc<dyn HelloTransport>,
        timeout: Duration,
        tx: &UnboundedSender<Event>,
    ) {
        let due: Vec<(RouterName, String)> = adjacencies
            .iter()
            .filter(|a| !self.pending.contains_key(&a.name))
            .map(|a| (a.name.clone(), a.face_uri.clone()))
            .collect();
        for (name, face_uri) in due {
            self.probe_one(name, &face_uri, transport, timeout, tx);
        }
    }

    pub fn probe_one(
        &mut self,
        neighbor: RouterName,
        face_uri: &str,
        transport: &Arc<dyn HelloTransport>,
        timeout: Duration,
        tx: &UnboundedSender<Event>,
    ) {
        let probe_id = self.next_probe_id;
        self.next_probe_id += 1;
        debug!("probing {} (probe {})", neighbor, probe_id);
        transport.send_probe(face_uri, probe_id);
        let timeout_task = TimeoutTask::schedule(
            timeout,
            tx,
            Event::HelloTimeout {
                neighbor: neighbor.clone(),
                probe_id,
            },
        );
        self.pending.insert(
            neighbor,
            PendingProbe {
                probe_id,
                _timeout: timeout_task,
            },
        );
    }

    /// Returns true when the reply matches the in-flight probe; the
    /// pending slot is consumed and its timeout cancelled.
    pub fn on_reply(&mut self, neighbor: &str, probe_id: u64) -> bool {
        match self.pending.get(neighbor) {
            Some(probe) if probe.probe_id == probe_id => {
                self.pending.remove(neighbor);
                true
            }
            _ => {
                debug!("unexpected hello reply from {} (probe {})", neighbor, probe_id);
                false
            }
        }
    }

    /// Returns true when the timeout still matches the in-flight probe
    /// (it may have been answered and re-armed since it was scheduled).
    pub fn on_timeout(&mut self, neighbor: &str, probe_id: u64) -> bool {
        match self.pending.get(neighbor) {
            Some(probe) if probe.probe_id == probe_id => {
                self.pending.remove(neighbor);
                true
            }
            _ => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::Adjacent;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingTransport {
        probes: Mutex<Vec<(String, u64)>>,
    }

    impl HelloTransport for RecordingTransport {
        fn send_probe(&self, face_uri: &str, probe_id: u64) {
            self.probes
                .lock()
                .unwrap()
                .push((face_uri.to_string(), probe_id));
        }
    }

    fn adjacencies() -> AdjacencyList {
        let mut list = AdjacencyList::new();
        list.insert(Adjacent::new(
            "/net/b".to_string(),
            "udp4://10.0.0.2:6363".to_string(),
            10.0,
        ))
        .unwrap();
        list.insert(Adjacent::new(
            "/net/c".to_string(),
            "udp4://10.0.0.3:6363".to_string(),
            10.0,
        ))
        .unwrap();
        list
    }

    #[tokio::test(start_paused = true)]
    async fn probe_all_skips_neighbors_already_in_flight() {
        let transport = Arc::new(RecordingTransport::default());
        let dyn_transport: Arc<dyn HelloTransport> = transport.clone();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut hello = HelloState::new();
        let list = adjacencies();

        hello.probe_all(&list, &dyn_transport, Duration::from_secs(3), &tx);
        assert_eq!(transport.probes.lock().unwrap().len(), 2);

        hello.probe_all(&list, &dyn_transport, Duration::from_secs(3), &tx);
        assert_eq!(transport.probes.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_consumes_the_matching_probe_only() {
        let transport = Arc::new(RecordingTransport::default());
        let dyn_transport: Arc<dyn HelloTransport> = transport.clone();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut hello = HelloState::new();

        hello.probe_one(
            "/net/b".to_string(),
            "udp4://10.0.0.2:6363",
            &dyn_transport,
            Duration::from_secs(3),
            &tx,
        );
        let probe_id = transport.probes.lock().unwrap()[0].1;

        assert!(!hello.on_reply("/net/b", probe_id + 7));
        assert!(hello.on_reply("/net/b", probe_id));
        assert!(!hello.on_reply("/net/b", probe_id));
        assert_eq!(hello.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timeout_is_rejected_after_reprobe() {
        let transport = Arc::new(RecordingTransport::default());
        let dyn_transport: Arc<dyn HelloTransport> = transport.clone();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut hello = HelloState::new();

        hello.probe_one(
            "/net/b".to_string(),
            "udp4://10.0.0.2:6363",
            &dyn_transport,
            Duration::from_secs(3),
            &tx,
        );
        let first = transport.probes.lock().unwrap()[0].1;
        assert!(hello.on_reply("/net/b", first));

        hello.probe_one(
            "/net/b".to_string(),
            "udp4://10.0.0.2:6363",
            &dyn_transport,
            Duration::from_secs(3),
            &tx,
        );
        // The old probe's timeout fires late: must not match.
        assert!(!hello.on_timeout("/net/b", first));
        assert_eq!(hello.pending_count(), 1);
    }
}
