use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::lsa::LsaType;
use crate::RouterName;

/// Everything the engine reacts to. Timer and transport tasks only ever
/// send events; all state mutation happens on the engine loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// Flooding notification: some router published (name, seq).
    SyncUpdate { name: String, seq_no: u64 },
    /// A fetch completed and delivered an encoded LSA body.
    LsaContent { bytes: Vec<u8> },
    /// Expire-or-refresh timer fired for the LSA version it was armed for.
    RefreshOrExpire {
        origin: RouterName,
        lsa_type: LsaType,
        seq_no: u64,
    },
    /// Debounced request to rebuild our own adjacency LSA.
    BuildAdjLsa,
    /// Debounced request to recompute the routing table.
    CalculateRoutes,
    /// Periodic tick: probe every configured neighbor.
    SendHellos,
    HelloReply { neighbor: RouterName, probe_id: u64 },
    HelloTimeout { neighbor: RouterName, probe_id: u64 },
    /// Start advertising a name prefix owned by this router.
    AdvertisePrefix { prefix: String },
    /// Stop advertising a name prefix owned by this router.
    WithdrawPrefix { prefix: String },
    /// Periodic status dump when debug_dump is enabled.
    DumpStatus,
}

/// A scheduled event delivery. Dropping the task cancels it; the receiver
/// must still re-validate its payload at fire time, since cancellation and
/// delivery can race through the event queue.
#[derive(Debug)]
pub struct TimeoutTask {
    handle: JoinHandle<()>,
}

impl TimeoutTask {
    pub fn schedule(delay: Duration, tx: &UnboundedSender<Event>, event: Event) -> Self {
        let tx = tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        Self { handle }
    }
}

impl Drop for TimeoutTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = TimeoutTask::schedule(Duration::from_secs(5), &tx, Event::BuildAdjLsa);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, Event::BuildAdjLsa));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_task_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = TimeoutTask::schedule(Duration::from_secs(5), &tx, Event::BuildAdjLsa);
        drop(task);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
