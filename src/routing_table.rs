use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tracing::debug;

use crate::event::{Event, TimeoutTask};
use crate::RouterName;

/// The forwarding plane carries integral costs; multiplying before
/// rounding keeps the relative ordering of fractional costs.
pub const COST_ADJUSTMENT_FACTOR: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct NextHop {
    pub face_uri: String,
    pub cost: f64,
}

impl NextHop {
    pub fn new(face_uri: String, cost: f64) -> Self {
        Self { face_uri, cost }
    }

    pub fn adjusted_cost(&self) -> u64 {
        (self.cost * COST_ADJUSTMENT_FACTOR).round() as u64
    }
}

/// Next hops for one destination, ordered by adjusted cost then face,
/// unique by face.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NexthopSet {
    hops: Vec<NextHop>,
}

impl NexthopSet {
    pub fn insert(&mut self, hop: NextHop) {
        match self.hops.iter_mut().find(|h| h.face_uri == hop.face_uri) {
            Some(existing) => {
                if hop.cost < existing.cost {
                    existing.cost = hop.cost;
                }
            }
            None => self.hops.push(hop),
        }
        self.hops
            .sort_by(|a, b| (a.adjusted_cost(), &a.face_uri).cmp(&(b.adjusted_cost(), &b.face_uri)));
    }

    pub fn iter(&self) -> impl Iterator<Item = &NextHop> {
        self.hops.iter()
    }

    /// The cheapest hops, capped at `max` faces (0 = no cap).
    pub fn best(&self, max: usize) -> impl Iterator<Item = &NextHop> {
        let take = if max == 0 { self.hops.len() } else { max };
        self.hops.iter().take(take)
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RoutingTableEntry {
    pub destination: RouterName,
    pub nexthops: NexthopSet,
}

/// Debounce state for routing recomputation. Requests while Pending
/// coalesce into the already-armed timer; requests while Running queue
/// exactly one follow-up pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalcState {
    Idle,
    Pending,
    Running,
}

pub struct RoutingTable {
    entries: BTreeMap<RouterName, RoutingTableEntry>,
    /// Shadow table for hyperbolic dry runs; never reaches the FIB.
    dry_entries: BTreeMap<RouterName, RoutingTableEntry>,
    state: CalcState,
    follow_up: bool,
    calc_timer: Option<TimeoutTask>,
    calc_interval: Duration,
    request_count: u64,
    version_tx: watch::Sender<u64>,
}

impl RoutingTable {
    pub fn new(calc_interval: Duration) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            entries: BTreeMap::new(),
            dry_entries: BTreeMap::new(),
            state: CalcState::Idle,
            follow_up: false,
            calc_timer: None,
            calc_interval,
            request_count: 0,
            version_tx,
        }
    }

    /// Ask for a recomputation. The actual pass runs one calc interval
    /// after the first request of a burst.
    pub fn schedule_recalculation(&mut self, tx: &UnboundedSender<Event>) {
        self.request_count += 1;
        match self.state {
            CalcState::Idle => {
                debug!("routing recalculation scheduled in {:?}", self.calc_interval);
                self.calc_timer = Some(TimeoutTask::schedule(
                    self.calc_interval,
                    tx,
                    Event::CalculateRoutes,
                ));
                self.state = CalcState::Pending;
            }
            CalcState::Pending => {}
            CalcState::Running => {
                self.follow_up = true;
            }
        }
    }

    /// Transition Pending → Running and clear both tables for the
    /// wholesale rebuild.
    pub fn begin_calculation(&mut self) {
        self.calc_timer = None;
        self.state = CalcState::Running;
        self.entries.clear();
        self.dry_entries.clear();
    }

    pub fn finish_calculation(&mut self, tx: &UnboundedSender<Event>) {
        self.state = CalcState::Idle;
        if self.follow_up {
            self.follow_up = false;
            self.schedule_recalculation(tx);
        }
        self.version_tx.send_modify(|v| *v += 1);
    }

    pub fn insert_entry(&mut self, dry: bool, destination: RouterName, nexthops: NexthopSet) {
        let table = if dry { &mut self.dry_entries } else { &mut self.entries };
        table.insert(
            destination.clone(),
            RoutingTableEntry {
                destination,
                nexthops,
            },
        );
    }

    pub fn lookup(&self, destination: &str) -> Option<&RoutingTableEntry> {
        self.entries.get(destination)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RoutingTableEntry> {
        self.entries.values()
    }

    pub fn dry_entries(&self) -> impl Iterator<Item = &RoutingTableEntry> {
        self.dry_entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total recomputation requests seen, coalesced or not.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn has_pending_calculation(&self) -> bool {
        self.state != CalcState::Idle
    }

    /// Bumps on every completed pass; downstream consumers diff against
    /// their own installed state on each change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }
}
