use chrono::Utc;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::adjacency::{AdjacencyList, AdjacencyStatus};
use crate::config::RouterConfig;
use crate::event::{Event, TimeoutTask};
use crate::fib::Fib;
use crate::lsa::{
    lsa_update_name, parse_update_name, AdjLsa, AdjacencyEdge, CoordinateLsa, Lsa, LsaHeader,
    LsaType, NameLsa,
};
use crate::name_prefix_table::NamePrefixTable;
use crate::routing_table::RoutingTable;
use crate::sequencing::SequencingManager;
use crate::sync::{LsaFetcher, LsaStore, SyncPublisher};
use crate::RouterName;

/// One installed LSA plus its armed expire-or-refresh timer. Replacing
/// the timer drops (and thereby cancels) the previous one within the same
/// state transition.
#[derive(Debug)]
struct LsaSlot<T> {
    lsa: T,
    expiry_task: Option<TimeoutTask>,
}

/// The link-state database: every currently-believed-valid LSA from every
/// known router, at most one per (origin, type). Owns the three
/// collections exclusively; calculators borrow them for the duration of
/// one synchronous pass.
pub struct Lsdb {
    own_router: RouterName,
    refresh_interval: Duration,
    grace_period: Duration,
    adj_build_interval: Duration,
    adj_build_retry: Duration,
    name_lsas: BTreeMap<RouterName, LsaSlot<NameLsa>>,
    adj_lsas: BTreeMap<RouterName, LsaSlot<AdjLsa>>,
    coordinate_lsas: BTreeMap<RouterName, LsaSlot<CoordinateLsa>>,
    seq_mgr: SequencingManager,
    sync: Arc<dyn SyncPublisher>,
    content_store: LsaStore,
    event_tx: UnboundedSender<Event>,
    /// Build requests since the last completed build. A build consumes
    /// the requests pending at its start, never the whole counter.
    adj_build_count: u32,
    adj_build_scheduled: bool,
    adj_build_timer: Option<TimeoutTask>,
}

fn schedule_expiry(
    tx: &UnboundedSender<Event>,
    origin: RouterName,
    lsa_type: LsaType,
    seq_no: u64,
    delay: Duration,
) -> TimeoutTask {
    TimeoutTask::schedule(
        delay,
        tx,
        Event::RefreshOrExpire {
            origin,
            lsa_type,
            seq_no,
        },
    )
}

impl Lsdb {
    pub fn new(
        config: &RouterConfig,
        seq_mgr: SequencingManager,
        sync: Arc<dyn SyncPublisher>,
        content_store: LsaStore,
        event_tx: UnboundedSender<Event>,
    ) -> Self {
        Self {
            own_router: config.router_name.clone(),
            refresh_interval: config.lsa_refresh_interval(),
            grace_period: config.lsa_grace_period(),
            adj_build_interval: config.adj_lsa_build_interval(),
            adj_build_retry: config.adj_lsa_build_retry(),
            name_lsas: BTreeMap::new(),
            adj_lsas: BTreeMap::new(),
            coordinate_lsas: BTreeMap::new(),
            seq_mgr,
            sync,
            content_store,
            event_tx,
            adj_build_count: 0,
            adj_build_scheduled: false,
            adj_build_timer: None,
        }
    }

    pub fn own_router(&self) -> &RouterName {
        &self.own_router
    }

    fn stored_seq(&self, origin: &str, lsa_type: LsaType) -> Option<u64> {
        match lsa_type {
            LsaType::Name => self.name_lsas.get(origin).map(|s| s.lsa.header.seq_no),
            LsaType::Adjacency => self.adj_lsas.get(origin).map(|s| s.lsa.header.seq_no),
            LsaType::Coordinate => self
                .coordinate_lsas
                .get(origin)
                .map(|s| s.lsa.header.seq_no),
        }
    }

    /// The sole freshness gate: an update is worth fetching (and worth
    /// installing on arrival) iff nothing is stored for its key, or the
    /// stored sequence number is strictly smaller.
    pub fn is_lsa_new(&self, origin: &str, lsa_type: LsaType, seq_no: u64) -> bool {
        self.stored_seq(origin, lsa_type)
            .map_or(true, |stored| stored < seq_no)
    }

    // ---- sync boundary ----

    /// Flooding notification: decide whether the advertised version is
    /// worth a fetch before spending anything on retrieval.
    pub fn on_sync_update(&self, name: &str, seq_no: u64, fetcher: &Arc<dyn LsaFetcher>) {
        let (origin, lsa_type) = match parse_update_name(name) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Protocol bug on the sender side, not a transient fault.
                warn!("dropping update notification: {}", e);
                return;
            }
        };
        if origin == self.own_router {
            debug!("ignoring flooded copy of our own {} LSA", lsa_type);
            return;
        }
        if self.is_lsa_new(&origin, lsa_type, seq_no) {
            debug!("{} seq {} is new, fetching", name, seq_no);
            fetcher.fetch(name, seq_no, self.event_tx.clone());
        } else {
            debug!("{} seq {} is stale, ignoring", name, seq_no);
        }
    }

    /// A fetch delivered LSA bytes. Malformed content is discarded for
    /// good: the sequence number was already accepted, so only a higher
    /// one will trigger another fetch.
    pub fn on_lsa_content(
        &mut self,
        bytes: &[u8],
        npt: &mut NamePrefixTable,
        fib: &mut Fib,
        rt: &mut RoutingTable,
    ) {
        let lsa = match Lsa::decode(bytes) {
            Ok(lsa) => lsa,
            Err(e) => {
                warn!("discarding fetched LSA: {}", e);
                return;
            }
        };
        // Re-check freshness: the database may have moved on between the
        // fetch decision and content delivery.
        let header = lsa.header();
        if !self.is_lsa_new(&header.origin_router, lsa.lsa_type(), header.seq_no) {
            debug!(
                "fetched {} LSA from {} went stale in flight",
                lsa.lsa_type(),
                header.origin_router
            );
            return;
        }
        match lsa {
            Lsa::Name(lsa) => self.install_name_lsa(lsa, npt, fib),
            Lsa::Adjacency(lsa) => self.install_adj_lsa(lsa, npt, rt),
            Lsa::Coordinate(lsa) => self.install_coordinate_lsa(lsa, npt, rt),
        }
    }

    // ---- install ----

    pub fn install_name_lsa(&mut self, lsa: NameLsa, npt: &mut NamePrefixTable, fib: &mut Fib) {
        let origin = lsa.header.origin_router.clone();
        let seq_no = lsa.header.seq_no;
        if !self.is_lsa_new(&origin, LsaType::Name, seq_no) {
            debug!("stale name LSA from {} seq {}, ignoring", origin, seq_no);
            return;
        }
        let self_origin = origin == self.own_router;
        let expiry = schedule_expiry(
            &self.event_tx,
            origin.clone(),
            LsaType::Name,
            seq_no,
            self.expire_delay(&lsa.header) + self.grace_period,
        );

        match self.name_lsas.entry(origin.clone()) {
            Entry::Vacant(slot) => {
                info!("installed name LSA from {} seq {}", origin, seq_no);
                if !self_origin {
                    for prefix in &lsa.prefixes {
                        npt.add_entry(prefix, &origin);
                    }
                }
                slot.insert(LsaSlot {
                    lsa,
                    expiry_task: Some(expiry),
                });
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                info!("updated name LSA from {} to seq {}", origin, seq_no);
                entry.lsa.header.seq_no = seq_no;
                entry.lsa.header.expiration = lsa.header.expiration;
                if !entry.lsa.is_equal_content(&lsa) {
                    // Sorted-set difference keeps the (de)registration
                    // sequence independent of arrival order.
                    let added: Vec<String> =
                        lsa.prefixes.difference(&entry.lsa.prefixes).cloned().collect();
                    let removed: Vec<String> =
                        entry.lsa.prefixes.difference(&lsa.prefixes).cloned().collect();
                    entry.lsa.prefixes = lsa.prefixes;
                    if !self_origin {
                        for prefix in &added {
                            npt.add_entry(prefix, &origin);
                        }
                        for prefix in &removed {
                            if npt.remove_entry(prefix, &origin) {
                                fib.remove(prefix);
                            }
                        }
                    }
                }
                entry.expiry_task = Some(expiry);
            }
        }

        self.store_content(&origin, LsaType::Name);
    }

    pub fn install_adj_lsa(&mut self, lsa: AdjLsa, npt: &mut NamePrefixTable, rt: &mut RoutingTable) {
        let origin = lsa.header.origin_router.clone();
        let seq_no = lsa.header.seq_no;
        if !self.is_lsa_new(&origin, LsaType::Adjacency, seq_no) {
            debug!("stale adjacency LSA from {} seq {}, ignoring", origin, seq_no);
            return;
        }
        let self_origin = origin == self.own_router;
        let expiry = schedule_expiry(
            &self.event_tx,
            origin.clone(),
            LsaType::Adjacency,
            seq_no,
            self.expire_delay(&lsa.header) + self.grace_period,
        );

        match self.adj_lsas.entry(origin.clone()) {
            Entry::Vacant(slot) => {
                info!(
                    "installed adjacency LSA from {} seq {} ({} links)",
                    origin,
                    seq_no,
                    lsa.adjacencies.len()
                );
                if !self_origin {
                    // The origin itself becomes a routable name.
                    npt.add_entry(&origin, &origin);
                }
                slot.insert(LsaSlot {
                    lsa,
                    expiry_task: Some(expiry),
                });
                rt.schedule_recalculation(&self.event_tx);
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                info!("updated adjacency LSA from {} to seq {}", origin, seq_no);
                entry.lsa.header.seq_no = seq_no;
                entry.lsa.header.expiration = lsa.header.expiration;
                if !entry.lsa.is_equal_content(&lsa) {
                    entry.lsa.adjacencies = lsa.adjacencies;
                    rt.schedule_recalculation(&self.event_tx);
                }
                entry.expiry_task = Some(expiry);
            }
        }
        self.store_content(&origin, LsaType::Adjacency);
    }

    pub fn install_coordinate_lsa(
        &mut self,
        lsa: CoordinateLsa,
        npt: &mut NamePrefixTable,
        rt: &mut RoutingTable,
    ) {
        let origin = lsa.header.origin_router.clone();
        let seq_no = lsa.header.seq_no;
        if !self.is_lsa_new(&origin, LsaType::Coordinate, seq_no) {
            debug!("stale coordinate LSA from {} seq {}, ignoring", origin, seq_no);
            return;
        }
        let self_origin = origin == self.own_router;
        let expiry = schedule_expiry(
            &self.event_tx,
            origin.clone(),
            LsaType::Coordinate,
            seq_no,
            self.expire_delay(&lsa.header) + self.grace_period,
        );

        match self.coordinate_lsas.entry(origin.clone()) {
            Entry::Vacant(slot) => {
                info!("installed coordinate LSA from {} seq {}", origin, seq_no);
                if !self_origin {
                    npt.add_entry(&origin, &origin);
                }
                slot.insert(LsaSlot {
                    lsa,
                    expiry_task: Some(expiry),
                });
                rt.schedule_recalculation(&self.event_tx);
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                info!("updated coordinate LSA from {} to seq {}", origin, seq_no);
                entry.lsa.header.seq_no = seq_no;
                entry.lsa.header.expiration = lsa.header.expiration;
                if !entry.lsa.is_equal_content(&lsa) {
                    entry.lsa.radius = lsa.radius;
                    entry.lsa.angles = lsa.angles;
                    rt.schedule_recalculation(&self.event_tx);
                }
                entry.expiry_task = Some(expiry);
            }
        }
        self.store_content(&origin, LsaType::Coordinate);
    }

    // ---- expiration and refresh ----

    /// Fired by the timer armed at install time. The carried sequence
    /// number guards against firing for a version that has since been
    /// replaced; cancellation alone cannot close that race.
    pub fn expire_or_refresh(
        &mut self,
        origin: &str,
        lsa_type: LsaType,
        seq_no: u64,
        npt: &mut NamePrefixTable,
        fib: &mut Fib,
        rt: &mut RoutingTable,
    ) -> anyhow::Result<()> {
        if self.stored_seq(origin, lsa_type) != Some(seq_no) {
            debug!(
                "expire timer for {} {} LSA seq {} no longer matches, ignoring",
                origin, lsa_type, seq_no
            );
            return Ok(());
        }
        if origin == self.own_router {
            self.refresh_own_lsa(lsa_type)
        } else {
            self.expire_remote_lsa(origin, lsa_type, npt, fib, rt);
            Ok(())
        }
    }

    /// Our own LSAs never expire while we run: bump the persisted
    /// sequence number, republish, rearm.
    fn refresh_own_lsa(&mut self, lsa_type: LsaType) -> anyhow::Result<()> {
        let seq_no = self.seq_mgr.increment(lsa_type)?;
        let expiration = Utc::now() + chrono::Duration::seconds(self.refresh_interval.as_secs() as i64);
        let expiry = schedule_expiry(
            &self.event_tx,
            self.own_router.clone(),
            lsa_type,
            seq_no,
            self.refresh_interval + self.grace_period,
        );

        let refreshed = match lsa_type {
            LsaType::Name => self.name_lsas.get_mut(&self.own_router).map(|slot| {
                slot.lsa.header.seq_no = seq_no;
                slot.lsa.header.expiration = expiration;
                slot.expiry_task = Some(expiry);
            }),
            LsaType::Adjacency => self.adj_lsas.get_mut(&self.own_router).map(|slot| {
                slot.lsa.header.seq_no = seq_no;
                slot.lsa.header.expiration = expiration;
                slot.expiry_task = Some(expiry);
            }),
            LsaType::Coordinate => self.coordinate_lsas.get_mut(&self.own_router).map(|slot| {
                slot.lsa.header.seq_no = seq_no;
                slot.lsa.header.expiration = expiration;
                slot.expiry_task = Some(expiry);
            }),
        };
        if refreshed.is_none() {
            return Ok(());
        }

        info!("refreshed own {} LSA to seq {}", lsa_type, seq_no);
        self.store_content(&self.own_router, lsa_type);
        self.sync.publish_update(lsa_type, seq_no);
        Ok(())
    }

    fn expire_remote_lsa(
        &mut self,
        origin: &str,
        lsa_type: LsaType,
        npt: &mut NamePrefixTable,
        fib: &mut Fib,
        rt: &mut RoutingTable,
    ) {
        match lsa_type {
            LsaType::Name => {
                if let Some(slot) = self.name_lsas.remove(origin) {
                    info!("name LSA from {} expired", origin);
                    for prefix in &slot.lsa.prefixes {
                        if npt.remove_entry(prefix, origin) {
                            fib.remove(prefix);
                        }
                    }
                }
            }
            LsaType::Adjacency => {
                if self.adj_lsas.remove(origin).is_some() {
                    info!("adjacency LSA from {} expired", origin);
                    if npt.remove_entry(origin, origin) {
                        fib.remove(origin);
                    }
                    rt.schedule_recalculation(&self.event_tx);
                }
            }
            LsaType::Coordinate => {
                if self.coordinate_lsas.remove(origin).is_some() {
                    info!("coordinate LSA from {} expired", origin);
                    if npt.remove_entry(origin, origin) {
                        fib.remove(origin);
                    }
                    rt.schedule_recalculation(&self.event_tx);
                }
            }
        }
        self.content_store
            .write()
            .unwrap()
            .remove(&lsa_update_name(origin, lsa_type));
    }

    // ---- own LSA construction ----

    /// Local prefix changes go through the exact same install path as
    /// flooded updates.
    pub fn build_own_name_lsa(
        &mut self,
        prefixes: BTreeSet<String>,
        npt: &mut NamePrefixTable,
        fib: &mut Fib,
    ) -> anyhow::Result<()> {
        let seq_no = self.seq_mgr.increment(LsaType::Name)?;
        let lsa = NameLsa {
            header: self.own_header(seq_no),
            prefixes,
        };
        self.install_name_lsa(lsa, npt, fib);
        self.sync.publish_update(LsaType::Name, seq_no);
        Ok(())
    }

    pub fn build_own_coordinate_lsa(
        &mut self,
        radius: f64,
        angles: Vec<f64>,
        npt: &mut NamePrefixTable,
        rt: &mut RoutingTable,
    ) -> anyhow::Result<()> {
        let seq_no = self.seq_mgr.increment(LsaType::Coordinate)?;
        let lsa = CoordinateLsa {
            header: self.own_header(seq_no),
            radius,
            angles,
        };
        self.install_coordinate_lsa(lsa, npt, rt);
        self.sync.publish_update(LsaType::Coordinate, seq_no);
        Ok(())
    }

    /// Note a request to rebuild our adjacency LSA. Requests debounce
    /// into one timer; the counter remembers how many arrived.
    pub fn schedule_adj_lsa_build(&mut self) {
        self.adj_build_count += 1;
        if !self.adj_build_scheduled {
            debug!(
                "adjacency LSA build scheduled in {:?}",
                self.adj_build_interval
            );
            self.adj_build_timer = Some(TimeoutTask::schedule(
                self.adj_build_interval,
                &self.event_tx,
                Event::BuildAdjLsa,
            ));
            self.adj_build_scheduled = true;
        }
    }

    /// Attempt the debounced build. While any neighbor is still
    /// mid-probe the build is postponed, not attempted with incomplete
    /// information; with zero active neighbors the own adjacency LSA is
    /// withdrawn rather than republished empty.
    pub fn build_adj_lsa(
        &mut self,
        adjacencies: &AdjacencyList,
        max_retries: u32,
        npt: &mut NamePrefixTable,
        rt: &mut RoutingTable,
    ) -> anyhow::Result<()> {
        self.adj_build_timer = None;
        if !adjacencies.is_adj_lsa_buildable(max_retries) {
            debug!(
                "neighbor statuses unresolved, retrying adjacency build in {:?}",
                self.adj_build_retry
            );
            self.adj_build_timer = Some(TimeoutTask::schedule(
                self.adj_build_retry,
                &self.event_tx,
                Event::BuildAdjLsa,
            ));
            return Ok(());
        }

        self.adj_build_scheduled = false;
        let pending = self.adj_build_count;
        if pending == 0 {
            return Ok(());
        }

        if adjacencies.active_count() > 0 {
            let seq_no = self.seq_mgr.increment(LsaType::Adjacency)?;
            let mut edges: Vec<AdjacencyEdge> = adjacencies
                .iter()
                .filter(|a| a.status == AdjacencyStatus::Active)
                .map(|a| AdjacencyEdge {
                    name: a.name.clone(),
                    face_uri: a.face_uri.clone(),
                    cost: a.link_cost,
                })
                .collect();
            edges.sort_by(|a, b| a.name.cmp(&b.name));
            let lsa = AdjLsa {
                header: self.own_header(seq_no),
                adjacencies: edges,
            };
            self.install_adj_lsa(lsa, npt, rt);
            self.sync.publish_update(LsaType::Adjacency, seq_no);
        } else {
            info!("no active neighbors, withdrawing own adjacency LSA");
            self.remove_own_adj_lsa(rt);
        }

        // Consume only what was pending when the build started; new
        // requests may have arrived meanwhile.
        self.adj_build_count -= pending;
        Ok(())
    }

    fn remove_own_adj_lsa(&mut self, rt: &mut RoutingTable) {
        if self.adj_lsas.remove(&self.own_router).is_some() {
            self.content_store
                .write()
                .unwrap()
                .remove(&lsa_update_name(&self.own_router, LsaType::Adjacency));
            rt.schedule_recalculation(&self.event_tx);
        }
    }

    // ---- helpers and read access ----

    fn own_header(&self, seq_no: u64) -> LsaHeader {
        LsaHeader {
            origin_router: self.own_router.clone(),
            seq_no,
            expiration: Utc::now()
                + chrono::Duration::seconds(self.refresh_interval.as_secs() as i64),
        }
    }

    /// Remaining lifetime of an LSA: the fixed refresh interval for our
    /// own, whatever the carried expiration leaves for anyone else's.
    fn expire_delay(&self, header: &LsaHeader) -> Duration {
        if header.origin_router == self.own_router {
            self.refresh_interval
        } else {
            (header.expiration - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        }
    }

    fn store_content(&self, origin: &str, lsa_type: LsaType) {
        let lsa = match lsa_type {
            LsaType::Name => self
                .name_lsas
                .get(origin)
                .map(|s| Lsa::Name(s.lsa.clone())),
            LsaType::Adjacency => self
                .adj_lsas
                .get(origin)
                .map(|s| Lsa::Adjacency(s.lsa.clone())),
            LsaType::Coordinate => self
                .coordinate_lsas
                .get(origin)
                .map(|s| Lsa::Coordinate(s.lsa.clone())),
        };
        let Some(lsa) = lsa else { return };
        match lsa.encode() {
            Ok(bytes) => {
                self.content_store
                    .write()
                    .unwrap()
                    .insert(lsa.update_name(), (lsa.header().seq_no, bytes));
            }
            Err(e) => warn!("failed to encode {} LSA from {}: {}", lsa_type, origin, e),
        }
    }

    pub fn name_lsas(&self) -> impl Iterator<Item = &NameLsa> {
        self.name_lsas.values().map(|s| &s.lsa)
    }

    pub fn adj_lsas(&self) -> impl Iterator<Item = &AdjLsa> {
        self.adj_lsas.values().map(|s| &s.lsa)
    }

    pub fn coordinate_lsas(&self) -> impl Iterator<Item = &CoordinateLsa> {
        self.coordinate_lsas.values().map(|s| &s.lsa)
    }

    pub fn get_name_lsa(&self, origin: &str) -> Option<&NameLsa> {
        self.name_lsas.get(origin).map(|s| &s.lsa)
    }

    pub fn get_adj_lsa(&self, origin: &str) -> Option<&AdjLsa> {
        self.adj_lsas.get(origin).map(|s| &s.lsa)
    }

    pub fn get_coordinate_lsa(&self, origin: &str) -> Option<&CoordinateLsa> {
        self.coordinate_lsas.get(origin).map(|s| &s.lsa)
    }
}
