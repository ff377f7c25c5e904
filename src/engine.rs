use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::adjacency::{Adjacent, AdjacencyList, AdjacencyStatus};
use crate::algorithms::{self, dijkstra, hyperbolic};
use crate::config::{HyperbolicMode, RouterConfig};
use crate::event::Event;
use crate::fib::{Fib, ForwardingPlane};
use crate::hello::{HelloState, HelloTransport};
use crate::lsa::CoordinateLsa;
use crate::lsdb::Lsdb;
use crate::name_map::NameMap;
use crate::name_prefix_table::NamePrefixTable;
use crate::routing_table::RoutingTable;
use crate::sequencing::SequencingManager;
use crate::sync::{LsaFetcher, LsaStore, SyncPublisher};
use crate::RouterName;

const STATUS_DUMP_INTERVAL: Duration = Duration::from_secs(30);

/// Owns every piece of routing state and runs the single event loop that
/// mutates it. Timer, transport and probe tasks communicate exclusively
/// by sending [`Event`]s; each event is handled to completion before the
/// next one is looked at.
pub struct RoutingEngine {
    config: RouterConfig,
    event_tx: UnboundedSender<Event>,
    event_rx: UnboundedReceiver<Event>,
    adjacencies: AdjacencyList,
    lsdb: Lsdb,
    routing_table: RoutingTable,
    npt: NamePrefixTable,
    fib: Fib,
    hello: HelloState,
    hello_transport: Arc<dyn HelloTransport>,
    fetcher: Arc<dyn LsaFetcher>,
    advertised: BTreeSet<String>,
    next_face_id: u64,
}

impl RoutingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RouterConfig,
        publisher: Arc<dyn SyncPublisher>,
        fetcher: Arc<dyn LsaFetcher>,
        hello_transport: Arc<dyn HelloTransport>,
        plane: Arc<dyn ForwardingPlane>,
        content_store: LsaStore,
        event_tx: UnboundedSender<Event>,
        event_rx: UnboundedReceiver<Event>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.state_dir)?;
        let seq_mgr = SequencingManager::load_or_init(&config.state_dir)?;

        let mut adjacencies = AdjacencyList::new();
        for neighbor in &config.neighbors {
            if let Err(e) = adjacencies.insert(Adjacent::new(
                neighbor.name.clone(),
                neighbor.face_uri.clone(),
                neighbor.link_cost,
            )) {
                warn!("skipping configured neighbor: {}", e);
            }
        }

        let lsdb = Lsdb::new(&config, seq_mgr, publisher, content_store, event_tx.clone());
        let routing_table = RoutingTable::new(config.routing_calc_interval());
        let fib = Fib::new(plane, config.max_faces_per_prefix);
        let advertised: BTreeSet<String> = config.advertised_prefixes.iter().cloned().collect();

        Ok(Self {
            config,
            event_tx,
            event_rx,
            adjacencies,
            lsdb,
            routing_table,
            npt: NamePrefixTable::new(),
            fib,
            hello: HelloState::new(),
            hello_transport,
            fetcher,
            advertised,
            next_face_id: 0,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        self.start()?;

        let tx = self.event_tx.clone();
        let hello_interval = self.config.hello_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(hello_interval);
            loop {
                interval.tick().await;
                if tx.send(Event::SendHellos).is_err() {
                    break;
                }
            }
        });

        if self.config.debug_dump {
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(STATUS_DUMP_INTERVAL);
                loop {
                    interval.tick().await;
                    if tx.send(Event::DumpStatus).is_err() {
                        break;
                    }
                }
            });
        }

        info!("routing engine for {} running", self.lsdb.own_router());
        while let Some(event) = self.event_rx.recv().await {
            self.handle_event(event);
        }
        Ok(())
    }

    /// Originate the LSAs this router owns at startup. The adjacency LSA
    /// follows once hello probing has resolved every neighbor.
    fn start(&mut self) -> anyhow::Result<()> {
        self.lsdb
            .build_own_name_lsa(self.advertised.clone(), &mut self.npt, &mut self.fib)?;
        if self.config.hyperbolic.mode != HyperbolicMode::Off {
            let hyperbolic = self.config.hyperbolic.clone();
            self.lsdb.build_own_coordinate_lsa(
                hyperbolic.radius,
                hyperbolic.angles,
                &mut self.npt,
                &mut self.routing_table,
            )?;
        }
        let _ = self.event_tx.send(Event::SendHellos);
        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::SyncUpdate { name, seq_no } => {
                self.lsdb.on_sync_update(&name, seq_no, &self.fetcher);
            }
            Event::LsaContent { bytes } => {
                self.lsdb
                    .on_lsa_content(&bytes, &mut self.npt, &mut self.fib, &mut self.routing_table);
            }
            Event::RefreshOrExpire {
                origin,
                lsa_type,
                seq_no,
            } => {
                if let Err(e) = self.lsdb.expire_or_refresh(
                    &origin,
                    lsa_type,
                    seq_no,
                    &mut self.npt,
                    &mut self.fib,
                    &mut self.routing_table,
                ) {
                    error!("expire/refresh of {} {} LSA failed: {}", origin, lsa_type, e);
                }
            }
            Event::BuildAdjLsa => {
                if let Err(e) = self.lsdb.build_adj_lsa(
                    &self.adjacencies,
                    self.config.hello_retries,
                    &mut self.npt,
                    &mut self.routing_table,
                ) {
                    error!("adjacency LSA build failed: {}", e);
                }
            }
            Event::CalculateRoutes => self.calculate_routes(),
            Event::SendHellos => {
                self.hello.probe_all(
                    &self.adjacencies,
                    &self.hello_transport,
                    self.config.hello_timeout(),
                    &self.event_tx,
                );
            }
            Event::HelloReply { neighbor, probe_id } => self.on_hello_reply(&neighbor, probe_id),
            Event::HelloTimeout { neighbor, probe_id } => {
                self.on_hello_timeout(neighbor, probe_id)
            }
            Event::AdvertisePrefix { prefix } => {
                if self.advertised.insert(prefix.clone()) {
                    info!("advertising prefix {}", prefix);
                    self.rebuild_own_name_lsa();
                }
            }
            Event::WithdrawPrefix { prefix } => {
                if self.advertised.remove(&prefix) {
                    info!("withdrawing prefix {}", prefix);
                    self.rebuild_own_name_lsa();
                }
            }
            Event::DumpStatus => self.dump_status(),
        }
    }

    fn on_hello_reply(&mut self, neighbor: &str, probe_id: u64) {
        if !self.hello.on_reply(neighbor, probe_id) {
            return;
        }
        self.adjacencies.reset_timed_out(neighbor);
        if self
            .adjacencies
            .get(neighbor)
            .is_some_and(|a| a.face_id == 0)
        {
            // First contact binds a face.
            self.next_face_id += 1;
            let face_id = self.next_face_id;
            if let Some(adjacent) = self.adjacencies.get_mut(neighbor) {
                adjacent.face_id = face_id;
            }
        }
        if self
            .adjacencies
            .update_status(neighbor, AdjacencyStatus::Active)
        {
            info!("neighbor {} is now active", neighbor);
            self.lsdb.schedule_adj_lsa_build();
        }
    }

    fn on_hello_timeout(&mut self, neighbor: RouterName, probe_id: u64) {
        if !self.hello.on_timeout(&neighbor, probe_id) {
            return;
        }
        let count = self.adjacencies.increment_timed_out(&neighbor);
        if count < self.config.hello_retries {
            debug!("probe {} of {} timed out, retrying", count, neighbor);
            if let Some(face_uri) = self
                .adjacencies
                .get(&neighbor)
                .map(|a| a.face_uri.clone())
            {
                self.hello.probe_one(
                    neighbor,
                    &face_uri,
                    &self.hello_transport,
                    self.config.hello_timeout(),
                    &self.event_tx,
                );
            }
        } else if self
            .adjacencies
            .update_status(&neighbor, AdjacencyStatus::Inactive)
        {
            warn!("neighbor {} is unreachable after {} timeouts", neighbor, count);
            self.lsdb.schedule_adj_lsa_build();
        }
    }

    fn rebuild_own_name_lsa(&mut self) {
        if let Err(e) =
            self.lsdb
                .build_own_name_lsa(self.advertised.clone(), &mut self.npt, &mut self.fib)
        {
            error!("failed to rebuild own name LSA: {}", e);
        }
    }

    /// One wholesale recomputation pass, then push the result downstream.
    fn calculate_routes(&mut self) {
        self.routing_table.begin_calculation();
        match self.config.hyperbolic.mode {
            HyperbolicMode::Off => self.calculate_link_state(),
            HyperbolicMode::On => self.calculate_hyperbolic(false),
            HyperbolicMode::DryRun => {
                // Link-state keeps driving forwarding; hyperbolic results
                // go to the shadow table for comparison.
                self.calculate_link_state();
                self.calculate_hyperbolic(true);
            }
        }
        self.routing_table.finish_calculation(&self.event_tx);
        info!(
            "routing table rebuilt: {} destinations",
            self.routing_table.len()
        );
        self.npt.update_forwarding(&self.routing_table, &mut self.fib);
    }

    fn calculate_link_state(&mut self) {
        let map = NameMap::from_adjacency_lsas(self.lsdb.adj_lsas());
        let matrix = algorithms::build_cost_matrix(&map, self.lsdb.adj_lsas());
        dijkstra::calculate(
            &map,
            &matrix,
            self.lsdb.own_router(),
            &self.adjacencies,
            &mut self.routing_table,
        );
    }

    fn calculate_hyperbolic(&mut self, dry: bool) {
        let map = NameMap::from_coordinate_lsas(self.lsdb.coordinate_lsas());
        let coordinates: HashMap<RouterName, &CoordinateLsa> = self
            .lsdb
            .coordinate_lsas()
            .map(|c| (c.header.origin_router.clone(), c))
            .collect();
        hyperbolic::calculate(
            &map,
            &coordinates,
            self.lsdb.own_router(),
            &self.adjacencies,
            &mut self.routing_table,
            dry,
        );
    }

    fn dump_status(&self) {
        info!("=== STATUS {} ===", self.lsdb.own_router());
        info!("neighbors ({}):", self.adjacencies.len());
        for adjacent in self.adjacencies.iter() {
            info!(
                "  {} [{:?}] cost {} timeouts {}",
                adjacent.name, adjacent.status, adjacent.link_cost, adjacent.timed_out_probes
            );
        }
        info!(
            "lsdb: {} name, {} adjacency, {} coordinate",
            self.lsdb.name_lsas().count(),
            self.lsdb.adj_lsas().count(),
            self.lsdb.coordinate_lsas().count()
        );
        info!("routing table ({} destinations):", self.routing_table.len());
        for entry in self.routing_table.entries() {
            for hop in entry.nexthops.iter() {
                info!(
                    "  {} via {} cost {}",
                    entry.destination,
                    hop.face_uri,
                    hop.adjusted_cost()
                );
            }
        }
        info!("fib entries: {}", self.fib.len());
        info!("===================");
    }
}
