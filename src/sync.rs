use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::config::RouterConfig;
use crate::event::Event;
use crate::hello::HelloTransport;
use crate::lsa::{lsa_update_name, parse_update_name, LsaType};
use crate::RouterName;

/// Interval between multicast re-announcements of everything we hold.
/// Re-announcing installed LSAs is what carries updates beyond one hop.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound half of the flooding collaborator: let peers know one of our
/// own LSAs has a new sequence number.
pub trait SyncPublisher: Send + Sync {
    fn publish_update(&self, lsa_type: LsaType, seq_no: u64);
}

/// Retrieval collaborator. Fire-and-forget: the implementation fetches in
/// the background and reports delivery by sending [`Event::LsaContent`].
/// Abandoned fetches (deadline passed) report nothing.
pub trait LsaFetcher: Send + Sync {
    fn fetch(&self, name: &str, seq_no: u64, events: UnboundedSender<Event>);
}

/// Encoded LSAs by update name, kept current by the LSDB so the transport
/// can serve fetches and re-announce without touching routing state.
pub type LsaStore = Arc<RwLock<HashMap<String, (u64, Vec<u8>)>>>;

pub fn new_lsa_store() -> LsaStore {
    Arc::new(RwLock::new(HashMap::new()))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireMessage {
    Announce {
        from: RouterName,
        name: String,
        seq_no: u64,
    },
    FetchRequest {
        name: String,
        seq_no: u64,
    },
    FetchResponse {
        name: String,
        seq_no: u64,
        payload: Vec<u8>,
    },
    HelloProbe {
        from: RouterName,
        probe_id: u64,
    },
    HelloReply {
        from: RouterName,
        probe_id: u64,
    },
}

async fn send_message(socket: &UdpSocket, message: &WireMessage, target: SocketAddr) {
    match serde_json::to_vec(message) {
        Ok(data) => {
            if let Err(e) = socket.send_to(&data, target).await {
                warn!("failed to send to {}: {}", target, e);
            }
        }
        Err(e) => error!("failed to encode wire message: {}", e),
    }
}

type PeerAddrs = Arc<RwLock<HashMap<RouterName, SocketAddr>>>;

fn fetch_target(peer_addrs: &PeerAddrs, multicast_target: SocketAddr, name: &str) -> SocketAddr {
    parse_update_name(name)
        .ok()
        .and_then(|(origin, _)| peer_addrs.read().unwrap().get(&origin).copied())
        // Without a known address, ask the whole group: any router
        // holding a copy may answer.
        .unwrap_or(multicast_target)
}

/// UDP transport for announcements, LSA retrieval and hello probing: one
/// socket, multicast announces, unicast everything else.
pub struct UdpSync {
    own_router: RouterName,
    socket: Arc<UdpSocket>,
    multicast_target: SocketAddr,
    store: LsaStore,
    /// Last source address seen per origin router, for unicast fetches.
    peer_addrs: PeerAddrs,
    /// Fetches still waiting for a response, keyed by (name, seq).
    pending: Arc<Mutex<HashSet<(String, u64)>>>,
    fetch_lifetime: Duration,
    fetch_deadline: Duration,
}

impl UdpSync {
    pub async fn bind(config: &RouterConfig, store: LsaStore) -> anyhow::Result<Arc<Self>> {
        use socket2::{Domain, Protocol, Socket, Type};

        let std_sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        std_sock.set_reuse_address(true)?;
        #[cfg(unix)]
        std_sock.set_reuse_port(true)?;
        std_sock.set_nonblocking(true)?;
        std_sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port).into())?;
        std_sock.join_multicast_v4(&config.multicast_group, &Ipv4Addr::UNSPECIFIED)?;

        let socket = UdpSocket::from_std(std_sock.into())?;
        info!(
            "sync transport bound on port {} (multicast {})",
            config.port, config.multicast_group
        );

        Ok(Arc::new(Self {
            own_router: config.router_name.clone(),
            socket: Arc::new(socket),
            multicast_target: SocketAddr::V4(SocketAddrV4::new(
                config.multicast_group,
                config.port,
            )),
            store,
            peer_addrs: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashSet::new())),
            fetch_lifetime: config.lsa_fetch_lifetime(),
            fetch_deadline: config.lsa_fetch_deadline(),
        }))
    }

    /// Spawn the receiver and the periodic announcer.
    pub fn start(self: &Arc<Self>, events: UnboundedSender<Event>) {
        let receiver = self.clone();
        tokio::spawn(async move {
            receiver.receive_loop(events).await;
        });

        let announcer = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ANNOUNCE_INTERVAL);
            loop {
                interval.tick().await;
                announcer.announce_all().await;
            }
        });
    }

    async fn receive_loop(&self, events: UnboundedSender<Event>) {
        let mut buffer = [0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => match serde_json::from_slice::<WireMessage>(&buffer[..len]) {
                    Ok(message) => self.handle_message(message, addr, &events).await,
                    Err(e) => debug!("undecodable packet from {}: {}", addr, e),
                },
                Err(e) => {
                    error!("sync receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(
        &self,
        message: WireMessage,
        addr: SocketAddr,
        events: &UnboundedSender<Event>,
    ) {
        match message {
            WireMessage::Announce { from, name, seq_no } => {
                if from == self.own_router {
                    return;
                }
                if let Ok((origin, _)) = parse_update_name(&name) {
                    self.peer_addrs.write().unwrap().insert(origin, addr);
                }
                let _ = events.send(Event::SyncUpdate { name, seq_no });
            }
            WireMessage::FetchRequest { name, seq_no } => {
                let stored = self
                    .store
                    .read()
                    .unwrap()
                    .get(&name)
                    .filter(|(stored_seq, _)| *stored_seq >= seq_no)
                    .cloned();
                if let Some((stored_seq, payload)) = stored {
                    debug!("serving {} seq {} to {}", name, stored_seq, addr);
                    send_message(
                        &self.socket,
                        &WireMessage::FetchResponse {
                            name,
                            seq_no: stored_seq,
                            payload,
                        },
                        addr,
                    )
                    .await;
                }
            }
            WireMessage::FetchResponse {
                name,
                seq_no,
                payload,
            } => {
                let satisfied = {
                    let mut pending = self.pending.lock().unwrap();
                    // A response can satisfy a fetch for any lower sequence.
                    let matched: Vec<(String, u64)> = pending
                        .iter()
                        .filter(|(n, s)| *n == name && *s <= seq_no)
                        .cloned()
                        .collect();
                    for key in &matched {
                        pending.remove(key);
                    }
                    !matched.is_empty()
                };
                if satisfied {
                    let _ = events.send(Event::LsaContent { bytes: payload });
                } else {
                    debug!("unsolicited fetch response for {} seq {}", name, seq_no);
                }
            }
            WireMessage::HelloProbe { from, probe_id } => {
                if from == self.own_router {
                    return;
                }
                self.peer_addrs.write().unwrap().insert(from, addr);
                send_message(
                    &self.socket,
                    &WireMessage::HelloReply {
                        from: self.own_router.clone(),
                        probe_id,
                    },
                    addr,
                )
                .await;
            }
            WireMessage::HelloReply { from, probe_id } => {
                if from == self.own_router {
                    return;
                }
                let _ = events.send(Event::HelloReply {
                    neighbor: from,
                    probe_id,
                });
            }
        }
    }

    async fn announce_all(&self) {
        let entries: Vec<(String, u64)> = self
            .store
            .read()
            .unwrap()
            .iter()
            .map(|(name, (seq_no, _))| (name.clone(), *seq_no))
            .collect();
        for (name, seq_no) in entries {
            send_message(
                &self.socket,
                &WireMessage::Announce {
                    from: self.own_router.clone(),
                    name,
                    seq_no,
                },
                self.multicast_target,
            )
            .await;
        }
    }
}

impl HelloTransport for UdpSync {
    /// Probes go to the neighbor's face, e.g. "udp4://10.0.0.2:6363".
    fn send_probe(&self, face_uri: &str, probe_id: u64) {
        let Some(target) = parse_face_uri(face_uri) else {
            warn!("unusable face uri {}", face_uri);
            return;
        };
        let socket = self.socket.clone();
        let message = WireMessage::HelloProbe {
            from: self.own_router.clone(),
            probe_id,
        };
        tokio::spawn(async move {
            send_message(&socket, &message, target).await;
        });
    }
}

impl SyncPublisher for UdpSync {
    fn publish_update(&self, lsa_type: LsaType, seq_no: u64) {
        let name = lsa_update_name(&self.own_router, lsa_type);
        debug!("announcing {} seq {}", name, seq_no);
        let socket = self.socket.clone();
        let message = WireMessage::Announce {
            from: self.own_router.clone(),
            name,
            seq_no,
        };
        let target = self.multicast_target;
        tokio::spawn(async move {
            send_message(&socket, &message, target).await;
        });
    }
}

impl LsaFetcher for UdpSync {
    fn fetch(&self, name: &str, seq_no: u64, _events: UnboundedSender<Event>) {
        let key = (name.to_string(), seq_no);
        if !self.pending.lock().unwrap().insert(key.clone()) {
            debug!("fetch of {} seq {} already in flight", name, seq_no);
            return;
        }

        let socket = self.socket.clone();
        let pending = self.pending.clone();
        let peer_addrs = self.peer_addrs.clone();
        let multicast_target = self.multicast_target;
        let lifetime = self.fetch_lifetime;
        let deadline = tokio::time::Instant::now() + self.fetch_deadline;
        let name = name.to_string();

        tokio::spawn(async move {
            loop {
                let target = fetch_target(&peer_addrs, multicast_target, &name);
                send_message(
                    &socket,
                    &WireMessage::FetchRequest {
                        name: name.clone(),
                        seq_no,
                    },
                    target,
                )
                .await;

                // UDP only surfaces timeout-class failures: pace retries
                // by the fetch lifetime until the deadline.
                tokio::time::sleep(lifetime).await;
                if !pending.lock().unwrap().contains(&key) {
                    // Answered; the receiver already forwarded the bytes.
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    pending.lock().unwrap().remove(&key);
                    debug!("abandoning fetch of {} seq {}", name, seq_no);
                    return;
                }
            }
        });
    }
}

fn parse_face_uri(face_uri: &str) -> Option<SocketAddr> {
    face_uri
        .strip_prefix("udp4://")
        .and_then(|rest| rest.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_uri_parsing() {
        assert_eq!(
            parse_face_uri("udp4://10.0.0.2:6363"),
            Some("10.0.0.2:6363".parse().unwrap())
        );
        assert_eq!(parse_face_uri("tcp4://10.0.0.2:6363"), None);
        assert_eq!(parse_face_uri("udp4://not-an-addr"), None);
    }

    #[test]
    fn wire_messages_round_trip_with_type_tags() {
        let message = WireMessage::Announce {
            from: "/net/a".to_string(),
            name: "/net/a/lsa/name".to_string(),
            seq_no: 9,
        };
        let bytes = serde_json::to_vec(&message).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("\"type\":\"announce\""));
        assert!(matches!(
            serde_json::from_slice::<WireMessage>(&bytes).unwrap(),
            WireMessage::Announce { seq_no: 9, .. }
        ));
    }

    #[test]
    fn unknown_origin_falls_back_to_multicast() {
        let peer_addrs: PeerAddrs = Arc::new(RwLock::new(HashMap::new()));
        let multicast: SocketAddr = "224.0.0.114:6363".parse().unwrap();
        assert_eq!(
            fetch_target(&peer_addrs, multicast, "/net/a/lsa/name"),
            multicast
        );

        let known: SocketAddr = "10.0.0.2:6363".parse().unwrap();
        peer_addrs
            .write()
            .unwrap()
            .insert("/net/a".to_string(), known);
        assert_eq!(fetch_target(&peer_addrs, multicast, "/net/a/lsa/name"), known);
    }
}
