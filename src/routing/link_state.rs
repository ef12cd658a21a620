// Routage à état de liens : diffusion des LSA, base topologique construite au fil des
// annonces et recalcul complet des plus courts chemins.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use log::{debug, info, warn};
use tokio::sync::{watch, Mutex, RwLock};

use super::{Disposition, NodeHandle, RoutingState};
use crate::connection::InboundSource;
use crate::dijkstra::TopologyStore;
use crate::read_config::{validate_row, NodeSettings};
use crate::routing_table::RoutingTable;
use crate::tasks::wait_for_shutdown;
use crate::types::{now_millis, Fingerprint, Message, MessageType};

pub struct LinkState {
    state: RwLock<RoutingState>,
    /// Identifiants de LSA déjà traités, jamais purgés
    lsa_seen: Mutex<HashSet<Fingerprint>>,
    last_origination: AtomicU64,
    startup_grace: Duration,
    lsa_refresh: Option<Duration>,
    ttl: u32,
}

impl LinkState {
    pub fn new(settings: &NodeSettings) -> Self {
        LinkState {
            state: RwLock::new(RoutingState::new(TopologyStore::new())),
            lsa_seen: Mutex::new(HashSet::new()),
            last_origination: AtomicU64::new(0),
            startup_grace: settings.startup_grace(),
            lsa_refresh: settings.lsa_refresh(),
            ttl: settings.default_ttl,
        }
    }

    pub async fn routing_table(&self) -> RoutingTable {
        self.state.read().await.routes.clone()
    }

    pub async fn topology(&self) -> TopologyStore {
        self.state.read().await.topology.clone()
    }

    /// Horodatage strictement croissant : deux LSA successives n'ont jamais le même id
    fn next_timestamp(&self) -> u64 {
        let now = now_millis();
        let mut last = self.last_origination.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_origination.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    /// Attend les liens (borné), annonce une LSA, puis la réannonce si configuré
    pub(crate) async fn run(&self, node: &NodeHandle, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            up = node.wait_for_links(self.startup_grace) => {
                if !up {
                    warn!("[{}] Not all links up after {:?}, advertising anyway", node.id(), self.startup_grace);
                }
            }
            _ = wait_for_shutdown(shutdown) => return,
        }

        self.send_lsa(node).await;
        info!("[{}] Link State Routing started", node.id());

        match self.lsa_refresh {
            Some(period) => {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            self.send_lsa(node).await;
                        }
                        _ = wait_for_shutdown(shutdown) => break,
                    }
                }
            }
            None => wait_for_shutdown(shutdown).await,
        }
    }

    /// Crée la LSA de ce nœud, l'applique localement, la marque vue et la diffuse
    pub async fn send_lsa(&self, node: &NodeHandle) -> usize {
        let lsa = Message::lsa("lsr", node.id(), node.neighbors().clone(), self.next_timestamp(), self.ttl);
        if let Some(fingerprint) = lsa.lsa_fingerprint() {
            self.lsa_seen.lock().await.insert(fingerprint);
        }
        {
            let mut state = self.state.write().await;
            state.topology.replace_row(node.id(), node.neighbors().clone());
            state.recompute(node.id());
        }
        let sent = node.broadcast(&lsa, None).await;
        info!("[{}] [SEND] LSA {} advertising {:?} to {} neighbors",
              node.id(), lsa.id.as_deref().unwrap_or("?"), node.neighbors(), sent);
        sent
    }

    pub async fn handle_message(&self, node: &NodeHandle, message: Message, source: &InboundSource) -> Disposition {
        match message.kind {
            MessageType::Lsa => self.handle_lsa(node, message, source).await,
            MessageType::Message => self.handle_forwarding(node, message).await,
            other => {
                debug!("[{}] Ignoring message of type {}", node.id(), other);
                Disposition::Ignored
            }
        }
    }

    async fn handle_lsa(&self, node: &NodeHandle, lsa: Message, source: &InboundSource) -> Disposition {
        let Some(fingerprint) = lsa.lsa_fingerprint() else {
            warn!("[{}] LSA from {} without id, ignored", node.id(), lsa.from);
            return Disposition::Ignored;
        };
        if !self.lsa_seen.lock().await.insert(fingerprint) {
            debug!("[{}] Ignoring duplicate LSA {:?}", node.id(), lsa.id);
            return Disposition::Duplicate;
        }

        let neighbors = lsa.neighbors.clone().unwrap_or_default();
        if let Err(e) = validate_row(&lsa.from, &neighbors) {
            warn!("[{}] LSA {:?} from {} rejected: {}", node.id(), lsa.id, lsa.from, e);
            return Disposition::Ignored;
        }
        info!("[{}] [RECV] LSA from {}: {:?}", node.id(), lsa.from, neighbors);
        {
            let mut state = self.state.write().await;
            state.topology.replace_row(&lsa.from, neighbors);
            let count = state.recompute(node.id());
            info!("[{}] Routing table recalculated: {} destinations", node.id(), count);
            for route in state.routes.list_routes() {
                debug!("[{}] {} via {} (cost {}) {:?}", node.id(), route.destination, route.next_hop, route.cost, route.path);
            }
        }

        let exclude = source.neighbor.as_deref().unwrap_or(lsa.from.as_str());
        let sent = node.broadcast(&lsa, Some(exclude)).await;
        debug!("[{}] [FORWARD] LSA {:?} reflooded to {} neighbors", node.id(), lsa.id, sent);
        Disposition::Forwarded { sent }
    }

    /// Recalcul systématique avant chaque message de données (comportement de référence)
    async fn handle_forwarding(&self, node: &NodeHandle, message: Message) -> Disposition {
        let next_hop = {
            let mut state = self.state.write().await;
            state.recompute(node.id());
            state.routes.next_hop(&message.to).map(str::to_string)
        };

        if message.to == node.id() {
            info!("[{}] Message received: {}", node.id(), message.payload);
            return Disposition::Delivered;
        }

        let message = message.hop();
        if message.ttl == 0 {
            debug!("[{}] TTL exhausted for message to {}", node.id(), message.to);
            return Disposition::TtlExpired;
        }

        match next_hop {
            Some(next_hop) => {
                if node.send(&next_hop, &message).await {
                    info!("[{}] [FORWARD] Forwarding message to {} for {}", node.id(), next_hop, message.to);
                    Disposition::Forwarded { sent: 1 }
                } else {
                    warn!("[{}] Could not forward to {} for {}", node.id(), next_hop, message.to);
                    Disposition::SendFailed
                }
            }
            None => {
                warn!("[{}] No route to {}", node.id(), message.to);
                Disposition::Unreachable
            }
        }
    }
}
