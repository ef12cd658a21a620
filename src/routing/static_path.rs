// Dijkstra statique : topologie complète chargée une fois, routes calculées une fois.
// Aucune réaction automatique aux changements ; seul `update_topology` recalcule.

use log::{debug, error, info, warn};
use tokio::sync::RwLock;

use super::{Disposition, NodeHandle, RoutingState};
use crate::dijkstra::TopologyStore;
use crate::read_config::TopologyConfig;
use crate::routing_table::RoutingTable;
use crate::types::{Message, MessageType};

pub struct StaticShortestPath {
    state: RwLock<RoutingState>,
}

impl StaticShortestPath {
    pub fn new(topology: TopologyConfig) -> Self {
        let mut engine = StaticShortestPath {
            state: RwLock::new(RoutingState::default()),
        };
        engine.build_topology(topology);
        engine
    }

    /// Charge la topologie complète (tous les nœuds, pas seulement les voisins)
    pub fn build_topology(&mut self, topology: TopologyConfig) {
        let state = self.state.get_mut();
        state.topology = TopologyStore::from_config(topology);
        info!("Topology loaded with {} nodes", state.topology.len());
        debug!("Detailed topology: {:?}", state.topology);
    }

    pub(crate) fn calculate_routes_now(&mut self, source: &str) -> usize {
        let state = self.state.get_mut();
        log_recompute(source, state)
    }

    pub async fn calculate_routes(&self, source: &str) -> usize {
        let mut state = self.state.write().await;
        log_recompute(source, &mut state)
    }

    /// Remplace la topologie et déclenche un seul recalcul
    pub async fn update_topology(&self, topology: TopologyConfig, source: &str) -> usize {
        let mut state = self.state.write().await;
        state.topology = TopologyStore::from_config(topology);
        info!("[{}] Topology updated, recalculating routes...", source);
        log_recompute(source, &mut state)
    }

    pub async fn routing_table(&self) -> RoutingTable {
        self.state.read().await.routes.clone()
    }

    pub async fn topology(&self) -> TopologyStore {
        self.state.read().await.topology.clone()
    }

    pub async fn get_next_hop(&self, destination: &str) -> Option<String> {
        self.state.read().await.routes.next_hop(destination).map(str::to_string)
    }

    pub async fn handle_message(&self, node: &NodeHandle, message: Message) -> Disposition {
        if message.kind != MessageType::Message {
            debug!("[{}] Message type '{}' ignored by Dijkstra", node.id(), message.kind);
            return Disposition::Ignored;
        }

        if message.to == node.id() {
            info!("[{}] Message addressed to us: {}", node.id(), message.payload);
            return Disposition::Delivered;
        }

        let message = message.hop();
        if message.ttl == 0 {
            debug!("[{}] TTL exhausted for message to {}", node.id(), message.to);
            return Disposition::TtlExpired;
        }

        let Some(next_hop) = self.get_next_hop(&message.to).await else {
            error!("[{}] No route to {}, message dropped", node.id(), message.to);
            return Disposition::Unreachable;
        };
        if node.send(&next_hop, &message).await {
            info!("[{}] [FORWARD] Message forwarded to {} for {}", node.id(), next_hop, message.to);
            Disposition::Forwarded { sent: 1 }
        } else {
            error!("[{}] Could not send to {}", node.id(), next_hop);
            Disposition::SendFailed
        }
    }
}

fn log_recompute(source: &str, state: &mut RoutingState) -> usize {
    if state.topology.is_empty() {
        warn!("[{}] No topology to calculate routes from", source);
    }
    let count = state.recompute(source);
    info!("[{}] Routing table calculated for {} destinations", source, count);
    count
}
