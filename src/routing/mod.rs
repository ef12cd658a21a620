// Moteur de routage : une variante choisie à la construction
// (inondation, plus court chemin statique, état de liens).

pub mod flooding;
pub mod link_state;
pub mod static_path;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;
use log::{info, warn};
use tokio::sync::watch;

use crate::connection::{ConnectionManager, InboundSource};
use crate::dijkstra::TopologyStore;
use crate::error::{AppError, Result};
use crate::read_config::{NodeSettings, TopologyConfig};
use crate::routing_table::RoutingTable;
use crate::tasks::wait_for_shutdown;
use crate::types::{AdjacencyRow, Message};

pub use flooding::Flooding;
pub use link_state::LinkState;
pub use static_path::StaticShortestPath;

/// Algorithme demandé en ligne de commande
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Flooding,
    Dijkstra,
    Lsr,
    Dvr,
}

impl FromStr for Algorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flooding" => Ok(Algorithm::Flooding),
            "dijkstra" => Ok(Algorithm::Dijkstra),
            "lsr" => Ok(Algorithm::Lsr),
            "dvr" => Ok(Algorithm::Dvr),
            other => Err(AppError::ConfigError(format!(
                "Unknown algorithm '{}' (expected flooding, dijkstra, lsr or dvr)", other
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Flooding => write!(f, "flooding"),
            Algorithm::Dijkstra => write!(f, "dijkstra"),
            Algorithm::Lsr => write!(f, "lsr"),
            Algorithm::Dvr => write!(f, "dvr"),
        }
    }
}

impl Algorithm {
    /// `dvr` n'a pas d'implémentation : repli sur l'inondation avec un avertissement
    pub fn resolve(self) -> Algorithm {
        match self {
            Algorithm::Dvr => {
                warn!("Algorithm dvr is not implemented yet, using flooding");
                Algorithm::Flooding
            }
            other => other,
        }
    }
}

/// Issue du traitement d'un message entrant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    Forwarded { sent: usize },
    Duplicate,
    TtlExpired,
    Unreachable,
    SendFailed,
    Ignored,
    /// Aucun nœud lié au moteur
    Unbound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub delivered: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    delivered: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl StatsCounters {
    fn record(&self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Delivered => &self.delivered,
            Disposition::Forwarded { .. } => &self.forwarded,
            Disposition::Duplicate | Disposition::Ignored => return,
            Disposition::TtlExpired
            | Disposition::Unreachable
            | Disposition::SendFailed
            | Disposition::Unbound => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Référence non propriétaire vers le nœud : identité, voisins et couche de connexion
#[derive(Clone)]
pub struct NodeHandle {
    id: String,
    neighbors: AdjacencyRow,
    connections: Weak<ConnectionManager>,
}

impl NodeHandle {
    pub fn new(id: &str, neighbors: AdjacencyRow, connections: Weak<ConnectionManager>) -> Self {
        NodeHandle {
            id: id.to_string(),
            neighbors,
            connections,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn neighbors(&self) -> &AdjacencyRow {
        &self.neighbors
    }

    pub async fn send(&self, neighbor: &str, message: &Message) -> bool {
        match self.connections.upgrade() {
            Some(connections) => connections.send(neighbor, message).await,
            None => false,
        }
    }

    pub async fn broadcast(&self, message: &Message, exclude: Option<&str>) -> usize {
        match self.connections.upgrade() {
            Some(connections) => connections.broadcast(message, exclude).await,
            None => 0,
        }
    }

    pub async fn wait_for_links(&self, timeout: Duration) -> bool {
        match self.connections.upgrade() {
            Some(connections) => connections.wait_for_links(timeout).await,
            None => false,
        }
    }
}

/// Topologie connue et table dérivée, sous un même verrou
#[derive(Debug, Default)]
pub struct RoutingState {
    pub topology: TopologyStore,
    pub routes: RoutingTable,
}

impl RoutingState {
    pub fn new(topology: TopologyStore) -> Self {
        RoutingState {
            topology,
            routes: RoutingTable::new(),
        }
    }

    /// Remplace la table entière par un nouveau calcul depuis `source`
    pub fn recompute(&mut self, source: &str) -> usize {
        self.routes = self.topology.calculate_shortest_paths(source);
        self.routes.len()
    }
}

pub enum Strategy {
    Flooding(Flooding),
    StaticShortestPath(StaticShortestPath),
    LinkState(LinkState),
}

pub struct RoutingEngine {
    strategy: Strategy,
    node: Option<NodeHandle>,
    stats: StatsCounters,
    running: watch::Sender<bool>,
}

impl RoutingEngine {
    pub fn new(strategy: Strategy) -> Self {
        let (running, _) = watch::channel(false);
        RoutingEngine {
            strategy,
            node: None,
            stats: StatsCounters::default(),
            running,
        }
    }

    pub fn flooding() -> Self {
        Self::new(Strategy::Flooding(Flooding::new()))
    }

    pub fn static_shortest_path(topology: TopologyConfig) -> Self {
        Self::new(Strategy::StaticShortestPath(StaticShortestPath::new(topology)))
    }

    pub fn link_state(settings: &NodeSettings) -> Self {
        Self::new(Strategy::LinkState(LinkState::new(settings)))
    }

    /// Construit le moteur correspondant à l'algorithme (après repli éventuel de `dvr`)
    pub fn from_algorithm(algorithm: Algorithm, topology: &TopologyConfig, settings: &NodeSettings) -> Self {
        match algorithm.resolve() {
            Algorithm::Dijkstra => Self::static_shortest_path(topology.clone()),
            Algorithm::Lsr => Self::link_state(settings),
            _ => Self::flooding(),
        }
    }

    pub fn proto(&self) -> &'static str {
        match &self.strategy {
            Strategy::Flooding(_) => "flooding",
            Strategy::StaticShortestPath(_) => "dijkstra",
            Strategy::LinkState(_) => "lsr",
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn set_node(&mut self, node: NodeHandle) {
        info!("[{}] {} routing bound to node", node.id(), self.proto());
        // Routes statiques calculées une seule fois, avant tout trafic
        if let Strategy::StaticShortestPath(engine) = &mut self.strategy {
            engine.calculate_routes_now(node.id());
        }
        self.node = Some(node);
    }

    pub fn node(&self) -> Option<&NodeHandle> {
        self.node.as_ref()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// Boucle coopérative de la variante ; rend la main à l'arrêt
    pub async fn start(&self) {
        let mut shutdown = self.running.subscribe();
        let Some(node) = &self.node else {
            warn!("Routing engine started without a node, nothing to do");
            return;
        };
        match &self.strategy {
            Strategy::Flooding(_) => {
                info!("[{}] Flooding started", node.id());
                wait_for_shutdown(&mut shutdown).await;
            }
            Strategy::StaticShortestPath(engine) => {
                let routes = engine.routing_table().await.len();
                info!("[{}] Dijkstra started (static mode, {} routes)", node.id(), routes);
                wait_for_shutdown(&mut shutdown).await;
            }
            Strategy::LinkState(engine) => {
                engine.run(node, &mut shutdown).await;
            }
        }
        info!("[{}] {} routing stopped", node.id(), self.proto());
    }

    /// Point d'entrée unique de tout le trafic reçu ; appelable en parallèle
    pub async fn handle_inbound(&self, message: Message, source: &InboundSource) -> Disposition {
        let disposition = match &self.node {
            None => {
                warn!("Message from {} dropped: routing engine not bound to a node", source.addr);
                Disposition::Unbound
            }
            Some(node) => match &self.strategy {
                Strategy::Flooding(engine) => engine.handle_message(node, message, source).await,
                Strategy::StaticShortestPath(engine) => engine.handle_message(node, message).await,
                Strategy::LinkState(engine) => engine.handle_message(node, message, source).await,
            },
        };
        self.stats.record(&disposition);
        disposition
    }

    pub fn shutdown(&self) {
        self.running.send_replace(true);
    }

    /// Copie de la table de routage courante (absente pour l'inondation)
    pub async fn routing_table(&self) -> Option<RoutingTable> {
        match &self.strategy {
            Strategy::Flooding(_) => None,
            Strategy::StaticShortestPath(engine) => Some(engine.routing_table().await),
            Strategy::LinkState(engine) => Some(engine.routing_table().await),
        }
    }

    pub async fn topology(&self) -> Option<TopologyStore> {
        match &self.strategy {
            Strategy::Flooding(_) => None,
            Strategy::StaticShortestPath(engine) => Some(engine.topology().await),
            Strategy::LinkState(engine) => Some(engine.topology().await),
        }
    }

    /// Remplace la topologie statique et recalcule une fois
    pub async fn update_topology(&self, topology: TopologyConfig) -> Result<usize> {
        let node = self.node.as_ref()
            .ok_or_else(|| AppError::RouteError("routing engine not bound to a node".to_string()))?;
        match &self.strategy {
            Strategy::StaticShortestPath(engine) => Ok(engine.update_topology(topology, node.id()).await),
            _ => Err(AppError::RouteError(format!(
                "{} routing does not accept topology updates", self.proto()
            ))),
        }
    }
}
