// Nœud du simulateur : assemble la couche de connexion et le moteur de routage,
// et porte le cycle de vie (démarrage, arrêt).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::error::{AppError, Result};
use crate::read_config::{split_address, AddressBook, NodeSettings};
use crate::routing::{EngineStats, NodeHandle, RoutingEngine};
use crate::tasks::{spawn_engine_task, spawn_listener_task};
use crate::types::AdjacencyRow;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Node {
    id: String,
    connections: Arc<ConnectionManager>,
    engine: Arc<RoutingEngine>,
    running: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Lie le moteur au nœud ; aucune tâche n'est lancée avant `start`
    pub fn new(id: &str, neighbors: AdjacencyRow, mut engine: RoutingEngine, settings: &NodeSettings) -> Self {
        let (running, shutdown) = watch::channel(false);
        let connections = Arc::new(ConnectionManager::new(id, engine.proto(), &neighbors, settings, shutdown));
        engine.set_node(NodeHandle::new(id, neighbors, Arc::downgrade(&connections)));
        Node {
            id: id.to_string(),
            connections,
            engine: Arc::new(engine),
            running,
            tasks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn engine(&self) -> &Arc<RoutingEngine> {
        &self.engine
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Écoute sur l'adresse du carnet, puis ouvre les liens et démarre le moteur
    pub async fn start(&mut self, address_book: &AddressBook) -> Result<SocketAddr> {
        let address = address_book.get(&self.id)
            .ok_or_else(|| AppError::ConfigError(format!("No address for node {} in names file", self.id)))?;
        let (host, port) = split_address(address)?;
        let listener = ConnectionManager::listen(&host, port).await?;
        self.start_with_listener(listener, address_book)
    }

    /// Variante avec un écouteur déjà lié (ports éphémères)
    pub fn start_with_listener(&mut self, listener: TcpListener, address_book: &AddressBook) -> Result<SocketAddr> {
        let local = listener.local_addr()?;
        info!("[{}] Node listening on {} ({} routing)", self.id, local, self.engine.proto());

        self.tasks.push(spawn_listener_task(Arc::clone(&self.connections), listener, Arc::clone(&self.engine)));
        self.tasks.extend(self.connections.connect_all(address_book));
        self.tasks.push(spawn_engine_task(Arc::clone(&self.engine)));
        Ok(local)
    }

    pub async fn shutdown(&mut self) {
        info!("[{}] Shutting down...", self.id);
        self.running.send_replace(true);
        self.engine.shutdown();
        self.connections.close_all().await;

        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("[{}] Background task did not stop in time, aborting", self.id);
                task.abort();
            }
        }
        info!("[{}] Node stopped", self.id);
    }
}
