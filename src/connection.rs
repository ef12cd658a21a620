// Gestion des liens vers les voisins : connexions sortantes avec reprise,
// écoute des connexions entrantes, envoi et diffusion de messages.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, error, info, warn};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::net_utils::{decode_message, read_frame, write_frame};
use crate::read_config::{AddressBook, NodeSettings};
use crate::routing::RoutingEngine;
use crate::tasks::{spawn_connect_task, spawn_receive_task, wait_for_shutdown};
use crate::types::{AdjacencyRow, Message, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Lien dirigé nœud local -> voisin
#[derive(Debug)]
struct NeighborLink {
    status: LinkStatus,
    writer: Option<SharedWriter>,
    /// Réveille la tâche de reprise quand le lien tombe
    reconnect: Arc<Notify>,
}

/// Origine d'un message reçu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSource {
    pub addr: SocketAddr,
    /// Voisin identifié par son HELLO sur cette connexion
    pub neighbor: Option<String>,
}

impl InboundSource {
    pub fn new(addr: SocketAddr) -> Self {
        InboundSource { addr, neighbor: None }
    }

    pub fn from_neighbor(addr: SocketAddr, neighbor: &str) -> Self {
        InboundSource { addr, neighbor: Some(neighbor.to_string()) }
    }
}

pub struct ConnectionManager {
    node_id: String,
    proto: String,
    neighbors: AdjacencyRow,
    links: Mutex<HashMap<String, NeighborLink>>,
    retry_delay: Duration,
    connect_timeout: Duration,
    max_frame_len: usize,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionManager {
    pub fn new(
        node_id: &str,
        proto: &str,
        neighbors: &AdjacencyRow,
        settings: &NodeSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let links = neighbors
            .keys()
            .map(|id| {
                (id.clone(), NeighborLink {
                    status: LinkStatus::Disconnected,
                    writer: None,
                    reconnect: Arc::new(Notify::new()),
                })
            })
            .collect();
        ConnectionManager {
            node_id: node_id.to_string(),
            proto: proto.to_string(),
            neighbors: neighbors.clone(),
            links: Mutex::new(links),
            retry_delay: settings.retry_delay(),
            connect_timeout: settings.connect_timeout(),
            max_frame_len: settings.max_frame_len,
            shutdown,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Voisins configurés et coûts des liens
    pub fn neighbors(&self) -> &AdjacencyRow {
        &self.neighbors
    }

    pub fn is_neighbor(&self, node: &str) -> bool {
        self.neighbors.contains_key(node)
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow() && self.shutdown.has_changed().is_ok()
    }

    pub async fn status(&self, neighbor: &str) -> Option<LinkStatus> {
        self.links.lock().await.get(neighbor).map(|l| l.status)
    }

    pub async fn connected_neighbors(&self) -> Vec<String> {
        let links = self.links.lock().await;
        let mut connected: Vec<String> = links
            .iter()
            .filter(|(_, l)| l.status == LinkStatus::Connected)
            .map(|(id, _)| id.clone())
            .collect();
        connected.sort();
        connected
    }

    /// Attend que tous les liens sortants soient établis. `false` si le délai expire.
    pub async fn wait_for_links(&self, timeout: Duration) -> bool {
        let all_up = async {
            loop {
                if self.connected_neighbors().await.len() == self.neighbors.len() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        tokio::time::timeout(timeout, all_up).await.is_ok()
    }

    /// Lance une tâche de connexion par voisin ; ne bloque jamais l'appelant
    pub fn connect_all(self: &Arc<Self>, address_book: &AddressBook) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for neighbor in self.neighbors.keys() {
            match address_book.get(neighbor) {
                Some(address) => {
                    handles.push(spawn_connect_task(Arc::clone(self), neighbor.clone(), address.clone()));
                }
                None => warn!("[{}] No address for neighbor {}, link stays down", self.node_id, neighbor),
            }
        }
        handles
    }

    /// Boucle de maintien d'un lien : connexion, HELLO, attente de la coupure, reprise
    pub(crate) async fn maintain_link(self: Arc<Self>, neighbor: String, address: String) {
        let mut shutdown = self.shutdown.clone();
        let mut attempt: u64 = 0;
        while self.is_running() {
            let Some(reconnect) = self.begin_attempt(&neighbor).await else {
                return;
            };
            attempt += 1;

            match self.open_link(&neighbor, &address).await {
                Ok(writer) => {
                    attempt = 0;
                    self.mark_connected(&neighbor, writer).await;
                    info!("[{}] Connected to neighbor {} at {}", self.node_id, neighbor, address);
                    tokio::select! {
                        _ = reconnect.notified() => {
                            info!("[{}] Link to {} lost, reconnecting", self.node_id, neighbor);
                        }
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
                Err(e) => {
                    self.set_status(&neighbor, LinkStatus::Disconnected).await;
                    warn!("[{}] Connection attempt {} to {} ({}) failed: {}",
                          self.node_id, attempt, neighbor, address, e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            }
        }
        debug!("[{}] Link task for {} stopped", self.node_id, neighbor);
    }

    async fn begin_attempt(&self, neighbor: &str) -> Option<Arc<Notify>> {
        let mut links = self.links.lock().await;
        let link = links.get_mut(neighbor)?;
        link.status = LinkStatus::Connecting;
        Some(Arc::clone(&link.reconnect))
    }

    async fn open_link(&self, neighbor: &str, address: &str) -> Result<SharedWriter> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| AppError::NetworkError(format!("connect to {} timed out", address)))?
            .map_err(|e| AppError::NetworkError(format!("connect to {}: {}", address, e)))?;
        stream.set_nodelay(true)?;
        // Le voisin n'écrit jamais sur ce lien ; seule la moitié écriture sert
        let (_read, mut write) = stream.into_split();
        write_frame(&mut write, &Message::hello(&self.proto, &self.node_id, neighbor)).await?;
        Ok(Arc::new(Mutex::new(write)))
    }

    async fn mark_connected(&self, neighbor: &str, writer: SharedWriter) {
        let mut links = self.links.lock().await;
        if let Some(link) = links.get_mut(neighbor) {
            link.writer = Some(writer);
            link.status = LinkStatus::Connected;
        }
    }

    async fn set_status(&self, neighbor: &str, status: LinkStatus) {
        if let Some(link) = self.links.lock().await.get_mut(neighbor) {
            link.status = status;
        }
    }

    /// Coupe le lien si `writer` est toujours celui en place, puis réveille la reprise
    async fn tear_down(&self, neighbor: &str, writer: &SharedWriter) {
        let mut links = self.links.lock().await;
        if let Some(link) = links.get_mut(neighbor) {
            let current = link.writer.as_ref().map_or(false, |w| Arc::ptr_eq(w, writer));
            if current {
                link.writer = None;
                link.status = LinkStatus::Disconnected;
                link.reconnect.notify_one();
            }
        }
    }

    /// Ferme toutes les connexions sortantes
    pub async fn close_all(&self) {
        let mut links = self.links.lock().await;
        for link in links.values_mut() {
            link.writer = None;
            link.status = LinkStatus::Disconnected;
        }
    }

    /// Envoie un message sur le lien sortant du voisin. Ne lève jamais d'erreur.
    pub async fn send(&self, neighbor: &str, message: &Message) -> bool {
        let writer = {
            let links = self.links.lock().await;
            match links.get(neighbor) {
                Some(link) if link.status == LinkStatus::Connected => link.writer.clone(),
                Some(_) => None,
                None => {
                    warn!("[{}] {} is not a neighbor", self.node_id, neighbor);
                    return false;
                }
            }
        };
        let Some(writer) = writer else {
            debug!("[{}] Neighbor {} not connected, message dropped", self.node_id, neighbor);
            return false;
        };

        let result = {
            let mut stream = writer.lock().await;
            write_frame(&mut *stream, message).await
        };
        match result {
            Ok(()) => {
                debug!("[{}] [SEND] {} to {}: {:?}", self.node_id, message.kind, neighbor, message);
                true
            }
            Err(e) => {
                error!("[{}] Error sending message to {}: {}", self.node_id, neighbor, e);
                self.tear_down(neighbor, &writer).await;
                false
            }
        }
    }

    /// Envoie à chaque voisin connecté sauf `exclude` ; retourne le nombre d'envois réussis
    pub async fn broadcast(&self, message: &Message, exclude: Option<&str>) -> usize {
        let mut sent_count = 0;
        for neighbor in self.connected_neighbors().await {
            if Some(neighbor.as_str()) == exclude {
                continue;
            }
            if self.send(&neighbor, message).await {
                sent_count += 1;
            }
        }
        debug!("[{}] Message relayed to {} neighbors", self.node_id, sent_count);
        sent_count
    }

    /// Ouvre le port d'écoute ; un échec ici est fatal pour le nœud
    pub async fn listen(host: &str, port: u16) -> Result<TcpListener> {
        let listener = TcpListener::bind((host, port)).await
            .map_err(|e| AppError::NetworkError(format!("Cannot bind {}:{}: {}", host, port, e)))?;
        info!("Listening on {}:{}", host, port);
        Ok(listener)
    }

    /// Boucle d'acceptation ; une tâche de réception par connexion
    pub(crate) async fn serve(self: Arc<Self>, listener: TcpListener, engine: Arc<RoutingEngine>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("[{}] Connection accepted from {}", self.node_id, addr);
                        spawn_receive_task(Arc::clone(&self), stream, addr, Arc::clone(&engine));
                    }
                    Err(e) => {
                        error!("[{}] Accept failed: {}", self.node_id, e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
        info!("[{}] Listener closed", self.node_id);
    }

    /// Lit les trames une à une et les remet au moteur de routage.
    /// Un message illisible est ignoré ; la connexion reste ouverte.
    pub(crate) async fn receive_loop(
        self: Arc<Self>,
        mut stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<RoutingEngine>,
    ) {
        let mut shutdown = self.shutdown.clone();
        let mut source = InboundSource::new(addr);
        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut stream, self.max_frame_len) => frame,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };
            let body = match frame {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("[{}] Connection from {} closed", self.node_id, addr);
                    break;
                }
                Err(e) => {
                    warn!("[{}] Dropping connection from {}: {}", self.node_id, addr, e);
                    break;
                }
            };
            let message = match decode_message(&body) {
                Ok(message) => message,
                Err(e) => {
                    error!("[{}] Malformed message from {}: {}", self.node_id, addr, e);
                    continue;
                }
            };

            if message.kind == MessageType::Hello && self.is_neighbor(&message.from) {
                info!("[{}] [RECV] HELLO from {} ({})", self.node_id, message.from, addr);
                source.neighbor = Some(message.from.clone());
            } else {
                info!("[{}] [RECV] {} from {} to {} via {}", self.node_id, message.kind, message.from, message.to, addr);
            }
            engine.handle_inbound(message, &source).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net_utils::encode_frame;
    use crate::types::Cost;
    use tokio::io::AsyncWriteExt;

    fn settings() -> NodeSettings {
        NodeSettings {
            retry_delay_ms: 50,
            connect_timeout_ms: 500,
            ..NodeSettings::default()
        }
    }

    fn manager(neighbors: &[(&str, Cost)], shutdown: watch::Receiver<bool>) -> Arc<ConnectionManager> {
        let row: AdjacencyRow = neighbors.iter().map(|(n, c)| (n.to_string(), *c)).collect();
        Arc::new(ConnectionManager::new("A", "flooding", &row, &settings(), shutdown))
    }

    async fn read_message(stream: &mut TcpStream) -> Message {
        let body = read_frame(stream, 1 << 20).await.unwrap().unwrap();
        decode_message(&body).unwrap()
    }

    #[tokio::test]
    async fn test_send_to_disconnected_neighbor_returns_false() {
        let (_tx, rx) = watch::channel(false);
        let manager = manager(&[("B", 1.0)], rx);
        assert_eq!(manager.status("B").await, Some(LinkStatus::Disconnected));
        assert!(!manager.send("B", &Message::data("flooding", "A", "B", 3, "x")).await);
        assert!(!manager.send("Z", &Message::data("flooding", "A", "Z", 3, "x")).await);
        assert_eq!(manager.broadcast(&Message::data("flooding", "A", "B", 3, "x"), None).await, 0);
    }

    #[tokio::test]
    async fn test_connect_sends_hello_then_messages() {
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut book = AddressBook::new();
        book.insert("B".to_string(), peer.local_addr().unwrap().to_string());

        let (tx, rx) = watch::channel(false);
        let manager = manager(&[("B", 2.0)], rx);
        let handles = manager.connect_all(&book);
        assert_eq!(handles.len(), 1);

        let (mut stream, _) = peer.accept().await.unwrap();
        let hello = read_message(&mut stream).await;
        assert_eq!(hello.kind, MessageType::Hello);
        assert_eq!(hello.from, "A");
        assert_eq!(hello.ttl, 1);

        assert!(manager.wait_for_links(Duration::from_secs(2)).await);
        let msg = Message::data("flooding", "A", "B", 3, "payload");
        assert!(manager.send("B", &msg).await);
        assert_eq!(read_message(&mut stream).await, msg);

        tx.send_replace(true);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_connect_retries_until_peer_appears() {
        // Réserve un port puis le libère : la première tentative échoue
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let mut book = AddressBook::new();
        book.insert("B".to_string(), addr.to_string());
        let (tx, rx) = watch::channel(false);
        let manager = manager(&[("B", 1.0)], rx);
        let _handles = manager.connect_all(&book);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_ne!(manager.status("B").await, Some(LinkStatus::Connected));

        let peer = TcpListener::bind(addr).await.unwrap();
        let (mut stream, _) = peer.accept().await.unwrap();
        assert_eq!(read_message(&mut stream).await.kind, MessageType::Hello);
        assert!(manager.wait_for_links(Duration::from_secs(2)).await);
        tx.send_replace(true);
    }

    #[tokio::test]
    async fn test_failed_write_tears_down_and_reconnects() {
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = peer.local_addr().unwrap();
        let mut book = AddressBook::new();
        book.insert("B".to_string(), addr.to_string());

        let (tx, rx) = watch::channel(false);
        let manager = manager(&[("B", 1.0)], rx);
        let _handles = manager.connect_all(&book);
        let (mut stream, _) = peer.accept().await.unwrap();
        assert_eq!(read_message(&mut stream).await.kind, MessageType::Hello);
        assert!(manager.wait_for_links(Duration::from_secs(2)).await);

        // Le voisin disparaît : plus de connexion ni d'écoute
        drop(stream);
        drop(peer);

        // La première écriture peut encore partir dans le tampon ; le RST fait échouer la suivante
        let msg = Message::data("flooding", "A", "B", 3, "lost");
        let mut failed = false;
        for _ in 0..100 {
            if !manager.send("B", &msg).await {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(failed);
        assert_ne!(manager.status("B").await, Some(LinkStatus::Connected));
        assert!(manager.connected_neighbors().await.is_empty());

        // La tâche de reprise a été réveillée et échoue tant que personne n'écoute
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while manager.status("B").await != Some(LinkStatus::Disconnected) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.status("B").await, Some(LinkStatus::Disconnected));
        assert!(!manager.send("B", &msg).await);

        // Le voisin revient sur le même port : nouveau HELLO, lien rétabli
        let peer = TcpListener::bind(addr).await.unwrap();
        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(2), peer.accept()).await.unwrap().unwrap();
        assert_eq!(read_message(&mut stream).await.kind, MessageType::Hello);
        assert!(manager.wait_for_links(Duration::from_secs(2)).await);
        let again = Message::data("flooding", "A", "B", 3, "back");
        assert!(manager.send("B", &again).await);
        assert_eq!(read_message(&mut stream).await, again);
        tx.send_replace(true);
    }

    #[tokio::test]
    async fn test_missing_address_skips_neighbor() {
        let (_tx, rx) = watch::channel(false);
        let manager = manager(&[("B", 1.0)], rx);
        assert!(manager.connect_all(&AddressBook::new()).is_empty());
        assert!(!manager.wait_for_links(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_bind_failure_is_an_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = ConnectionManager::listen("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, AppError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let (_tx, rx) = watch::channel(false);
        let manager = manager(&[("B", 1.0)], rx);
        let engine = Arc::new(RoutingEngine::flooding());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Arc::clone(&manager).serve(listener, Arc::clone(&engine)));

        // Moteur non lié : chaque message lisible est compté comme abandonné
        let mut client = TcpStream::connect(addr).await.unwrap();
        let garbage = b"{broken";
        client.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        client.write_all(garbage).await.unwrap();
        client.write_all(&encode_frame(&Message::data("flooding", "X", "A", 3, "ok")).unwrap()).await.unwrap();
        client.write_all(&encode_frame(&Message::data("flooding", "X", "A", 3, "ok too")).unwrap()).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while engine.stats().dropped < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.stats().dropped, 2);
    }
}
