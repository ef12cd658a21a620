// Lancement des tâches de fond du nœud

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::routing::RoutingEngine;

/// Se termine quand l'arrêt est demandé ou que l'émetteur a disparu
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub fn spawn_connect_task(manager: Arc<ConnectionManager>, neighbor: String, address: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        manager.maintain_link(neighbor, address).await;
    })
}

pub fn spawn_listener_task(
    manager: Arc<ConnectionManager>,
    listener: TcpListener,
    engine: Arc<RoutingEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        manager.serve(listener, engine).await;
    })
}

pub fn spawn_receive_task(
    manager: Arc<ConnectionManager>,
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<RoutingEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        manager.receive_loop(stream, addr, engine).await;
    })
}

pub fn spawn_engine_task(engine: Arc<RoutingEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        engine.start().await;
    })
}
