// Initialisation commune aux binaires : journalisation et moteur de routage

use std::path::Path;
use log::info;

use crate::error::Result;
use crate::read_config::{read_topology, NodeSettings, TopologyConfig};
use crate::routing::{Algorithm, RoutingEngine};

/// `RUST_LOG` reste prioritaire ; sinon le niveau des réglages s'applique
pub fn init_logging_and_env(default_level: &str) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", default_level);
    }
    // Un second appel (tests) laisse le logger existant en place
    let _ = env_logger::try_init();
}

/// Topologie + moteur pour l'algorithme demandé
pub fn init_engine(algorithm: Algorithm, topo_path: &Path, settings: &NodeSettings) -> Result<(TopologyConfig, RoutingEngine)> {
    let topology = read_topology(topo_path)?;
    let engine = RoutingEngine::from_algorithm(algorithm, &topology, settings);
    info!("Routing engine initialised: {} (requested {})", engine.proto(), algorithm);
    Ok((topology, engine))
}
