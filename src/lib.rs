// Simulateur de réseau à commutation de paquets : nœuds reliés en TCP,
// routage par inondation, Dijkstra statique ou état de liens.

pub mod connection;
pub mod dijkstra;
pub mod error;
pub mod init;
pub mod net_utils;
pub mod node;
pub mod read_config;
pub mod routing;
pub mod routing_table;
pub mod tasks;
pub mod types;

pub use error::AppError;
pub use node::Node;
