// Table de routage dérivée du calcul de plus courts chemins.
// Jamais modifiée à la main : une recomputation la remplace entièrement.

use serde::Serialize;
use std::collections::BTreeMap;
use crate::types::Cost;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub destination: String,
    pub next_hop: String,
    pub cost: Cost,
    /// Du nœud local jusqu'à la destination incluse
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingTable {
    routes: BTreeMap<String, Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable {
            routes: BTreeMap::new(),
        }
    }

    pub(crate) fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        RoutingTable {
            routes: routes.into_iter().map(|r| (r.destination.clone(), r)).collect(),
        }
    }

    pub fn get_route(&self, destination: &str) -> Option<&Route> {
        self.routes.get(destination)
    }

    pub fn next_hop(&self, destination: &str) -> Option<&str> {
        self.routes.get(destination).map(|r| r.next_hop.as_str())
    }

    pub fn contains(&self, destination: &str) -> bool {
        self.routes.contains_key(destination)
    }

    pub fn list_routes(&self) -> Vec<&Route> {
        self.routes.values().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
