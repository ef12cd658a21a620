// Module d'implémentation de l'algorithme de Dijkstra
// Topologie connue (nœud -> voisins -> coût) et calcul des plus courts chemins

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::cmp::Ordering;
use log::debug;
use crate::read_config::TopologyConfig;
use crate::routing_table::{Route, RoutingTable};
use crate::types::{AdjacencyRow, Cost};

/// Nœud utilisé dans la file de priorité de Dijkstra
#[derive(Debug, Clone)]
struct DijkstraNode {
    router_id: String,
    cost: Cost,
}

impl Ord for DijkstraNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Tas min : coût le plus faible d'abord, puis identifiant le plus petit
        other.cost.total_cmp(&self.cost)
            .then_with(|| other.router_id.cmp(&self.router_id))
    }
}

impl PartialOrd for DijkstraNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DijkstraNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DijkstraNode {}

/// Structure représentant la topologie connue du réseau.
/// Une ligne absente signifie "inconnu", pas "injoignable".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyStore {
    rows: BTreeMap<String, AdjacencyRow>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    pub fn from_config(config: TopologyConfig) -> Self {
        Self { rows: config }
    }

    /// Remplace entièrement la ligne d'un nœud (pas de fusion arête par arête)
    pub fn replace_row(&mut self, node: &str, row: AdjacencyRow) -> Option<AdjacencyRow> {
        self.rows.insert(node.to_string(), row)
    }

    pub fn row(&self, node: &str) -> Option<&AdjacencyRow> {
        self.rows.get(node)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Plus courts chemins depuis `source`.
    ///
    /// Relâchement strict (`<`) : à distance égale le premier prédécesseur trouvé reste.
    /// Les destinations sans chaîne de prédécesseurs jusqu'à la source sont omises.
    pub fn calculate_shortest_paths(&self, source: &str) -> RoutingTable {
        let mut distances: HashMap<&str, Cost> = HashMap::new();
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut heap = BinaryHeap::new();

        distances.insert(source, 0.0);
        heap.push(DijkstraNode {
            router_id: source.to_string(),
            cost: 0.0,
        });

        while let Some(current) = heap.pop() {
            let Some((current_id, best)) = distances.get_key_value(current.router_id.as_str()) else {
                continue;
            };
            let (current_id, best) = (*current_id, *best);
            // Entrée périmée : une meilleure distance a déjà été trouvée
            if current.cost > best {
                continue;
            }

            let Some(row) = self.rows.get(current_id) else {
                continue;
            };
            for (neighbor, weight) in row {
                let candidate = current.cost + weight;
                let known = distances.get(neighbor.as_str()).copied().unwrap_or(Cost::INFINITY);
                if candidate < known {
                    distances.insert(neighbor.as_str(), candidate);
                    previous.insert(neighbor.as_str(), current_id);
                    heap.push(DijkstraNode {
                        router_id: neighbor.clone(),
                        cost: candidate,
                    });
                }
            }
        }

        let mut routes = Vec::new();
        for (&destination, &cost) in &distances {
            if destination == source {
                continue;
            }
            let mut path = vec![destination.to_string()];
            let mut current = destination;
            while let Some(&prev) = previous.get(current) {
                path.push(prev.to_string());
                current = prev;
            }
            path.reverse();

            if path.len() > 1 && path[0] == source {
                routes.push(Route {
                    destination: destination.to_string(),
                    next_hop: path[1].clone(),
                    cost,
                    path,
                });
            }
        }

        let table = RoutingTable::from_routes(routes);
        for route in table.list_routes() {
            debug!("Route to {}: {:?} (cost: {})", route.destination, route.path, route.cost);
        }
        table
    }
}
