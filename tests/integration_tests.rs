// Nœuds réels sur des ports éphémères de localhost

use std::time::Duration;
use tokio::net::TcpListener;

use routing_sim::net_utils::send_message;
use routing_sim::read_config::{neighbors_of, parse_topology, AddressBook, NodeSettings, TopologyConfig};
use routing_sim::routing::{Algorithm, RoutingEngine};
use routing_sim::types::Message;
use routing_sim::Node;

fn settings() -> NodeSettings {
    NodeSettings {
        retry_delay_ms: 50,
        connect_timeout_ms: 500,
        startup_grace_ms: 3000,
        ..NodeSettings::default()
    }
}

/// Démarre un nœud par entrée de la topologie, tous liés avant le premier connect
async fn start_network(topology: &TopologyConfig, algorithm: Algorithm) -> (Vec<Node>, AddressBook) {
    let settings = settings();
    let mut book = AddressBook::new();
    let mut listeners = Vec::new();
    for id in topology.keys() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        book.insert(id.clone(), listener.local_addr().unwrap().to_string());
        listeners.push((id.clone(), listener));
    }

    let mut nodes = Vec::new();
    for (id, listener) in listeners {
        let engine = RoutingEngine::from_algorithm(algorithm, topology, &settings);
        let mut node = Node::new(&id, neighbors_of(topology, &id), engine, &settings);
        node.start_with_listener(listener, &book).unwrap();
        nodes.push(node);
    }
    for node in &nodes {
        assert!(node.connections().wait_for_links(Duration::from_secs(5)).await, "links of {} not up", node.id());
    }
    (nodes, book)
}

fn node<'a>(nodes: &'a [Node], id: &str) -> &'a Node {
    nodes.iter().find(|n| n.id() == id).unwrap()
}

async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

async fn stop(nodes: Vec<Node>) {
    for mut node in nodes {
        node.shutdown().await;
    }
}

fn chain() -> TopologyConfig {
    parse_topology(r#"{"type": "topo", "config": {
        "A": {"B": 1},
        "B": {"A": 1, "C": 1},
        "C": {"B": 1}
    }}"#).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flooding_chain_forwards_once_and_delivers_once() {
    let (nodes, book) = start_network(&chain(), Algorithm::Flooding).await;

    let message = Message::data("flooding", "A", "C", 5, "hello C");
    send_message(&book["A"], &message, "[TEST]").await.unwrap();

    let c = node(&nodes, "C");
    assert!(eventually(Duration::from_secs(3), || c.stats().delivered == 1).await);
    // Laisse passer un éventuel écho avant de compter
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(node(&nodes, "B").stats().forwarded, 1);
    assert_eq!(node(&nodes, "B").stats().delivered, 0);
    assert_eq!(c.stats().delivered, 1);
    assert_eq!(c.stats().forwarded, 0);

    stop(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dvr_runs_as_flooding() {
    let (nodes, book) = start_network(&chain(), Algorithm::Dvr).await;
    assert_eq!(node(&nodes, "A").engine().proto(), "flooding");

    send_message(&book["C"], &Message::data("flooding", "C", "A", 5, "back"), "[TEST]").await.unwrap();
    let a = node(&nodes, "A");
    assert!(eventually(Duration::from_secs(3), || a.stats().delivered == 1).await);

    stop(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dijkstra_routes_around_expensive_link() {
    let topology = parse_topology(r#"{"type": "topo", "config": {
        "A": {"B": 1, "C": 10},
        "B": {"A": 1, "C": 1},
        "C": {"A": 10, "B": 1}
    }}"#).unwrap();
    let (nodes, book) = start_network(&topology, Algorithm::Dijkstra).await;

    let table = node(&nodes, "A").engine().routing_table().await.unwrap();
    assert_eq!(table.next_hop("C"), Some("B"));

    send_message(&book["A"], &Message::data("dijkstra", "A", "C", 5, "shortest"), "[TEST]").await.unwrap();
    let c = node(&nodes, "C");
    assert!(eventually(Duration::from_secs(3), || c.stats().delivered == 1).await);
    let b = node(&nodes, "B");
    assert!(eventually(Duration::from_secs(1), || b.stats().forwarded == 1).await);
    assert_eq!(node(&nodes, "A").stats().forwarded, 1);

    stop(nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_link_state_converges_and_routes() {
    let (nodes, book) = start_network(&chain(), Algorithm::Lsr).await;
    let a = node(&nodes, "A");

    let mut converged = false;
    for _ in 0..150 {
        let table = a.engine().routing_table().await.unwrap();
        if let Some(route) = table.get_route("C") {
            assert_eq!(route.next_hop, "B");
            assert_eq!(route.cost, 2.0);
            assert_eq!(route.path, vec!["A", "B", "C"]);
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(converged, "A never learned a route to C");

    let topology = a.engine().topology().await.unwrap();
    assert_eq!(topology.row("B"), chain().get("B"));

    send_message(&book["A"], &Message::data("lsr", "A", "C", 5, "over lsr"), "[TEST]").await.unwrap();
    let c = node(&nodes, "C");
    assert!(eventually(Duration::from_secs(3), || c.stats().delivered == 1).await);

    stop(nodes).await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_break_node() {
    use tokio::io::AsyncWriteExt;

    let topology = parse_topology(r#"{"type": "topo", "config": {"A": {}}}"#).unwrap();
    let (nodes, book) = start_network(&topology, Algorithm::Flooding).await;

    let mut stream = tokio::net::TcpStream::connect(&book["A"]).await.unwrap();
    let garbage = b"{not json";
    stream.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
    stream.write_all(garbage).await.unwrap();
    let valid = routing_sim::net_utils::encode_frame(&Message::data("flooding", "X", "A", 3, "ok")).unwrap();
    stream.write_all(&valid).await.unwrap();

    let a = node(&nodes, "A");
    assert!(eventually(Duration::from_secs(3), || a.stats().delivered == 1).await);

    stop(nodes).await;
}
