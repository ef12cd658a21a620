// Définitions des structures et enums partagées

use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt;

/// Coût d'un lien tel qu'il apparaît dans la topologie
pub type Cost = f64;

/// Ligne d'adjacence : voisin -> coût
pub type AdjacencyRow = BTreeMap<String, Cost>;

/// TTL appliqué quand un message reçu n'en porte pas
pub const FALLBACK_TTL: u32 = 5;

fn fallback_ttl() -> u32 {
    FALLBACK_TTL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Message,
    Hello,
    Lsa,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Message => write!(f, "message"),
            MessageType::Hello => write!(f, "hello"),
            MessageType::Lsa => write!(f, "lsa"),
            MessageType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Enveloppe échangée entre les nœuds (un objet JSON par trame)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub proto: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default = "fallback_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Ligne d'adjacence annoncée, seulement pour les LSA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbors: Option<AdjacencyRow>,
}

impl Message {
    pub fn data(proto: &str, from: &str, to: &str, ttl: u32, payload: &str) -> Self {
        Message {
            proto: proto.to_string(),
            kind: MessageType::Message,
            from: from.to_string(),
            to: to.to_string(),
            ttl,
            headers: Vec::new(),
            payload: payload.to_string(),
            timestamp: now_millis(),
            id: None,
            neighbors: None,
        }
    }

    /// Premier message écrit sur un lien sortant, identifie l'émetteur auprès du voisin
    pub fn hello(proto: &str, from: &str, to: &str) -> Self {
        Message {
            proto: proto.to_string(),
            kind: MessageType::Hello,
            from: from.to_string(),
            to: to.to_string(),
            ttl: 1,
            headers: Vec::new(),
            payload: String::new(),
            timestamp: now_millis(),
            id: None,
            neighbors: None,
        }
    }

    pub fn lsa(proto: &str, originator: &str, neighbors: AdjacencyRow, timestamp: u64, ttl: u32) -> Self {
        Message {
            proto: proto.to_string(),
            kind: MessageType::Lsa,
            from: originator.to_string(),
            to: String::new(),
            ttl,
            headers: Vec::new(),
            payload: String::new(),
            timestamp,
            id: Some(lsa_id(originator, timestamp)),
            neighbors: Some(neighbors),
        }
    }

    /// Copie du message après un saut (TTL décrémenté une seule fois)
    pub fn hop(&self) -> Self {
        let mut next = self.clone();
        next.ttl = self.ttl.saturating_sub(1);
        next
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::Data {
            from: self.from.clone(),
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        }
    }

    pub fn lsa_fingerprint(&self) -> Option<Fingerprint> {
        self.id.as_ref().map(|id| Fingerprint::Lsa(id.clone()))
    }
}

/// Clé de déduplication d'un message déjà traité
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Data { from: String, timestamp: u64, payload: String },
    Lsa(String),
}

pub fn lsa_id(originator: &str, timestamp: u64) -> String {
    format!("{}_{}", originator, timestamp)
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0))
        .as_millis() as u64
}
