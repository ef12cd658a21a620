// Inondation avec déduplication : chaque message est traité une seule fois par nœud
// puis relayé à tous les voisins sauf celui d'où il vient.

use std::collections::HashSet;
use log::{debug, info};
use tokio::sync::Mutex;

use super::{Disposition, NodeHandle};
use crate::connection::InboundSource;
use crate::types::{Fingerprint, Message, MessageType};

pub struct Flooding {
    /// Croît pendant toute la vie du processus, jamais purgé
    seen_messages: Mutex<HashSet<Fingerprint>>,
}

impl Flooding {
    pub fn new() -> Self {
        Flooding {
            seen_messages: Mutex::new(HashSet::new()),
        }
    }

    pub async fn seen_count(&self) -> usize {
        self.seen_messages.lock().await.len()
    }

    pub async fn handle_message(&self, node: &NodeHandle, message: Message, source: &InboundSource) -> Disposition {
        if message.kind == MessageType::Hello {
            debug!("[{}] HELLO from {} not flooded", node.id(), message.from);
            return Disposition::Ignored;
        }

        // Vérification et insertion sous le même verrou
        if !self.seen_messages.lock().await.insert(message.fingerprint()) {
            info!("[{}] Message already received: {}, not propagating", node.id(), message.payload);
            return Disposition::Duplicate;
        }

        // TTL vérifié avant la destination
        let message = message.hop();
        if message.ttl == 0 {
            debug!("[{}] TTL exhausted for message from {}", node.id(), message.from);
            return Disposition::TtlExpired;
        }

        if message.to == node.id() {
            info!("[{}] Message reached its destination: {}", node.id(), message.payload);
            return Disposition::Delivered;
        }

        let exclude = source.neighbor.as_deref().unwrap_or(message.from.as_str());
        let sent = node.broadcast(&message, Some(exclude)).await;
        info!("[{}] [FORWARD] Message from {} to {} relayed to {} neighbors (ttl {})",
              node.id(), message.from, message.to, sent, message.ttl);
        Disposition::Forwarded { sent }
    }
}

impl Default for Flooding {
    fn default() -> Self {
        Self::new()
    }
}
