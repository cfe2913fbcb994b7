//! Channel Transport - In-Process Message Delivery
//!
//! Transport adapter backed by tokio channels, used by local simulations
//! and the integration tests: each "connection" is an unbounded mpsc
//! whose receiver plays the client. Delivery failures to one peer never
//! affect the others, matching the network adapter's contract.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::ports::transport::{ConnectionId, Outbound, Transport};

pub struct ChannelTransport {
    peers: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a peer; the returned receiver sees everything the server
    /// pushes to this connection.
    pub async fn connect(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().await.insert(connection, tx);
        rx
    }

    pub async fn disconnect(&self, connection: ConnectionId) {
        self.peers.write().await.remove(&connection);
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, connection: ConnectionId, message: Outbound) -> anyhow::Result<()> {
        let peers = self.peers.read().await;
        match peers.get(&connection) {
            Some(peer) => {
                if peer.send(message).is_err() {
                    debug!(connection = connection, "Peer receiver dropped");
                }
                Ok(())
            }
            None => anyhow::bail!("connection {connection} is not attached"),
        }
    }

    async fn broadcast(&self, message: Outbound) -> anyhow::Result<()> {
        let peers = self.peers.read().await;
        for (connection, peer) in peers.iter() {
            if peer.send(message.clone()).is_err() {
                debug!(connection = connection, "Peer receiver dropped during broadcast");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Account;

    #[tokio::test]
    async fn test_send_reaches_only_the_target() {
        let transport = ChannelTransport::new();
        let mut rx1 = transport.connect(1).await;
        let mut rx2 = transport.connect(2).await;

        transport
            .send(
                1,
                Outbound::BankUpdate {
                    old: None,
                    new: Account::new(7),
                },
            )
            .await
            .unwrap();

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let transport = ChannelTransport::new();
        let mut rx1 = transport.connect(1).await;
        let mut rx2 = transport.connect(2).await;

        transport
            .broadcast(Outbound::BankUpdate {
                old: None,
                new: Account::new(7),
            })
            .await
            .unwrap();

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_errors() {
        let transport = ChannelTransport::new();
        let result = transport
            .send(
                99,
                Outbound::BankUpdate {
                    old: None,
                    new: Account::new(7),
                },
            )
            .await;
        assert!(result.is_err());
    }
}
