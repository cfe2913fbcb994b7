//! Agent Registry - Connection Identity and Authorization
//!
//! Assigns every registered agent a random private id (the authorization
//! token for all requests, known only to the server and that agent) and a
//! sequential public id (what other agents see). Keeps explicit
//! bidirectional maps between connections, private ids, and public ids —
//! a lookup is never a scan. Registration pins the connection's network
//! origin to the id: re-use of a bound id is accepted only from the same
//! origin, anything else is refused and the original binding stands.

use std::collections::HashMap;
use std::net::IpAddr;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::error::MarketError;
use crate::domain::value::{AgentId, PublicId};
use crate::ports::transport::{ConnectionId, Origin};

/// Result of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
  pub agent: AgentId,
  pub public: PublicId,
  /// False when an existing id was rebound to a new connection.
  pub fresh: bool,
}

#[derive(Default)]
struct RegistryInner {
  agent_by_connection: HashMap<ConnectionId, AgentId>,
  connection_by_agent: HashMap<AgentId, ConnectionId>,
  public_by_agent: HashMap<AgentId, PublicId>,
  agent_by_public: HashMap<PublicId, AgentId>,
  origin_by_agent: HashMap<AgentId, IpAddr>,
  next_public: PublicId,
}

pub struct AgentRegistry {
  inner: RwLock<RegistryInner>,
}

impl AgentRegistry {
  pub fn new() -> Self {
    Self {
      inner: RwLock::new(RegistryInner::default()),
    }
  }

  /// Register a connection, either freshly or by reclaiming an id.
  ///
  /// A reconnect succeeds only when the new connection's network origin
  /// matches the one the id was first bound to; a mismatch refuses the
  /// registration without assigning anything.
  pub async fn register(
    &self,
    connection: ConnectionId,
    origin: Origin,
    reconnect: Option<AgentId>,
  ) -> Result<Registered, MarketError> {
    let mut inner = self.inner.write().await;

    if let Some(agent) = reconnect {
      let Some(bound) = inner.origin_by_agent.get(&agent).copied() else {
        warn!(agent = agent, "Reconnect attempt with unknown agent id");
        return Err(MarketError::RegistrationRefused(
          "unknown agent id".to_string(),
        ));
      };
      if bound != origin.ip() {
        warn!(
          agent = agent,
          origin = %origin,
          "Reconnect refused: origin does not match the original binding"
        );
        return Err(MarketError::RegistrationRefused(
          "id is bound to a different network origin".to_string(),
        ));
      }
      // Same origin: drop the stale connection and rebind.
      if let Some(old) = inner.connection_by_agent.insert(agent, connection) {
        inner.agent_by_connection.remove(&old);
      }
      inner.agent_by_connection.insert(connection, agent);
      let public = inner.public_by_agent[&agent];
      info!(agent = agent, public = public, "Agent reconnected");
      return Ok(Registered {
        agent,
        public,
        fresh: false,
      });
    }

    if inner.agent_by_connection.contains_key(&connection) {
      return Err(MarketError::RegistrationRefused(
        "connection is already registered".to_string(),
      ));
    }

    let mut rng = rand::thread_rng();
    let mut agent: AgentId = rng.gen_range(1..1_000_000_000);
    while inner.public_by_agent.contains_key(&agent) {
      agent = rng.gen_range(1..1_000_000_000);
    }

    let public = inner.next_public;
    inner.next_public += 1;
    inner.agent_by_connection.insert(connection, agent);
    inner.connection_by_agent.insert(agent, connection);
    inner.public_by_agent.insert(agent, public);
    inner.agent_by_public.insert(public, agent);
    inner.origin_by_agent.insert(agent, origin.ip());

    info!(agent = agent, public = public, origin = %origin, "Agent registered");
    Ok(Registered {
      agent,
      public,
      fresh: true,
    })
  }

  /// The authenticated agent behind a connection, if registered.
  pub async fn agent_for(&self, connection: ConnectionId) -> Option<AgentId> {
    self
      .inner
      .read()
      .await
      .agent_by_connection
      .get(&connection)
      .copied()
  }

  pub async fn connection_for(&self, agent: AgentId) -> Option<ConnectionId> {
    self
      .inner
      .read()
      .await
      .connection_by_agent
      .get(&agent)
      .copied()
  }

  pub async fn public_of(&self, agent: AgentId) -> Option<PublicId> {
    self.inner.read().await.public_by_agent.get(&agent).copied()
  }

  pub async fn private_of(&self, public: PublicId) -> Option<AgentId> {
    self.inner.read().await.agent_by_public.get(&public).copied()
  }

  /// All currently connected agents with their connections.
  pub async fn connected(&self) -> Vec<(ConnectionId, AgentId)> {
    self
      .inner
      .read()
      .await
      .agent_by_connection
      .iter()
      .map(|(c, a)| (*c, *a))
      .collect()
  }

  /// Drop the connection binding. Identity and origin survive so the
  /// agent can reconnect from the same origin.
  pub async fn disconnect(&self, connection: ConnectionId) {
    let mut inner = self.inner.write().await;
    if let Some(agent) = inner.agent_by_connection.remove(&connection) {
      inner.connection_by_agent.remove(&agent);
      info!(agent = agent, "Agent disconnected");
    }
  }

  pub async fn len(&self) -> usize {
    self.inner.read().await.agent_by_connection.len()
  }
}

impl Default for AgentRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin(ip: &str) -> Origin {
    format!("{ip}:9000").parse().unwrap()
  }

  #[tokio::test]
  async fn test_fresh_registration_assigns_sequential_public_ids() {
    let registry = AgentRegistry::new();
    let a = registry.register(1, origin("10.0.0.1"), None).await.unwrap();
    let b = registry.register(2, origin("10.0.0.2"), None).await.unwrap();
    assert!(a.fresh && b.fresh);
    assert_eq!(a.public, 0);
    assert_eq!(b.public, 1);
    assert_ne!(a.agent, b.agent);
    assert_eq!(registry.private_of(a.public).await, Some(a.agent));
    assert_eq!(registry.public_of(b.agent).await, Some(b.public));
  }

  #[tokio::test]
  async fn test_reconnect_same_origin_rebinds() {
    let registry = AgentRegistry::new();
    let reg = registry.register(1, origin("10.0.0.1"), None).await.unwrap();
    // Same host, new ephemeral port and connection.
    let back = registry
      .register(7, "10.0.0.1:5555".parse().unwrap(), Some(reg.agent))
      .await
      .unwrap();
    assert!(!back.fresh);
    assert_eq!(back.agent, reg.agent);
    assert_eq!(registry.agent_for(7).await, Some(reg.agent));
    assert_eq!(registry.agent_for(1).await, None);
  }

  #[tokio::test]
  async fn test_reconnect_foreign_origin_refused_binding_retained() {
    let registry = AgentRegistry::new();
    let reg = registry.register(1, origin("10.0.0.1"), None).await.unwrap();
    let err = registry
      .register(8, origin("172.16.0.9"), Some(reg.agent))
      .await
      .unwrap_err();
    assert!(matches!(err, MarketError::RegistrationRefused(_)));
    // Original binding untouched; the intruder got nothing.
    assert_eq!(registry.agent_for(1).await, Some(reg.agent));
    assert_eq!(registry.agent_for(8).await, None);
  }

  #[tokio::test]
  async fn test_unknown_reconnect_id_refused() {
    let registry = AgentRegistry::new();
    let err = registry
      .register(1, origin("10.0.0.1"), Some(424242))
      .await
      .unwrap_err();
    assert!(matches!(err, MarketError::RegistrationRefused(_)));
  }
}
