//! Node inventory: companion clients (desktop/mobile) connected with
//! `role:"node"`, tracked so `node.list`/`node.describe` can report them.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize)]
pub struct NodeSession {
    pub node_id: String,
    #[serde(skip)]
    pub conn_id: String,
    pub display_name: Option<String>,
    pub platform: String,
    #[serde(skip)]
    pub connected_at: Instant,
}

pub struct NodeRegistry {
    nodes: HashMap<String, NodeSession>,
    by_conn: HashMap<String, String>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            by_conn: HashMap::new(),
        }
    }

    pub fn register(&mut self, session: NodeSession) {
        self.by_conn
            .insert(session.conn_id.clone(), session.node_id.clone());
        self.nodes.insert(session.node_id.clone(), session);
    }

    pub fn unregister_by_conn(&mut self, conn_id: &str) -> Option<NodeSession> {
        let node_id = self.by_conn.remove(conn_id)?;
        self.nodes.remove(&node_id)
    }

    pub fn get(&self, node_id: &str) -> Result<&NodeSession> {
        self.nodes.get(node_id).ok_or(Error::NotFound)
    }

    pub fn list(&self) -> Vec<&NodeSession> {
        self.nodes.values().collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn session(node_id: &str, conn_id: &str) -> NodeSession {
        NodeSession {
            node_id: node_id.into(),
            conn_id: conn_id.into(),
            display_name: None,
            platform: "macos".into(),
            connected_at: Instant::now(),
        }
    }

    #[test]
    fn register_then_describe() {
        let mut reg = NodeRegistry::new();
        reg.register(session("n1", "c1"));
        assert_eq!(reg.get("n1").unwrap().node_id, "n1");
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn unregister_by_conn_removes_node() {
        let mut reg = NodeRegistry::new();
        reg.register(session("n1", "c1"));
        let removed = reg.unregister_by_conn("c1").unwrap();
        assert_eq!(removed.node_id, "n1");
        assert!(reg.get("n1").is_err());
    }
}
