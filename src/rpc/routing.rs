//! Node address table: `node_id -> host:port`.
//!
//! A `parking_lot::RwLock`-guarded map with a version counter bumped on
//! every mutation and an export/import snapshot pair.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{HermesError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn to_socket_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Inner {
    nodes: HashMap<u32, NodeAddress>,
    version: u64,
}

pub struct RoutingTable {
    inner: RwLock<Inner>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner { nodes: HashMap::new(), version: 0 }) }
    }

    pub fn from_hosts(hosts: &[String], default_port: u16) -> Self {
        let table = Self::new();
        for (i, host) in hosts.iter().enumerate() {
            let (addr, port) = match host.split_once(':') {
                Some((h, p)) => (h.to_string(), p.parse().unwrap_or(default_port)),
                None => (host.clone(), default_port),
            };
            table.set_node(i as u32, NodeAddress { host: addr, port });
        }
        table
    }

    pub fn set_node(&self, node_id: u32, addr: NodeAddress) {
        let mut inner = self.inner.write();
        inner.nodes.insert(node_id, addr);
        inner.version += 1;
    }

    pub fn remove_node(&self, node_id: u32) {
        let mut inner = self.inner.write();
        if inner.nodes.remove(&node_id).is_some() {
            inner.version += 1;
        }
    }

    pub fn resolve(&self, node_id: u32) -> Result<NodeAddress> {
        self.inner
            .read()
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or(HermesError::RpcUnreachable(node_id))
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn export(&self) -> Vec<(u32, NodeAddress)> {
        self.inner.read().nodes.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    pub fn import(&self, nodes: Vec<(u32, NodeAddress)>) {
        let mut inner = self.inner.write();
        inner.nodes = nodes.into_iter().collect();
        inner.version += 1;
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_hosts() {
        let table = RoutingTable::from_hosts(&["10.0.0.1:9000".to_string()], 8211);
        let addr = table.resolve(0).unwrap();
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, 9000);
    }

    #[test]
    fn unknown_node_is_unreachable() {
        let table = RoutingTable::new();
        assert!(matches!(table.resolve(9), Err(HermesError::RpcUnreachable(9))));
    }

    #[test]
    fn export_import_roundtrips() {
        let a = RoutingTable::new();
        a.set_node(1, NodeAddress { host: "h".into(), port: 1 });
        let snapshot = a.export();
        let b = RoutingTable::new();
        b.import(snapshot);
        assert_eq!(b.resolve(1).unwrap().port, 1);
    }
}
