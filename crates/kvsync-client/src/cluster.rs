//! Cluster topology discovery from `CLUSTER NODES` output.

use crate::slot::SlotRange;

/// Role of a node as reported by `CLUSTER NODES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Primary: owns slots and accepts writes.
    Primary,
    /// Replica of another node.
    Replica,
    /// Neither flag present (handshake, fresh node).
    Unknown,
}

/// One line of `CLUSTER NODES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// 40-character node id.
    pub id: String,
    /// `host:port` clients connect to (cluster bus port and hostname stripped).
    pub addr: String,
    /// Node role.
    pub role: NodeRole,
    /// Id of the primary, for replicas.
    pub primary_id: Option<String>,
    /// `fail`, `noaddr` or `handshake` is set.
    pub unhealthy: bool,
    /// Slots this node owns.
    pub slots: Vec<SlotRange>,
}

impl ClusterNode {
    /// A healthy primary with a usable address.
    pub fn is_serving_primary(&self) -> bool {
        self.role == NodeRole::Primary && !self.unhealthy && !self.addr.starts_with(':')
    }

    /// Fill in a missing host.
    ///
    /// A node that has not learned its own IP yet lists itself as `:port`;
    /// it is reachable on the host the listing was fetched from.
    pub fn resolve_empty_host(&mut self, host: &str) {
        if let Some(port) = self.addr.strip_prefix(':') {
            self.addr = if host.contains(':') {
                format!("[{}]:{}", host, port)
            } else {
                format!("{}:{}", host, port)
            };
        }
    }
}

/// Parse `CLUSTER NODES` output into structured node information.
///
/// Lines with fewer than eight fields are ignored.
pub fn parse_cluster_nodes(data: &str) -> Vec<ClusterNode> {
    let mut nodes = Vec::new();
    for line in data.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            continue;
        }

        // 7.x format: ip:port@cport[,hostname]
        let addr = parts[1]
            .split(|c: char| c == '@' || c == ',')
            .next()
            .unwrap_or(parts[1])
            .to_string();

        let flags: Vec<&str> = parts[2].split(',').collect();
        let role = if flags.contains(&"master") {
            NodeRole::Primary
        } else if flags.contains(&"slave") {
            NodeRole::Replica
        } else {
            NodeRole::Unknown
        };
        let unhealthy = flags
            .iter()
            .any(|f| matches!(*f, "fail" | "noaddr" | "handshake"));

        let primary_id = match parts[3] {
            "-" => None,
            id => Some(id.to_string()),
        };

        let slots = parts[8..]
            .iter()
            .filter_map(|token| SlotRange::parse(token))
            .collect();

        nodes.push(ClusterNode {
            id: parts[0].to_string(),
            addr,
            role,
            primary_id,
            unhealthy,
            slots,
        });
    }
    nodes
}
