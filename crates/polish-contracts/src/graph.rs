use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::GraphError;

/// What a connection endpoint is, as a tagged variant rather than the
/// CSS-class membership the browser UI keys off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortKind {
    /// A text card's socket. Accepts one chain edge and one prompt edge
    /// at the same time, tracked independently.
    OutputSocket,
    /// A prompt template's placeholder plug. Holds at most one edge.
    InputPlug,
    /// A text card's chain-out plug. Holds at most one edge.
    ChainPlug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    Chain,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: String,
    pub kind: PortKind,
    pub owner: String,
    /// Placeholder index for an `InputPlug`, `None` for card-level ports.
    pub slot: Option<usize>,
}

/// A directed link, normalized so that `source` is always the plug side
/// and `target` the socket side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub created_at: u128,
}

/// Result of a successful `connect`: the new edge plus whatever edges the
/// source port implicitly tore down (last-write-wins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub edge: Edge,
    pub displaced: Vec<Edge>,
}

/// Port/edge bookkeeping for the card canvas, independent of any rendering
/// tree. Occupancy is keyed by `(port id, edge kind)` so a socket can hold
/// one chain edge and one prompt edge simultaneously while plugs stay
/// single-edge.
#[derive(Debug, Default)]
pub struct ConnectionGraph {
    ports: BTreeMap<String, Port>,
    edges: BTreeMap<String, Edge>,
    occupancy: BTreeMap<(String, EdgeKind), String>,
    /// Chain adjacency: plug-owning card id -> socket-owning card id.
    chain_next: BTreeMap<String, String>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&mut self, port: Port) {
        self.ports.insert(port.id.clone(), port);
    }

    pub fn port(&self, id: &str) -> Option<&Port> {
        self.ports.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_occupied(&self, port_id: &str, kind: EdgeKind) -> bool {
        self.occupancy.contains_key(&(port_id.to_string(), kind))
    }

    /// Edges currently touching a port, in edge-kind order.
    pub fn edges_at(&self, port_id: &str) -> Vec<&Edge> {
        [EdgeKind::Chain, EdgeKind::Prompt]
            .into_iter()
            .filter_map(|kind| self.occupancy.get(&(port_id.to_string(), kind)))
            .filter_map(|edge_id| self.edges.get(edge_id))
            .collect()
    }

    /// The card a text card's chain plug currently points at.
    pub fn chain_successor(&self, card_id: &str) -> Option<&str> {
        self.chain_next.get(card_id).map(String::as_str)
    }

    /// Connects two ports. `source` is the port the interaction started
    /// from; any edge of the same kind already occupying it is torn down
    /// first and reported in the outcome. The target must be free for the
    /// edge kind being formed.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<ConnectOutcome, GraphError> {
        let source_port = self
            .ports
            .get(source)
            .ok_or_else(|| GraphError::UnknownPort(source.to_string()))?
            .clone();
        let target_port = self
            .ports
            .get(target)
            .ok_or_else(|| GraphError::UnknownPort(target.to_string()))?
            .clone();

        if source == target {
            return Err(GraphError::InvalidConnection {
                source: source_port.kind,
                target: target_port.kind,
            });
        }

        // Legal pairings are plug<->socket in either direction; normalize
        // to plug -> socket.
        let (plug, socket) = match (source_port.kind, target_port.kind) {
            (PortKind::InputPlug, PortKind::OutputSocket)
            | (PortKind::ChainPlug, PortKind::OutputSocket) => (&source_port, &target_port),
            (PortKind::OutputSocket, PortKind::InputPlug)
            | (PortKind::OutputSocket, PortKind::ChainPlug) => (&target_port, &source_port),
            (source, target) => {
                return Err(GraphError::InvalidConnection { source, target });
            }
        };
        let kind = match plug.kind {
            PortKind::ChainPlug => EdgeKind::Chain,
            _ => EdgeKind::Prompt,
        };

        // The source's own edge is about to be displaced, so it does not
        // count as occupying the target.
        let source_edge = self.occupancy.get(&(source.to_string(), kind)).cloned();
        if let Some(occupant) = self.occupancy.get(&(target.to_string(), kind)) {
            if source_edge.as_deref() != Some(occupant.as_str()) {
                return Err(GraphError::PortOccupied(target.to_string()));
            }
        }

        if kind == EdgeKind::Chain && self.would_close_loop(&plug.owner, &socket.owner) {
            return Err(GraphError::CycleDetected {
                from: plug.owner.clone(),
                to: socket.owner.clone(),
            });
        }

        let displaced = self.remove_edges_at(source, Some(kind));

        let edge = Edge {
            id: format!("edge_{}", uuid::Uuid::new_v4()),
            source: plug.id.clone(),
            target: socket.id.clone(),
            kind,
            created_at: timestamp_millis(),
        };
        self.occupancy
            .insert((plug.id.clone(), kind), edge.id.clone());
        self.occupancy
            .insert((socket.id.clone(), kind), edge.id.clone());
        if kind == EdgeKind::Chain {
            self.chain_next
                .insert(plug.owner.clone(), socket.owner.clone());
        }
        self.edges.insert(edge.id.clone(), edge.clone());

        Ok(ConnectOutcome { edge, displaced })
    }

    /// Removes every edge touching `port_id` (up to two for a socket).
    /// A no-op for unknown or unconnected ports.
    pub fn disconnect(&mut self, port_id: &str) -> Vec<Edge> {
        self.remove_edges_at(port_id, None)
    }

    /// Disconnects and unregisters every port owned by `card_id`.
    pub fn remove_card_ports(&mut self, card_id: &str) -> Vec<Edge> {
        let owned: Vec<String> = self
            .ports
            .values()
            .filter(|port| port.owner == card_id)
            .map(|port| port.id.clone())
            .collect();
        let mut removed = Vec::new();
        for port_id in owned {
            removed.extend(self.remove_edges_at(&port_id, None));
            self.ports.remove(&port_id);
        }
        removed
    }

    /// Card ids reachable by following chain edges from `card_id`, the
    /// starting card first. Stops at the end of the chain or on a revisit;
    /// the revisit guard should never trigger while `connect` holds the
    /// acyclicity invariant.
    pub fn chain_from(&self, card_id: &str) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut current = card_id.to_string();
        while visited.insert(current.clone()) {
            order.push(current.clone());
            match self.chain_next.get(&current) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        order
    }

    fn remove_edges_at(&mut self, port_id: &str, only: Option<EdgeKind>) -> Vec<Edge> {
        let mut removed = Vec::new();
        for kind in [EdgeKind::Chain, EdgeKind::Prompt] {
            if only.is_some_and(|wanted| wanted != kind) {
                continue;
            }
            let Some(edge_id) = self.occupancy.remove(&(port_id.to_string(), kind)) else {
                continue;
            };
            let Some(edge) = self.edges.remove(&edge_id) else {
                continue;
            };
            self.occupancy.remove(&(edge.source.clone(), kind));
            self.occupancy.remove(&(edge.target.clone(), kind));
            if kind == EdgeKind::Chain {
                if let Some(plug) = self.ports.get(&edge.source) {
                    self.chain_next.remove(&plug.owner);
                }
            }
            removed.push(edge);
        }
        removed
    }

    /// Would a chain edge from `plug_owner`'s plug into `socket_owner`'s
    /// socket close a loop? Walks the existing chain forward from the
    /// socket owner with a visited set.
    fn would_close_loop(&self, plug_owner: &str, socket_owner: &str) -> bool {
        let mut visited = BTreeSet::new();
        let mut current = socket_owner.to_string();
        loop {
            if current == plug_owner {
                return true;
            }
            if !visited.insert(current.clone()) {
                return false;
            }
            match self.chain_next.get(&current) {
                Some(next) => current = next.clone(),
                None => return false,
            }
        }
    }
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}
