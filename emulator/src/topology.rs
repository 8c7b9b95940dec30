//! Declarative description of the nodes that make up a network.

use crate::{
    allocator::Ports,
    genesis::Parameters,
    network::{Config, GenesisPolicy, Readiness},
};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, time::Duration};

/// Maximum length of a node name (also used as its container name).
pub const MAX_NAME_LEN: usize = 63;

/// The part a node plays in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Participates in consensus and holds private key material.
    Validator,
    /// Fullnode that exposes an RPC endpoint.
    Gateway,
    /// Issues requests against a gateway. Has no ledger identity.
    Client,
}

impl Role {
    /// Returns true if nodes of this role expose an RPC endpoint.
    pub fn has_rpc(&self) -> bool {
        matches!(self, Self::Gateway)
    }

    /// Returns true if nodes of this role run the node executable and join the ledger.
    pub fn is_ledger(&self) -> bool {
        matches!(self, Self::Validator | Self::Gateway)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validator => write!(f, "validator"),
            Self::Gateway => write!(f, "gateway"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Characteristics of the virtual link between a host and the shared switch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// One-way latency in milliseconds.
    pub latency_ms: u64,
    /// Bandwidth in megabits per second.
    pub bandwidth_mbps: Option<u64>,
}

/// A node as requested by a caller, before any identity is assigned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub role: Role,
    pub address: IpAddr,
    /// Requested RPC port (only meaningful for RPC-capable roles). When absent,
    /// the well-known RPC port is requested.
    #[serde(default)]
    pub rpc_port: Option<u16>,
    #[serde(default)]
    pub link: Option<Link>,
}

impl Declaration {
    /// Declare a node with no explicit RPC port and no link shaping.
    pub fn new(name: impl Into<String>, role: Role, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            role,
            address,
            rpc_port: None,
            link: None,
        }
    }

    /// Request a specific RPC port.
    pub fn with_rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = Some(port);
        self
    }

    /// Shape the node's link to the switch.
    pub fn with_link(mut self, link: Link) -> Self {
        self.link = Some(link);
        self
    }
}

/// A declared node with its assigned identity. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: Role,
    pub address: IpAddr,
    pub p2p_port: u16,
    pub rpc_port: Option<u16>,
    pub metrics_port: u16,
    pub link: Option<Link>,
}

/// Returns true if `name` can be used as a node (and container) name.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

fn default_image() -> String {
    crate::network::DEFAULT_IMAGE.to_string()
}

fn default_binary() -> String {
    crate::network::DEFAULT_BINARY.to_string()
}

fn default_network() -> String {
    "emulator".to_string()
}

fn default_subnet() -> String {
    "10.0.0.0/24".to_string()
}

fn default_concurrency() -> usize {
    crate::network::DEFAULT_CONCURRENCY
}

fn default_readiness_timeout_ms() -> u64 {
    crate::network::DEFAULT_READINESS_TIMEOUT.as_millis() as u64
}

fn default_readiness_interval_ms() -> u64 {
    crate::network::DEFAULT_READINESS_INTERVAL.as_millis() as u64
}

fn default_require_quorum() -> bool {
    true
}

fn default_ready_pattern() -> String {
    crate::network::DEFAULT_READY_PATTERN.to_string()
}

/// A network as described in a YAML file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Name of the switch all hosts attach to.
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_subnet")]
    pub subnet: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
    #[serde(default)]
    pub genesis_policy: GenesisPolicy,
    #[serde(default)]
    pub ports: Ports,
    #[serde(default)]
    pub parameters: Parameters,
    /// Abort `up` if fewer than a quorum of validators could be provisioned.
    #[serde(default = "default_require_quorum")]
    pub require_quorum: bool,
    /// Log line that marks a validator as ready.
    #[serde(default = "default_ready_pattern")]
    pub ready_pattern: String,
    pub nodes: Vec<Declaration>,
}

impl Topology {
    /// Derive the orchestrator configuration described by this topology.
    pub fn config(&self) -> Config {
        Config {
            image: self.image.clone(),
            binary: self.binary.clone(),
            concurrency: self.concurrency.max(1),
            readiness: Readiness {
                timeout: Duration::from_millis(self.readiness_timeout_ms),
                interval: Duration::from_millis(self.readiness_interval_ms),
            },
            genesis_policy: self.genesis_policy,
            ports: self.ports.clone(),
            parameters: self.parameters.clone(),
            require_quorum: self.require_quorum,
            ready_pattern: self.ready_pattern.clone(),
        }
    }
}
