//! Emulate a ledger network of containerized validators, gateways, and clients.
//!
//! A [Network] turns a declarative list of node roles into a running, mutually-consistent
//! fleet: it assigns every node a non-conflicting identity, generates one shared [Genesis]
//! (and the key material of each validator), renders per-node configuration, and drives each
//! node through its lifecycle against a container [runtime::Runtime].
//!
//! # Lifecycle
//!
//! `declare` → `provision_all` → `start` (→ ready) → `stop`
//!
//! Genesis generation always completes before any node is configured. Per-node failures
//! (provisioning, configuration injection, readiness) are isolated and reported in a [Report];
//! failures that make the whole network unusable (allocation, genesis, consistency) abort
//! `start` before any process is launched.
//!
//! # Example
//!
//! ```rust,no_run
//! use commonware_emulator::{runtime::docker::Docker, Config, Declaration, Network, Role};
//!
//! # async fn run() -> Result<(), commonware_emulator::Error> {
//! let runtime = Docker::new("emulator", "/tmp/emulator");
//! runtime.create_network("10.0.0.0/24").await?;
//! let mut network = Network::new(runtime, Config::default());
//! for i in 1..=4 {
//!     let address = format!("10.0.0.{i}").parse().unwrap();
//!     network.declare(Declaration::new(format!("validator{i}"), Role::Validator, address))?;
//! }
//! network.declare(Declaration::new("gateway", Role::Gateway, "10.0.0.100".parse().unwrap()))?;
//!
//! let report = network.start(&mut rand::rngs::OsRng).await?;
//! println!("{} nodes ready", report.ready().count());
//! network.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Status
//!
//! `commonware-emulator` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

use std::{net::IpAddr, time::Duration};
use thiserror::Error;

pub mod allocator;
pub mod config;
pub mod genesis;
pub mod mocks;
pub mod network;
pub mod node;
pub mod runtime;
pub mod topology;
pub mod utils;

pub use genesis::{Genesis, KeyMaterial};
pub use network::{Config, GenesisPolicy, Interrupt, Network, Report, Status};
pub use node::State;
pub use topology::{Declaration, NodeSpec, Role, Topology};

/// Errors that can occur when emulating a network.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ordinal {0} exceeds the addressable range ({1} ordinals)")]
    AllocationExhausted(usize, usize),
    #[error("port already assigned: {0}")]
    PortConflict(u16),
    #[error("address already assigned: {0}")]
    DuplicateAddress(IpAddr),
    #[error("{0} nodes do not expose RPC")]
    RpcUnsupported(Role),
    #[error("node already declared: {0}")]
    DuplicateNode(String),
    #[error("invalid node name: {0}")]
    InvalidName(String),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("genesis generation failed: {0}")]
    GenesisGenerationFailed(String),
    #[error("genesis mismatch: {0}")]
    GenesisMismatch(String),
    #[error("genesis cannot be regenerated while nodes are running")]
    GenesisInUse,
    #[error("invalid key")]
    InvalidKey,
    #[error("missing key material: {0}")]
    MissingKeyMaterial(String),
    #[error("missing RPC port: {0}")]
    MissingRpcPort(String),
    #[error("no gateway to serve {0}")]
    NoGateway(String),
    #[error("provision failed for {0}: {1}")]
    ProvisionFailed(String, Box<Error>),
    #[error("config injection failed for {0}: {1}")]
    ConfigInjectionFailed(String, Box<Error>),
    #[error("start failed for {0}: {1}")]
    StartFailed(String, Box<Error>),
    #[error("{0} not ready after {1:?}")]
    ReadinessTimeout(String, Duration),
    #[error("teardown failed for {0}: {1}")]
    TeardownFailed(String, Box<Error>),
    #[error("teardown failed for {} nodes", .0.len())]
    Teardown(Vec<Error>),
    #[error("invalid transition for {node}: {from:?} -> {to:?}")]
    InvalidTransition { node: String, from: State, to: State },
    #[error("quorum unavailable: {available} validators available, {required} required")]
    QuorumUnavailable { available: usize, required: usize },
    #[error("nodes still running: {0}")]
    Running(usize),
    #[error("no node became ready")]
    NoReadyNodes(Report),
    #[error("interrupted ({} teardown failures)", .0.len())]
    Interrupted(Vec<Error>),
    #[error("command failed ({command}): {stderr}")]
    Command { command: String, stderr: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
