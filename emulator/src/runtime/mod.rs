//! Interface to the container runtime (and the emulated network it attaches hosts to).
//!
//! Every declared node is one container (a virtual host) attached to a shared switch. The
//! orchestrator only ever holds a [Handle] to a container: creation, file transfer, process
//! execution, observation, and removal are all performed by a [Runtime].

use crate::{config::Artifact, topology::Link, Error};
use std::{fmt, future::Future, net::IpAddr};

pub mod docker;

/// Non-owning reference to a container managed by a [Runtime].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the node the container belongs to.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to create a container for a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub address: IpAddr,
    /// Ports the node listens on (exposed for inspection).
    pub ports: Vec<u16>,
    /// Shaping applied to the host's link to the switch.
    pub link: Option<Link>,
    pub privileged: bool,
}

/// A process to launch inside a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Process {
    pub program: String,
    pub args: Vec<String>,
    /// File that receives the process output.
    pub log: String,
}

/// An observable signal that a node is ready.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    /// `pattern` appears in the file at `path`.
    Log { path: String, pattern: String },
    /// A JSON-RPC request for `method` against `url` returns a result.
    Rpc { url: String, method: String },
}

/// Container runtime collaborator.
pub trait Runtime: Send + Sync {
    /// Create (and start) a container.
    fn create(&self, container: &Container) -> impl Future<Output = Result<Handle, Error>> + Send;

    /// Copy `artifact` into the container.
    fn copy(
        &self,
        handle: &Handle,
        artifact: &Artifact,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Launch `process` in the background. Returns once the process is issued, not once
    /// it has started.
    fn exec(
        &self,
        handle: &Handle,
        process: &Process,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Check `probe` once.
    fn probe(&self, handle: &Handle, probe: &Probe)
        -> impl Future<Output = Result<bool, Error>> + Send;

    /// Stop and remove the container. Removing a container that does not exist succeeds.
    fn remove(&self, handle: &Handle) -> impl Future<Output = Result<(), Error>> + Send;
}
