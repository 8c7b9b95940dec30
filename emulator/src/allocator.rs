//! Assign addresses and ports to declared nodes.
//!
//! Peer-to-peer ports are an arithmetic function of a node's ordinal (`base + ordinal * stride`),
//! so the same topology always yields the same ports. RPC ports are only handed to RPC-capable
//! roles, must be unique within a network, and may never fall on a port of the peer-to-peer
//! sequence (even one no node holds yet). The metrics port is shared by every node (each node
//! lives on its own host) but is still recorded so it can be exposed.

use crate::{
    topology::{Declaration, NodeSpec, Role},
    Error,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, net::IpAddr};

/// Peer-to-peer port of the node with ordinal `0`.
pub const DEFAULT_P2P_BASE: u16 = 2001;

/// Distance between the peer-to-peer ports of consecutive ordinals.
pub const DEFAULT_P2P_STRIDE: u16 = 10;

/// Well-known RPC port.
pub const DEFAULT_RPC_PORT: u16 = 9000;

/// Well-known metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9184;

/// Port allocation strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    /// Peer-to-peer port of ordinal `0`.
    pub p2p_base: u16,
    /// Offset between consecutive ordinals.
    pub p2p_stride: u16,
    /// Highest peer-to-peer port that may be assigned.
    pub p2p_max: u16,
    /// RPC port requested by RPC-capable nodes that do not ask for one.
    pub rpc: u16,
    /// Metrics port of every node.
    pub metrics: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            p2p_base: DEFAULT_P2P_BASE,
            p2p_stride: DEFAULT_P2P_STRIDE,
            p2p_max: u16::MAX,
            rpc: DEFAULT_RPC_PORT,
            metrics: DEFAULT_METRICS_PORT,
        }
    }
}

impl Ports {
    /// Returns the peer-to-peer port of `ordinal`, or `None` if it falls outside of the
    /// addressable range.
    pub fn p2p(&self, ordinal: usize) -> Option<u16> {
        if self.p2p_stride == 0 && ordinal > 0 {
            return None;
        }
        let offset = u64::try_from(ordinal)
            .ok()?
            .checked_mul(self.p2p_stride as u64)?;
        let port = (self.p2p_base as u64).checked_add(offset)?;
        if port > self.p2p_max as u64 {
            return None;
        }
        u16::try_from(port).ok()
    }

    /// Returns true if `port` is the peer-to-peer port of some assignable ordinal.
    pub fn is_p2p(&self, port: u16) -> bool {
        if port < self.p2p_base || port > self.p2p_max {
            return false;
        }
        if self.p2p_stride == 0 {
            return port == self.p2p_base;
        }
        (port - self.p2p_base) % self.p2p_stride == 0
    }

    /// Number of ordinals that can be assigned a peer-to-peer port.
    pub fn capacity(&self) -> usize {
        if self.p2p_base > self.p2p_max {
            return 0;
        }
        if self.p2p_stride == 0 {
            return 1;
        }
        ((self.p2p_max - self.p2p_base) / self.p2p_stride) as usize + 1
    }
}

/// Identity assigned to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub address: IpAddr,
    pub p2p_port: u16,
    pub rpc_port: Option<u16>,
    pub metrics_port: u16,
}

/// Tracks the identities handed out within one network instance.
#[derive(Debug, Default)]
pub struct Allocator {
    ports: Ports,
    addresses: HashSet<IpAddr>,
    p2p: HashSet<u16>,
    rpc: HashSet<u16>,
}

impl Allocator {
    /// Create an allocator that assigns ports according to `ports`.
    pub fn new(ports: Ports) -> Self {
        Self {
            ports,
            addresses: HashSet::new(),
            p2p: HashSet::new(),
            rpc: HashSet::new(),
        }
    }

    /// Returns the allocation strategy.
    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    /// Assign an identity to a node with `role` at `ordinal`.
    ///
    /// Nothing is recorded unless the whole identity can be assigned.
    pub fn allocate(
        &mut self,
        role: Role,
        ordinal: usize,
        address: IpAddr,
        rpc_port: Option<u16>,
    ) -> Result<Identity, Error> {
        if self.addresses.contains(&address) {
            return Err(Error::DuplicateAddress(address));
        }
        let p2p_port = self
            .ports
            .p2p(ordinal)
            .ok_or(Error::AllocationExhausted(ordinal, self.ports.capacity()))?;
        if p2p_port == self.ports.metrics
            || self.p2p.contains(&p2p_port)
            || self.rpc.contains(&p2p_port)
        {
            return Err(Error::PortConflict(p2p_port));
        }
        let rpc_port = match (role.has_rpc(), rpc_port) {
            (true, requested) => {
                let port = requested.unwrap_or(self.ports.rpc);
                if port == self.ports.metrics
                    || self.ports.is_p2p(port)
                    || self.rpc.contains(&port)
                {
                    return Err(Error::PortConflict(port));
                }
                Some(port)
            }
            (false, Some(_)) => return Err(Error::RpcUnsupported(role)),
            (false, None) => None,
        };

        // Record
        self.addresses.insert(address);
        self.p2p.insert(p2p_port);
        if let Some(port) = rpc_port {
            self.rpc.insert(port);
        }
        Ok(Identity {
            address,
            p2p_port,
            rpc_port,
            metrics_port: self.ports.metrics,
        })
    }

    /// Assign an identity to `declaration` and return the resulting [NodeSpec].
    pub fn assign(&mut self, declaration: Declaration, ordinal: usize) -> Result<NodeSpec, Error> {
        let identity = self.allocate(
            declaration.role,
            ordinal,
            declaration.address,
            declaration.rpc_port,
        )?;
        Ok(NodeSpec {
            name: declaration.name,
            role: declaration.role,
            address: identity.address,
            p2p_port: identity.p2p_port,
            rpc_port: identity.rpc_port,
            metrics_port: identity.metrics_port,
            link: declaration.link,
        })
    }

    /// Forget every assigned identity.
    pub fn reset(&mut self) {
        self.addresses.clear();
        self.p2p.clear();
        self.rpc.clear();
    }
}
