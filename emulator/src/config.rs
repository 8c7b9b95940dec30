//! Render per-node configuration.
//!
//! Configuration is produced in two phases: a [Builder] derives a [NodeConfig] from a node's
//! identity and the shared [Genesis], and [NodeConfig::materialize] turns it into the [Artifact]s
//! a node expects to find on disk. Transferring those artifacts is left to the caller.

use crate::{
    genesis::{Genesis, KeyMaterial, PrivateKey, PublicKey},
    topology::{NodeSpec, Role},
    utils::hex,
    Error,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Directory (inside a node) that holds injected configuration.
pub const CONFIG_DIR: &str = "/config";

/// Path of the node configuration file.
pub const NODE_CONFIG_PATH: &str = "/config/node.yaml";

/// Path of the genesis file.
pub const GENESIS_PATH: &str = "/config/genesis.yaml";

/// Path of the client configuration file.
pub const CLIENT_CONFIG_PATH: &str = "/root/.ledger/client.yaml";

/// Path of the node database.
pub const DB_PATH: &str = "/data/db";

/// Directory the node executable logs to.
pub const LOG_DIR: &str = "/var/log/ledger";

/// Log file of the node executable.
pub const LOG_PATH: &str = "/var/log/ledger/node.log";

/// Port of the node's internal network API.
pub const NETWORK_API_PORT: u16 = 8080;

/// Alias of the environment written to client configurations.
pub const CLIENT_ENV_ALIAS: &str = "emulator";

/// A file to place inside a node before it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// Absolute destination path inside the node.
    pub path: String,
    pub contents: Vec<u8>,
}

/// Format `address:port` as a multiaddr.
pub fn multiaddr(address: IpAddr, port: u16) -> String {
    match address {
        IpAddr::V4(ip) => format!("/ip4/{ip}/tcp/{port}"),
        IpAddr::V6(ip) => format!("/ip6/{ip}/tcp/{port}"),
    }
}

/// Location of the genesis file and the digest a node must observe in it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GenesisLocation {
    pub genesis_file_location: String,
    pub genesis_digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SeedPeer {
    pub name: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct P2pConfig {
    pub listen_address: String,
    pub external_address: String,
    pub seed_peers: Vec<SeedPeer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Configuration of a validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ValidatorConfig {
    pub db_path: String,
    pub network_address: String,
    pub metrics_address: String,
    pub genesis: GenesisLocation,
    pub p2p_config: P2pConfig,
    pub protocol_key_pair: KeyPair,
}

/// Configuration of a gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GatewayConfig {
    pub db_path: String,
    pub network_address: String,
    pub metrics_address: String,
    pub json_rpc_address: String,
    pub genesis: GenesisLocation,
    pub p2p_config: P2pConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Env {
    pub alias: String,
    pub rpc: String,
}

/// Configuration of a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClientConfig {
    pub envs: Vec<Env>,
    pub active_env: String,
}

/// Configuration of any node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeConfig {
    Validator(ValidatorConfig),
    Gateway(GatewayConfig),
    Client(ClientConfig),
}

impl NodeConfig {
    /// Path the node expects its configuration at.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Validator(_) | Self::Gateway(_) => NODE_CONFIG_PATH,
            Self::Client(_) => CLIENT_CONFIG_PATH,
        }
    }

    /// Serialize the configuration.
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Produce every file the node needs before it starts.
    pub fn materialize(&self, genesis: &Genesis) -> Result<Vec<Artifact>, Error> {
        let mut artifacts = Vec::with_capacity(2);
        if !matches!(self, Self::Client(_)) {
            artifacts.push(Artifact {
                path: GENESIS_PATH.to_string(),
                contents: serde_yaml::to_string(genesis)?.into_bytes(),
            });
        }
        artifacts.push(Artifact {
            path: self.path().to_string(),
            contents: self.to_yaml()?.into_bytes(),
        });
        Ok(artifacts)
    }
}

/// Derives [NodeConfig]s from a shared [Genesis].
pub struct Builder<'a> {
    genesis: &'a Genesis,
    gateway: Option<&'a NodeSpec>,
}

impl<'a> Builder<'a> {
    /// Create a builder for nodes of `topology`.
    ///
    /// Clients are pointed at the first gateway in `topology`.
    pub fn new(genesis: &'a Genesis, topology: impl IntoIterator<Item = &'a NodeSpec>) -> Self {
        let gateway = topology.into_iter().find(|spec| spec.role.has_rpc());
        Self { genesis, gateway }
    }

    fn genesis_location(&self) -> GenesisLocation {
        GenesisLocation {
            genesis_file_location: GENESIS_PATH.to_string(),
            genesis_digest: hex(&self.genesis.digest()),
        }
    }

    fn p2p_config(&self, spec: &NodeSpec) -> P2pConfig {
        let seed_peers = self
            .genesis
            .validators
            .iter()
            .filter(|v| v.name != spec.name)
            .map(|v| SeedPeer {
                name: v.name.clone(),
                address: multiaddr(v.address, v.p2p_port),
            })
            .collect();
        P2pConfig {
            listen_address: format!("0.0.0.0:{}", spec.p2p_port),
            external_address: multiaddr(spec.address, spec.p2p_port),
            seed_peers,
        }
    }

    /// Build the configuration of `spec`.
    ///
    /// `keys` must be provided for validators and is ignored for every other role.
    pub fn build(&self, spec: &NodeSpec, keys: Option<&KeyMaterial>) -> Result<NodeConfig, Error> {
        match spec.role {
            Role::Validator => {
                let keys = keys.ok_or_else(|| Error::MissingKeyMaterial(spec.name.clone()))?;
                let entry = self.genesis.validator(&spec.name).ok_or_else(|| {
                    Error::GenesisMismatch(format!("{} is not in genesis", spec.name))
                })?;
                if entry.public_key != keys.public_key
                    || keys.private_key.public_key() != keys.public_key
                {
                    return Err(Error::GenesisMismatch(format!(
                        "key material of {} does not match genesis",
                        spec.name
                    )));
                }
                if entry.address != spec.address || entry.p2p_port != spec.p2p_port {
                    return Err(Error::GenesisMismatch(format!(
                        "address of {} does not match genesis",
                        spec.name
                    )));
                }
                Ok(NodeConfig::Validator(ValidatorConfig {
                    db_path: DB_PATH.to_string(),
                    network_address: format!("/ip4/0.0.0.0/tcp/{NETWORK_API_PORT}/http"),
                    metrics_address: format!("0.0.0.0:{}", spec.metrics_port),
                    genesis: self.genesis_location(),
                    p2p_config: self.p2p_config(spec),
                    protocol_key_pair: KeyPair {
                        public_key: keys.public_key,
                        private_key: keys.private_key.clone(),
                    },
                }))
            }
            Role::Gateway => {
                let rpc_port = spec.rpc_port.ok_or(Error::MissingRpcPort(spec.name.clone()))?;
                Ok(NodeConfig::Gateway(GatewayConfig {
                    db_path: DB_PATH.to_string(),
                    network_address: format!("/ip4/0.0.0.0/tcp/{NETWORK_API_PORT}/http"),
                    metrics_address: format!("0.0.0.0:{}", spec.metrics_port),
                    json_rpc_address: format!("0.0.0.0:{rpc_port}"),
                    genesis: self.genesis_location(),
                    p2p_config: self.p2p_config(spec),
                }))
            }
            Role::Client => {
                let gateway = self
                    .gateway
                    .ok_or_else(|| Error::NoGateway(spec.name.clone()))?;
                let rpc_port = gateway
                    .rpc_port
                    .ok_or(Error::MissingRpcPort(gateway.name.clone()))?;
                Ok(NodeConfig::Client(ClientConfig {
                    envs: vec![Env {
                        alias: CLIENT_ENV_ALIAS.to_string(),
                        rpc: rpc_url(gateway.address, rpc_port),
                    }],
                    active_env: CLIENT_ENV_ALIAS.to_string(),
                }))
            }
        }
    }
}

/// Format the HTTP URL of an RPC endpoint.
pub fn rpc_url(address: IpAddr, port: u16) -> String {
    match address {
        IpAddr::V4(ip) => format!("http://{ip}:{port}"),
        IpAddr::V6(ip) => format!("http://[{ip}]:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::Generator;
    use rand::{rngs::StdRng, SeedableRng};
    use std::{collections::BTreeMap, net::Ipv4Addr};

    fn spec(name: &str, role: Role, last: u8, ordinal: u16) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            role,
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            p2p_port: 2001 + ordinal * 10,
            rpc_port: role.has_rpc().then_some(9000),
            metrics_port: 9184,
            link: None,
        }
    }

    fn topology() -> (Vec<NodeSpec>, Genesis, BTreeMap<String, KeyMaterial>) {
        let mut specs: Vec<NodeSpec> = (0..4)
            .map(|i| spec(&format!("validator{}", i + 1), Role::Validator, i as u8 + 1, i))
            .collect();
        specs.push(spec("gateway", Role::Gateway, 100, 4));
        specs.push(spec("client", Role::Client, 200, 5));
        let validators: Vec<&NodeSpec> = specs
            .iter()
            .filter(|s| s.role == Role::Validator)
            .collect();
        let (genesis, keys) = Generator::default()
            .generate(&mut StdRng::seed_from_u64(0), &validators, 0)
            .unwrap();
        (specs, genesis, keys)
    }

    #[test]
    fn test_validator_config() {
        let (specs, genesis, keys) = topology();
        let builder = Builder::new(&genesis, &specs);
        let config = builder.build(&specs[0], keys.get("validator1")).unwrap();
        let NodeConfig::Validator(config) = config else {
            panic!("expected validator config");
        };
        assert_eq!(config.p2p_config.external_address, "/ip4/10.0.0.1/tcp/2001");
        assert_eq!(config.p2p_config.listen_address, "0.0.0.0:2001");
        assert_eq!(config.p2p_config.seed_peers.len(), 3);
        assert!(config
            .p2p_config
            .seed_peers
            .iter()
            .all(|p| p.name != "validator1"));
        assert_eq!(config.protocol_key_pair.public_key, keys["validator1"].public_key);
        assert_eq!(config.genesis.genesis_digest, hex(&genesis.digest()));
        assert_eq!(config.metrics_address, "0.0.0.0:9184");
    }

    #[test]
    fn test_validator_requires_keys() {
        let (specs, genesis, keys) = topology();
        let builder = Builder::new(&genesis, &specs);
        assert!(matches!(
            builder.build(&specs[0], None),
            Err(Error::MissingKeyMaterial(_))
        ));
        assert!(matches!(
            builder.build(&specs[0], keys.get("validator2")),
            Err(Error::GenesisMismatch(_))
        ));
    }

    #[test]
    fn test_validator_outside_genesis() {
        let (specs, genesis, keys) = topology();
        let builder = Builder::new(&genesis, &specs);
        let stranger = spec("validator9", Role::Validator, 9, 9);
        assert!(matches!(
            builder.build(&stranger, keys.get("validator1")),
            Err(Error::GenesisMismatch(_))
        ));
    }

    #[test]
    fn test_gateway_config() {
        let (specs, genesis, keys) = topology();
        let builder = Builder::new(&genesis, &specs);

        // Key material is never embedded in a gateway
        let config = builder.build(&specs[4], keys.get("validator1")).unwrap();
        let NodeConfig::Gateway(config) = config else {
            panic!("expected gateway config");
        };
        assert_eq!(config.json_rpc_address, "0.0.0.0:9000");
        assert_eq!(config.p2p_config.external_address, "/ip4/10.0.0.100/tcp/2041");
        let peers: Vec<&str> = config
            .p2p_config
            .seed_peers
            .iter()
            .map(|p| p.address.as_str())
            .collect();
        assert_eq!(
            peers,
            [
                "/ip4/10.0.0.1/tcp/2001",
                "/ip4/10.0.0.2/tcp/2011",
                "/ip4/10.0.0.3/tcp/2021",
                "/ip4/10.0.0.4/tcp/2031",
            ]
        );
    }

    #[test]
    fn test_client_config() {
        let (specs, genesis, _) = topology();
        let builder = Builder::new(&genesis, &specs);
        let config = builder.build(&specs[5], None).unwrap();
        assert_eq!(config.path(), CLIENT_CONFIG_PATH);
        let NodeConfig::Client(client) = &config else {
            panic!("expected client config");
        };
        assert_eq!(client.envs[0].rpc, "http://10.0.0.100:9000");
        assert_eq!(client.active_env, CLIENT_ENV_ALIAS);

        // Clients receive no genesis
        let artifacts = config.materialize(&genesis).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, CLIENT_CONFIG_PATH);
    }

    #[test]
    fn test_client_without_gateway() {
        let (specs, genesis, _) = topology();
        let without: Vec<NodeSpec> = specs
            .iter()
            .filter(|s| s.role != Role::Gateway)
            .cloned()
            .collect();
        let builder = Builder::new(&genesis, &without);
        assert!(matches!(
            builder.build(&specs[5], None),
            Err(Error::NoGateway(_))
        ));
    }

    #[test]
    fn test_configs_round_trip() {
        let (specs, genesis, keys) = topology();
        let builder = Builder::new(&genesis, &specs);
        for spec in &specs {
            let config = builder.build(spec, keys.get(&spec.name)).unwrap();
            let decoded: NodeConfig = serde_yaml::from_str(&config.to_yaml().unwrap()).unwrap();
            assert_eq!(decoded, config);
        }
    }

    #[test]
    fn test_materialize_ledger_node() {
        let (specs, genesis, keys) = topology();
        let builder = Builder::new(&genesis, &specs);
        let config = builder.build(&specs[1], keys.get("validator2")).unwrap();
        let artifacts = config.materialize(&genesis).unwrap();
        let paths: Vec<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, [GENESIS_PATH, NODE_CONFIG_PATH]);

        let decoded: Genesis = serde_yaml::from_slice(&artifacts[0].contents).unwrap();
        assert_eq!(decoded.digest(), genesis.digest());
    }

    #[test]
    fn test_multiaddr() {
        assert_eq!(
            multiaddr("10.0.0.1".parse().unwrap(), 2001),
            "/ip4/10.0.0.1/tcp/2001"
        );
        assert_eq!(multiaddr("::1".parse().unwrap(), 2001), "/ip6/::1/tcp/2001");
        assert_eq!(rpc_url("::1".parse().unwrap(), 9000), "http://[::1]:9000");
    }
}
