//! Orchestrate a fleet of nodes as one consistent ledger instance.
//!
//! A [Network] owns the declared topology, the [Allocator] that assigned its identities, and the
//! single [Genesis] every ledger node is configured from. Genesis is fixed before any node is
//! configured and is only ever read by per-node workflows, which then run concurrently (bounded
//! by [Config::concurrency]) against the [Runtime].

use crate::{
    allocator::{Allocator, Ports},
    config::{rpc_url, Artifact, Builder, LOG_PATH, NODE_CONFIG_PATH},
    genesis::{Generator, Genesis, KeyMaterial, Parameters},
    node::{Listener, Node, State},
    runtime::{Probe, Process, Runtime},
    topology::{valid_name, Declaration, NodeSpec, Role},
    utils::{hex, quorum},
    Error,
};
use futures::{stream, StreamExt};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, warn};

pub use crate::node::{Interrupt, Readiness};

/// Default container image of every node.
pub const DEFAULT_IMAGE: &str = "ledger-node:latest";

/// Default node executable (invoked inside the container).
pub const DEFAULT_BINARY: &str = "ledger-node";

/// Default number of node workflows driven at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default time a node has to report readiness.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(90);

/// Default time between readiness probes.
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(2);

/// Log line a validator writes once it participates in consensus.
pub const DEFAULT_READY_PATTERN: &str = "consensus started";

/// JSON-RPC method used to check that a gateway is serving requests.
pub const RPC_PROBE_METHOD: &str = "ledger_getChainIdentifier";

/// What `start` does with a genesis that already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenesisPolicy {
    /// Keep the existing genesis (it must still match the declared validator set).
    #[default]
    Reuse,
    /// Generate a new genesis (only allowed when no node is running).
    Regenerate,
}

/// Configuration of a [Network].
#[derive(Clone, Debug)]
pub struct Config {
    /// Container image of every node.
    pub image: String,
    /// Node executable invoked inside ledger nodes.
    pub binary: String,
    /// Maximum number of node workflows driven at once.
    pub concurrency: usize,
    pub readiness: Readiness,
    pub genesis_policy: GenesisPolicy,
    pub ports: Ports,
    pub parameters: Parameters,
    /// Abort `start` if fewer than a quorum of validators could be provisioned.
    pub require_quorum: bool,
    /// Log line that marks a validator as ready.
    pub ready_pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            binary: DEFAULT_BINARY.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            readiness: Readiness {
                timeout: DEFAULT_READINESS_TIMEOUT,
                interval: DEFAULT_READINESS_INTERVAL,
            },
            genesis_policy: GenesisPolicy::default(),
            ports: Ports::default(),
            parameters: Parameters::default(),
            require_quorum: true,
            ready_pattern: DEFAULT_READY_PATTERN.to_string(),
        }
    }
}

/// Outcome of a node after an operation.
#[derive(Debug)]
pub struct Status {
    pub name: String,
    pub role: Role,
    pub state: State,
    /// Error encountered by the node during the operation (if any).
    pub error: Option<Error>,
}

/// Per-node outcome of an operation, in declaration order.
#[derive(Debug, Default)]
pub struct Report {
    statuses: Vec<Status>,
}

impl Report {
    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn status(&self, name: &str) -> Option<&Status> {
        self.statuses.iter().find(|s| s.name == name)
    }

    /// Nodes that are ready.
    pub fn ready(&self) -> impl Iterator<Item = &Status> {
        self.statuses.iter().filter(|s| s.state == State::Ready)
    }

    /// Nodes that encountered an error.
    pub fn failed(&self) -> impl Iterator<Item = &Status> {
        self.statuses.iter().filter(|s| s.error.is_some())
    }
}

/// Everything a node needs to go from provisioned to ready.
struct Plan {
    artifacts: Vec<Artifact>,
    process: Option<Process>,
    probe: Option<Probe>,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Provision `node`, tearing down whatever a previous attempt left behind.
async fn provision<R: Runtime>(
    node: &mut Node,
    runtime: &R,
    image: &str,
    listener: &Listener,
) -> Result<(), Error> {
    if listener.is_triggered() {
        return Err(Error::Interrupted(Vec::new()));
    }
    if matches!(node.state(), State::Failed | State::Configured) {
        node.stop(runtime).await?;
    }
    node.provision(runtime, image).await
}

/// A declared fleet of nodes and the runtime it is deployed on.
pub struct Network<R: Runtime> {
    runtime: R,
    config: Config,
    allocator: Allocator,
    nodes: Vec<Node>,
    genesis: Option<Genesis>,
    keys: BTreeMap<String, KeyMaterial>,
    interrupt: Interrupt,
}

impl<R: Runtime> Network<R> {
    /// Create an empty network deployed on `runtime`.
    pub fn new(runtime: R, mut config: Config) -> Self {
        config.concurrency = config.concurrency.max(1);
        Self {
            runtime,
            allocator: Allocator::new(config.ports.clone()),
            config,
            nodes: Vec::new(),
            genesis: None,
            keys: BTreeMap::new(),
            interrupt: Interrupt::new(),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Declared nodes, in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the node called `name`.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Returns the state of the node called `name`.
    pub fn state(&self, name: &str) -> Option<State> {
        self.node(name).map(Node::state)
    }

    /// The genesis every ledger node is configured from (once generated).
    pub fn genesis(&self) -> Option<&Genesis> {
        self.genesis.as_ref()
    }

    /// Handle that interrupts an in-flight `provision_all` or `start`.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// RPC endpoint of the first gateway.
    pub fn rpc_url(&self) -> Option<String> {
        self.nodes
            .iter()
            .map(Node::spec)
            .find(|s| s.role.has_rpc())
            .and_then(|s| s.rpc_port.map(|port| rpc_url(s.address, port)))
    }

    /// Metrics endpoint of the node called `name`.
    pub fn metrics_url(&self, name: &str) -> Option<String> {
        self.node(name)
            .map(Node::spec)
            .filter(|s| s.role.is_ledger())
            .map(|s| format!("{}/metrics", rpc_url(s.address, s.metrics_port)))
    }

    /// Add a node to the topology.
    ///
    /// The node's ordinal is its position in the topology. If the node cannot be added, the
    /// topology (and every assigned identity) is left unchanged.
    pub fn declare(&mut self, declaration: Declaration) -> Result<&NodeSpec, Error> {
        if !valid_name(&declaration.name) {
            return Err(Error::InvalidName(declaration.name));
        }
        if self.node(&declaration.name).is_some() {
            return Err(Error::DuplicateNode(declaration.name));
        }
        let spec = self.allocator.assign(declaration, self.nodes.len())?;
        info!(
            node = spec.name.as_str(),
            role = %spec.role,
            address = %spec.address,
            p2p = spec.p2p_port,
            rpc = ?spec.rpc_port,
            "declared node"
        );
        self.nodes.push(Node::new(spec));
        let index = self.nodes.len() - 1;
        Ok(self.nodes[index].spec())
    }

    /// Create containers for every node that does not have one.
    ///
    /// Failures are isolated: every node is attempted and the outcome of each is reported.
    /// If the [Interrupt] is triggered while in flight, every node is torn down before
    /// returning [Error::Interrupted].
    pub async fn provision_all(&mut self) -> Result<Report, Error> {
        let listener = self.interrupt.listener();
        let errors = self.provision_pending(&listener).await;
        if listener.is_triggered() {
            return Err(self.abort().await);
        }
        Ok(self.report(errors))
    }

    /// Generate (or validate) genesis, then bring every node that is not running to ready.
    ///
    /// Allocation, genesis, and consistency errors abort before any process is launched.
    /// Per-node failures are isolated and surfaced in the returned [Report]. If no ledger node
    /// becomes ready, the report is returned as [Error::NoReadyNodes].
    ///
    /// With [Config::require_quorum], every node is provisioned before any node is configured.
    /// Otherwise each node moves through its whole workflow independently of its siblings.
    ///
    /// If the [Interrupt] is triggered while in flight, every node is torn down before
    /// returning [Error::Interrupted].
    pub async fn start<G: RngCore + CryptoRng>(&mut self, rng: &mut G) -> Result<Report, Error> {
        let listener = self.interrupt.listener();
        if listener.is_triggered() {
            return Err(self.abort().await);
        }

        // Fix genesis (and every config derived from it) before touching any node
        self.ensure_genesis(rng)?;
        let mut plans = self.plans(|node| !node.state().is_running())?;

        // Provision everything up front if a quorum must be available before launch
        let barrier = self.config.require_quorum;
        let mut errors = HashMap::new();
        if barrier {
            errors = self.provision_pending(&listener).await;
            if listener.is_triggered() {
                return Err(self.abort().await);
            }
            self.check_quorum()?;
        }

        // Provision (if not yet done), configure, launch, and await readiness
        let runtime = &self.runtime;
        let image = self.config.image.as_str();
        let readiness = &self.config.readiness;
        let pending = self
            .nodes
            .iter_mut()
            .filter(|node| {
                let state = node.state();
                if barrier {
                    state == State::Provisioned
                } else {
                    !state.is_running()
                }
            })
            .filter_map(|node| plans.remove(node.name()).map(|plan| (node, plan)));
        let results: Vec<(String, Result<(), Error>)> = stream::iter(pending)
            .map(|(node, plan)| {
                let listener = listener.clone();
                async move {
                    let result = async {
                        if node.state() != State::Provisioned {
                            provision(node, runtime, image, &listener).await?;
                        }
                        node.bring_up(
                            runtime,
                            &plan.artifacts,
                            plan.process.as_ref(),
                            plan.probe.as_ref(),
                            readiness,
                            listener.clone(),
                        )
                        .await
                    }
                    .await;
                    (node.name().to_string(), result)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        if listener.is_triggered() {
            return Err(self.abort().await);
        }
        for (name, result) in results {
            if let Err(err) = result {
                warn!(node = name.as_str(), ?err, "node failed");
                errors.insert(name, err);
            }
        }

        // Summarize
        let report = self.report(errors);
        let ready = self
            .nodes
            .iter()
            .filter(|n| n.spec().role.is_ledger() && n.state() == State::Ready)
            .count();
        if ready == 0 {
            return Err(Error::NoReadyNodes(report));
        }
        for status in report.statuses() {
            match &status.error {
                None => info!(
                    node = status.name.as_str(),
                    role = %status.role,
                    state = ?status.state,
                    "node status"
                ),
                Some(err) => warn!(
                    node = status.name.as_str(),
                    role = %status.role,
                    state = ?status.state,
                    %err,
                    "node status"
                ),
            }
        }
        if let Some(url) = self.rpc_url() {
            info!(rpc = url.as_str(), "gateway available");
        }
        info!(
            ready = report.ready().count(),
            failed = report.failed().count(),
            "network started"
        );
        Ok(report)
    }

    /// Tear down every node, regardless of its state.
    ///
    /// Every node is attempted. Failures are returned together as [Error::Teardown] and the
    /// affected nodes keep their containers so that `stop` can be retried. Once every node is
    /// stopped, genesis is discarded.
    pub async fn stop(&mut self) -> Result<(), Error> {
        let errors = self.teardown().await;
        self.interrupt.clear();
        if !errors.is_empty() {
            return Err(Error::Teardown(errors));
        }
        info!(nodes = self.nodes.len(), "network stopped");
        Ok(())
    }

    /// Forget the topology, every assigned identity, and genesis.
    ///
    /// Fails with [Error::Running] if any node still has a container.
    pub fn reset(&mut self) -> Result<(), Error> {
        let running = self.nodes.iter().filter(|n| n.handle().is_some()).count();
        if running > 0 {
            return Err(Error::Running(running));
        }
        self.nodes.clear();
        self.allocator.reset();
        self.genesis = None;
        self.keys.clear();
        self.interrupt.clear();
        debug!("network reset");
        Ok(())
    }

    /// Produce the artifacts of every node without touching the runtime.
    pub fn render<G: RngCore + CryptoRng>(
        &mut self,
        rng: &mut G,
    ) -> Result<BTreeMap<String, Vec<Artifact>>, Error> {
        self.ensure_genesis(rng)?;
        Ok(self
            .plans(|_| true)?
            .into_iter()
            .map(|(name, plan)| (name, plan.artifacts))
            .collect())
    }

    /// Generate genesis over the declared validators (or validate the existing one).
    fn ensure_genesis<G: RngCore + CryptoRng>(&mut self, rng: &mut G) -> Result<(), Error> {
        let validators: Vec<&NodeSpec> = self
            .nodes
            .iter()
            .map(Node::spec)
            .filter(|s| s.role == Role::Validator)
            .collect();
        if let Some(genesis) = &self.genesis {
            match self.config.genesis_policy {
                GenesisPolicy::Reuse => {
                    if !genesis.matches(validators.iter().map(|s| s.name.as_str())) {
                        let missing: Vec<&str> = validators
                            .iter()
                            .map(|s| s.name.as_str())
                            .filter(|name| genesis.validator(name).is_none())
                            .collect();
                        return Err(Error::GenesisMismatch(format!(
                            "genesis has {} validators, {} declared (not in genesis: {:?})",
                            genesis.validators.len(),
                            validators.len(),
                            missing
                        )));
                    }
                    debug!(digest = %hex(&genesis.digest()), "reusing genesis");
                    return Ok(());
                }
                GenesisPolicy::Regenerate => {
                    if self.nodes.iter().any(|n| n.state().is_running()) {
                        return Err(Error::GenesisInUse);
                    }
                }
            }
        }

        let generator = Generator::new(self.config.parameters.clone());
        let (genesis, keys) = generator.generate(rng, &validators, now())?;
        info!(
            validators = genesis.validators.len(),
            digest = %hex(&genesis.digest()),
            "generated genesis"
        );
        self.genesis = Some(genesis);
        self.keys = keys;
        Ok(())
    }

    /// Build the plan of every node selected by `include`.
    fn plans(&self, include: impl Fn(&Node) -> bool) -> Result<HashMap<String, Plan>, Error> {
        let genesis = self
            .genesis
            .as_ref()
            .ok_or_else(|| Error::GenesisMismatch("genesis not generated".to_string()))?;
        let builder = Builder::new(genesis, self.nodes.iter().map(Node::spec));
        let mut plans = HashMap::new();
        for node in self.nodes.iter().filter(|n| include(n)) {
            let spec = node.spec();
            let config = builder.build(spec, self.keys.get(&spec.name))?;
            let plan = Plan {
                artifacts: config.materialize(genesis)?,
                process: self.process(spec),
                probe: self.probe(spec),
            };
            plans.insert(spec.name.clone(), plan);
        }
        Ok(plans)
    }

    fn process(&self, spec: &NodeSpec) -> Option<Process> {
        spec.role.is_ledger().then(|| Process {
            program: self.config.binary.clone(),
            args: vec!["--config-path".to_string(), NODE_CONFIG_PATH.to_string()],
            log: LOG_PATH.to_string(),
        })
    }

    fn probe(&self, spec: &NodeSpec) -> Option<Probe> {
        match spec.role {
            Role::Validator => Some(Probe::Log {
                path: LOG_PATH.to_string(),
                pattern: self.config.ready_pattern.clone(),
            }),
            Role::Gateway => spec.rpc_port.map(|port| Probe::Rpc {
                url: rpc_url(spec.address, port),
                method: RPC_PROBE_METHOD.to_string(),
            }),
            Role::Client => None,
        }
    }

    /// Provision every node that is neither provisioned nor running.
    ///
    /// Nodes left failed (or half-configured) by a previous attempt are torn down first.
    async fn provision_pending(&mut self, listener: &Listener) -> HashMap<String, Error> {
        let runtime = &self.runtime;
        let image = self.config.image.as_str();
        let pending = self.nodes.iter_mut().filter(|node| {
            let state = node.state();
            state != State::Provisioned && !state.is_running()
        });
        let results: Vec<(String, Result<(), Error>)> = stream::iter(pending)
            .map(|node| async move {
                let result = provision(node, runtime, image, listener).await;
                (node.name().to_string(), result)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut errors = HashMap::new();
        for (name, result) in results {
            if let Err(err) = result {
                warn!(node = name.as_str(), ?err, "provisioning failed");
                errors.insert(name, err);
            }
        }
        errors
    }

    fn check_quorum(&self) -> Result<(), Error> {
        let Some(genesis) = &self.genesis else {
            return Ok(());
        };
        let required = quorum(genesis.validators.len());
        let available = self
            .nodes
            .iter()
            .filter(|n| n.spec().role == Role::Validator)
            .filter(|n| n.state() == State::Provisioned || n.state().is_running())
            .count();
        if available < required {
            warn!(available, required, "validator quorum unavailable");
            return Err(Error::QuorumUnavailable {
                available,
                required,
            });
        }
        Ok(())
    }

    /// Stop every node and return every failure.
    async fn teardown(&mut self) -> Vec<Error> {
        let runtime = &self.runtime;
        let errors: Vec<Error> = stream::iter(self.nodes.iter_mut())
            .map(|node| async move { node.stop(runtime).await })
            .buffer_unordered(self.config.concurrency)
            .filter_map(|result| async move { result.err() })
            .collect()
            .await;
        for err in &errors {
            warn!(?err, "teardown failed");
        }
        if errors.is_empty() {
            self.genesis = None;
            self.keys.clear();
        }
        errors
    }

    /// Tear down an interrupted operation.
    async fn abort(&mut self) -> Error {
        warn!("interrupted, tearing down");
        let errors = self.teardown().await;
        self.interrupt.clear();
        Error::Interrupted(errors)
    }

    fn report(&self, mut errors: HashMap<String, Error>) -> Report {
        let statuses = self
            .nodes
            .iter()
            .map(|node| Status {
                name: node.name().to_string(),
                role: node.spec().role,
                state: node.state(),
                error: errors.remove(node.name()),
            })
            .collect();
        Report { statuses }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::GENESIS_PATH, mocks};
    use rand::{rngs::StdRng, SeedableRng};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn config() -> Config {
        Config {
            readiness: Readiness {
                timeout: Duration::from_millis(50),
                interval: Duration::from_millis(5),
            },
            ..Config::default()
        }
    }

    fn setup(validators: u8) -> (mocks::Runtime, Network<mocks::Runtime>) {
        let runtime = mocks::Runtime::default();
        let mut network = Network::new(runtime.clone(), config());
        for i in 1..=validators {
            network
                .declare(Declaration::new(
                    format!("validator{i}"),
                    Role::Validator,
                    addr(i),
                ))
                .unwrap();
        }
        (runtime, network)
    }

    #[test]
    fn test_declare_invalid_name() {
        let (_, mut network) = setup(0);
        assert!(matches!(
            network.declare(Declaration::new("Validator 1", Role::Validator, addr(1))),
            Err(Error::InvalidName(_))
        ));
        assert!(network.nodes().is_empty());
    }

    #[test]
    fn test_declare_rejected_leaves_allocator_untouched() {
        let (_, mut network) = setup(1);

        // Duplicate names are caught before any identity is assigned
        assert!(matches!(
            network.declare(Declaration::new("validator1", Role::Validator, addr(2))),
            Err(Error::DuplicateNode(_))
        ));
        let spec = network
            .declare(Declaration::new("validator2", Role::Validator, addr(2)))
            .unwrap();
        assert_eq!(spec.p2p_port, 2011);
    }

    #[test]
    fn test_render() {
        let (_, mut network) = setup(4);
        network
            .declare(Declaration::new("gateway", Role::Gateway, addr(100)))
            .unwrap();
        let artifacts = network.render(&mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(artifacts.len(), 5);
        assert!(artifacts["gateway"].iter().any(|a| a.path == GENESIS_PATH));
        assert_eq!(network.genesis().unwrap().validators.len(), 4);
    }

    #[tokio::test]
    async fn test_start_requires_validators() {
        let (runtime, mut network) = setup(0);
        network
            .declare(Declaration::new("gateway", Role::Gateway, addr(100)))
            .unwrap();
        assert!(matches!(
            network.start(&mut StdRng::seed_from_u64(0)).await,
            Err(Error::GenesisGenerationFailed(_))
        ));
        assert!(network.genesis().is_none());
        assert!(runtime.events().is_empty());
    }

    #[tokio::test]
    async fn test_provision_all() {
        let (runtime, mut network) = setup(2);
        runtime.fail_create("validator2");
        let report = network.provision_all().await.unwrap();
        assert_eq!(network.state("validator1"), Some(State::Provisioned));
        assert_eq!(network.state("validator2"), Some(State::Failed));
        assert!(matches!(
            report.status("validator2").unwrap().error,
            Some(Error::ProvisionFailed(..))
        ));
        assert_eq!(report.failed().count(), 1);
    }

    #[tokio::test]
    async fn test_provision_all_interrupted() {
        let (runtime, mut network) = setup(4);
        network.interrupt().trigger();
        assert!(matches!(
            network.provision_all().await,
            Err(Error::Interrupted(errors)) if errors.is_empty()
        ));
        assert!(runtime.containers().is_empty());
        assert!(!network.interrupt().is_triggered());

        // The interrupt does not leak into the next operation
        let report = network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        assert_eq!(report.ready().count(), 4);
    }

    #[tokio::test]
    async fn test_start_without_quorum_does_not_wait_for_siblings() {
        let (runtime, mut network) = setup(4);
        network.config.require_quorum = false;
        runtime.delay_create("validator4", Duration::from_millis(200));
        let report = network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        assert_eq!(report.ready().count(), 4);

        // Fast nodes are configured while the slow one is still being created
        let events = runtime.events();
        let position = |event: &mocks::Event| events.iter().position(|e| e == event).unwrap();
        let slow = position(&mocks::Event::Created("validator4".to_string()));
        for i in 1..=3 {
            let configured = position(&mocks::Event::Copied(
                format!("validator{i}"),
                NODE_CONFIG_PATH.to_string(),
            ));
            assert!(configured < slow);
        }
    }

    #[tokio::test]
    async fn test_start_with_quorum_provisions_first() {
        let (runtime, mut network) = setup(4);
        runtime.delay_create("validator4", Duration::from_millis(50));
        network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        let events = runtime.events();
        let slow = events
            .iter()
            .position(|e| *e == mocks::Event::Created("validator4".to_string()))
            .unwrap();
        let first_copy = events
            .iter()
            .position(|e| matches!(e, mocks::Event::Copied(..)))
            .unwrap();
        assert!(slow < first_copy);
    }

    #[tokio::test]
    async fn test_launch_failure_isolated() {
        let (runtime, mut network) = setup(4);
        runtime.fail_exec("validator2");
        let report = network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        assert_eq!(report.ready().count(), 3);
        assert_eq!(network.state("validator2"), Some(State::Failed));
        assert!(matches!(
            &report.status("validator2").unwrap().error,
            Some(Error::StartFailed(name, _)) if name == "validator2"
        ));
        for name in ["validator1", "validator3", "validator4"] {
            assert_eq!(network.state(name), Some(State::Ready));
        }

        // The failed node still holds its container until stopped
        assert!(runtime.exists("validator2"));
        network.stop().await.unwrap();
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_quorum_unavailable() {
        let (runtime, mut network) = setup(4);
        runtime.fail_create("validator1");
        runtime.fail_create("validator2");
        assert!(matches!(
            network.start(&mut StdRng::seed_from_u64(0)).await,
            Err(Error::QuorumUnavailable {
                available: 2,
                required: 3
            })
        ));
        assert!(runtime.launched("validator3").is_empty());

        // Without the policy, the remaining validators are started
        let (runtime, mut network) = setup(4);
        network.config.require_quorum = false;
        runtime.fail_create("validator1");
        runtime.fail_create("validator2");
        let report = network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        assert_eq!(report.ready().count(), 2);
    }

    #[tokio::test]
    async fn test_restart_recycles_failed_nodes() {
        let (runtime, mut network) = setup(4);
        runtime.never_ready("validator4");
        let report = network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        assert_eq!(report.ready().count(), 3);
        assert_eq!(network.state("validator4"), Some(State::Failed));
        let digest = network.genesis().unwrap().digest();

        // Re-start only touches the failed node and keeps genesis
        runtime.recover("validator4");
        let report = network.start(&mut StdRng::seed_from_u64(1)).await.unwrap();
        assert_eq!(report.ready().count(), 4);
        assert_eq!(network.genesis().unwrap().digest(), digest);
        assert_eq!(runtime.launched("validator1").len(), 1);
        assert_eq!(runtime.launched("validator4").len(), 1);
        assert_eq!(runtime.removals("validator4"), 1);
    }

    #[tokio::test]
    async fn test_regenerate_while_running() {
        let (_, mut network) = setup(1);
        network.config.genesis_policy = GenesisPolicy::Regenerate;
        network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        assert!(matches!(
            network.start(&mut StdRng::seed_from_u64(1)).await,
            Err(Error::GenesisInUse)
        ));
    }

    #[tokio::test]
    async fn test_reset_requires_stop() {
        let (_, mut network) = setup(1);
        network.start(&mut StdRng::seed_from_u64(0)).await.unwrap();
        assert!(matches!(network.reset(), Err(Error::Running(1))));
        network.stop().await.unwrap();
        network.reset().unwrap();
        assert!(network.nodes().is_empty());
        assert!(network.genesis().is_none());

        // Identities are available again
        let spec = network
            .declare(Declaration::new("validator1", Role::Validator, addr(1)))
            .unwrap();
        assert_eq!(spec.p2p_port, 2001);
    }

    #[test]
    fn test_urls() {
        let (_, mut network) = setup(1);
        assert!(network.rpc_url().is_none());
        network
            .declare(Declaration::new("gateway", Role::Gateway, addr(100)))
            .unwrap();
        assert_eq!(network.rpc_url().unwrap(), "http://10.0.0.100:9000");
        assert_eq!(
            network.metrics_url("validator1").unwrap(),
            "http://10.0.0.1:9184/metrics"
        );
    }
}
