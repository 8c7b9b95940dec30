//! Drive a single node through its lifecycle.
//!
//! ```text
//! Declared → Provisioned → Configured → Started → Ready
//!     │           │             │           │        │
//!     └───────────┴──── Failed ─┴───────────┘        │
//!                         │                          │
//!                         └──────── Stopped ◄────────┘
//! ```
//!
//! Every transition is observable through [Node::state] and a [Listener] is checked between
//! transitions (and while waiting for readiness) so that an in-flight start can be interrupted
//! at any point, not only once a node is ready.

use crate::{
    config::Artifact,
    runtime::{Container, Handle, Probe, Process, Runtime},
    topology::NodeSpec,
    Error,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{sleep, Instant},
};
use tracing::{debug, info, warn};

/// Lifecycle state of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Declared,
    Provisioned,
    Configured,
    Started,
    Ready,
    Failed,
    Stopped,
}

impl State {
    /// Returns true if the node process may be running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Started | Self::Ready)
    }
}

/// Bounds on readiness polling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Readiness {
    /// Maximum time to wait for a positive signal.
    pub timeout: Duration,
    /// Time between probes.
    pub interval: Duration,
}

/// Signals in-flight node workflows to stop.
#[derive(Clone, Debug)]
pub struct Interrupt {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Ask every workflow to stop at its next checkpoint.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true if [Interrupt::trigger] was called.
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Re-arm the interrupt once every workflow has observed it.
    pub(crate) fn clear(&self) {
        self.sender.send_replace(false);
    }

    /// Create a [Listener] observing this interrupt.
    pub fn listener(&self) -> Listener {
        Listener(self.sender.subscribe())
    }
}

/// Observes an [Interrupt].
#[derive(Clone, Debug)]
pub struct Listener(watch::Receiver<bool>);

impl Listener {
    /// Returns true if the interrupt was triggered.
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the interrupt is triggered.
    pub async fn triggered(&mut self) {
        if self.0.wait_for(|triggered| *triggered).await.is_err() {
            // The interrupt can no longer be triggered
            futures::future::pending::<()>().await;
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.is_triggered() {
            return Err(Error::Interrupted(Vec::new()));
        }
        Ok(())
    }
}

/// A declared node and the state of its container.
#[derive(Debug)]
pub struct Node {
    spec: NodeSpec,
    state: State,
    handle: Option<Handle>,
}

impl Node {
    pub fn new(spec: NodeSpec) -> Self {
        Self {
            spec,
            state: State::Declared,
            handle: None,
        }
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Handle of the node's container (if provisioned).
    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }

    fn expect(&self, from: &[State], to: State) -> Result<(), Error> {
        if !from.contains(&self.state) {
            return Err(Error::InvalidTransition {
                node: self.spec.name.clone(),
                from: self.state,
                to,
            });
        }
        Ok(())
    }

    fn require_handle(&self) -> Result<&Handle, Error> {
        self.handle.as_ref().ok_or(Error::InvalidTransition {
            node: self.spec.name.clone(),
            from: self.state,
            to: State::Provisioned,
        })
    }

    /// Create the node's container.
    pub async fn provision<R: Runtime>(&mut self, runtime: &R, image: &str) -> Result<(), Error> {
        self.expect(&[State::Declared, State::Stopped], State::Provisioned)?;
        let mut ports = vec![self.spec.p2p_port];
        ports.extend(self.spec.rpc_port);
        ports.push(self.spec.metrics_port);
        let container = Container {
            name: self.spec.name.clone(),
            image: image.to_string(),
            address: self.spec.address,
            ports,
            link: self.spec.link,
            privileged: true,
        };
        match runtime.create(&container).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = State::Provisioned;
                debug!(node = self.spec.name.as_str(), "provisioned");
                Ok(())
            }
            Err(err) => {
                self.state = State::Failed;
                Err(Error::ProvisionFailed(self.spec.name.clone(), Box::new(err)))
            }
        }
    }

    /// Transfer `artifacts` into the node's container.
    pub async fn configure<R: Runtime>(
        &mut self,
        runtime: &R,
        artifacts: &[Artifact],
    ) -> Result<(), Error> {
        self.expect(&[State::Provisioned], State::Configured)?;
        let handle = self.require_handle()?.clone();
        for artifact in artifacts {
            if let Err(err) = runtime.copy(&handle, artifact).await {
                self.state = State::Failed;
                return Err(Error::ConfigInjectionFailed(
                    self.spec.name.clone(),
                    Box::new(err),
                ));
            }
        }
        self.state = State::Configured;
        debug!(
            node = self.spec.name.as_str(),
            artifacts = artifacts.len(),
            "configured"
        );
        Ok(())
    }

    /// Launch the node process (if any). Does not wait for the process to come up.
    pub async fn launch<R: Runtime>(
        &mut self,
        runtime: &R,
        process: Option<&Process>,
    ) -> Result<(), Error> {
        self.expect(&[State::Configured], State::Started)?;
        let handle = self.require_handle()?.clone();
        if let Some(process) = process {
            if let Err(err) = runtime.exec(&handle, process).await {
                self.state = State::Failed;
                return Err(Error::StartFailed(self.spec.name.clone(), Box::new(err)));
            }
        }
        self.state = State::Started;
        debug!(node = self.spec.name.as_str(), "started");
        Ok(())
    }

    /// Poll `probe` until it succeeds, `readiness.timeout` elapses, or `listener` fires.
    ///
    /// A node with no probe is ready as soon as it has started. Probe errors are treated as a
    /// negative signal: readiness is only ever concluded from a positive one.
    pub async fn await_ready<R: Runtime>(
        &mut self,
        runtime: &R,
        probe: Option<&Probe>,
        readiness: &Readiness,
        listener: &mut Listener,
    ) -> Result<(), Error> {
        self.expect(&[State::Started], State::Ready)?;
        let Some(probe) = probe else {
            self.state = State::Ready;
            return Ok(());
        };
        let handle = self.require_handle()?.clone();
        let deadline = Instant::now() + readiness.timeout;
        let mut attempts = 0usize;
        loop {
            listener.check()?;
            attempts += 1;
            match runtime.probe(&handle, probe).await {
                Ok(true) => {
                    self.state = State::Ready;
                    info!(node = self.spec.name.as_str(), attempts, "ready");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(node = self.spec.name.as_str(), ?err, "probe failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.state = State::Failed;
                warn!(node = self.spec.name.as_str(), attempts, "not ready");
                return Err(Error::ReadinessTimeout(
                    self.spec.name.clone(),
                    readiness.timeout,
                ));
            }
            let wait = readiness.interval.min(deadline - now);
            tokio::select! {
                _ = sleep(wait) => {},
                _ = listener.triggered() => {
                    return Err(Error::Interrupted(Vec::new()));
                },
            }
        }
    }

    /// Configure, launch, and wait for the node to become ready.
    pub async fn bring_up<R: Runtime>(
        &mut self,
        runtime: &R,
        artifacts: &[Artifact],
        process: Option<&Process>,
        probe: Option<&Probe>,
        readiness: &Readiness,
        mut listener: Listener,
    ) -> Result<(), Error> {
        listener.check()?;
        self.configure(runtime, artifacts).await?;
        listener.check()?;
        self.launch(runtime, process).await?;
        self.await_ready(runtime, probe, readiness, &mut listener)
            .await
    }

    /// Remove the node's container.
    ///
    /// Stopping a node without a container is a no-op. If removal fails, the node keeps its
    /// handle so that removal can be retried.
    pub async fn stop<R: Runtime>(&mut self, runtime: &R) -> Result<(), Error> {
        let Some(handle) = &self.handle else {
            self.state = State::Stopped;
            return Ok(());
        };
        if let Err(err) = runtime.remove(handle).await {
            return Err(Error::TeardownFailed(self.spec.name.clone(), Box::new(err)));
        }
        self.handle = None;
        self.state = State::Stopped;
        debug!(node = self.spec.name.as_str(), "stopped");
        Ok(())
    }
}
