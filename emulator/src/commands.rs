//! Commands exposed by the CLI.

use commonware_emulator::{
    runtime::{docker::Docker, Handle, Runtime},
    Error, Network, Topology,
};
use rand::rngs::OsRng;
use std::{
    future::Future,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

pub const UP_CMD: &str = "up";
pub const RENDER_CMD: &str = "render";
pub const DOWN_CMD: &str = "down";

/// Maximum nodes to drive at once.
pub const DEFAULT_CONCURRENCY: &str = "8";

/// Load a topology from a YAML file.
fn load(path: &Path) -> Result<Topology, Error> {
    let file = std::fs::File::open(path)?;
    let topology: Topology = serde_yaml::from_reader(file)?;
    info!(
        network = topology.network.as_str(),
        nodes = topology.nodes.len(),
        "loaded topology"
    );
    Ok(topology)
}

/// Directory artifacts are staged in before they are copied into containers.
fn staging(topology: &Topology) -> PathBuf {
    std::env::temp_dir().join(format!("emulator-{}", topology.network))
}

/// Create a network over a docker runtime and declare every node of `topology`.
fn network(topology: &Topology, concurrency: Option<usize>) -> Result<Network<Docker>, Error> {
    let mut config = topology.config();
    if let Some(concurrency) = concurrency {
        config.concurrency = concurrency;
    }
    let runtime = Docker::new(topology.network.clone(), staging(topology));
    let mut network = Network::new(runtime, config);
    for declaration in &topology.nodes {
        network.declare(declaration.clone())?;
    }
    Ok(network)
}

/// Tear down a network whose start failed, then `release` the switch once no container is left.
async fn abandon<R: Runtime>(
    network: &mut Network<R>,
    release: impl Future<Output = Result<(), Error>>,
) {
    if let Err(err) = network.stop().await {
        error!(error = ?err, "failed to tear down network");
        return;
    }
    if let Err(err) = release.await {
        error!(error = ?err, "failed to remove network");
    }
}

/// Deploy every node of the topology at `config_path` and run until interrupted.
pub async fn up(config_path: &Path, concurrency: usize) -> Result<(), Error> {
    let topology = load(config_path)?;
    let mut network = network(&topology, Some(concurrency))?;
    network.runtime().create_network(&topology.subnet).await?;

    // Interrupt an in-flight start on ctrl-c
    let interrupt = network.interrupt();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.trigger();
        }
    });
    let result = network.start(&mut OsRng).await;
    watcher.abort();
    let report = match result {
        Ok(report) => report,
        Err(Error::Interrupted(errors)) => {
            network.runtime().remove_network().await?;
            return Err(Error::Interrupted(errors));
        }
        Err(err) => {
            let runtime = network.runtime().clone();
            abandon(&mut network, runtime.remove_network()).await;
            return Err(err);
        }
    };
    for status in report.failed() {
        warn!(node = status.name.as_str(), error = ?status.error, "node not ready");
    }
    if let Some(url) = network.rpc_url() {
        info!(rpc = url.as_str(), "network ready, press ctrl-c to stop");
    } else {
        info!("network ready, press ctrl-c to stop");
    }

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    network.stop().await?;
    network.runtime().remove_network().await?;
    info!("network removed");
    Ok(())
}

/// Write the genesis and node configurations of the topology at `config_path` to `output`.
pub fn render(config_path: &Path, output: &Path) -> Result<(), Error> {
    let topology = load(config_path)?;
    let mut network = network(&topology, None)?;
    let artifacts = network.render(&mut OsRng)?;
    for (node, artifacts) in artifacts {
        for artifact in artifacts {
            let path = output
                .join(&node)
                .join(artifact.path.trim_start_matches('/'));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &artifact.contents)?;
            info!(node = node.as_str(), path = %path.display(), "wrote artifact");
        }
    }
    Ok(())
}

/// Remove every container (and the switch) of the topology at `config_path`.
pub async fn down(config_path: &Path) -> Result<(), Error> {
    let topology = load(config_path)?;
    let runtime = Docker::new(topology.network.clone(), staging(&topology));
    let mut errors = Vec::new();
    for declaration in &topology.nodes {
        let handle = Handle::new(declaration.name.clone());
        if let Err(err) = runtime.remove(&handle).await {
            errors.push(Error::TeardownFailed(
                declaration.name.clone(),
                Box::new(err),
            ));
        }
    }
    if !errors.is_empty() {
        return Err(Error::Teardown(errors));
    }
    runtime.remove_network().await?;
    info!(network = topology.network.as_str(), "network removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_emulator::{mocks, Config, Declaration, Role};
    use std::{
        cell::Cell,
        net::{IpAddr, Ipv4Addr},
    };

    fn setup() -> (mocks::Runtime, Network<mocks::Runtime>) {
        let runtime = mocks::Runtime::default();
        let mut network = Network::new(runtime.clone(), Config::default());
        network
            .declare(Declaration::new(
                "validator1",
                Role::Validator,
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            ))
            .unwrap();
        (runtime, network)
    }

    #[tokio::test]
    async fn test_abandon_releases_switch() {
        let (runtime, mut network) = setup();
        network.provision_all().await.unwrap();
        let released = Cell::new(false);
        abandon(&mut network, async {
            released.set(true);
            Ok(())
        })
        .await;
        assert!(released.get());
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_abandon_keeps_switch_while_containers_remain() {
        let (runtime, mut network) = setup();
        network.provision_all().await.unwrap();
        runtime.fail_remove("validator1");
        let released = Cell::new(false);
        abandon(&mut network, async {
            released.set(true);
            Ok(())
        })
        .await;
        assert!(!released.get());
        assert!(runtime.exists("validator1"));
    }
}
