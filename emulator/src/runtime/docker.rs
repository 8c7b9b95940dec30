//! [Runtime] backed by the `docker` CLI.
//!
//! Each node runs in its own container attached (with a static address) to a user-defined bridge
//! network, which plays the role of the shared switch. Link shaping is applied from inside the
//! container with `tc netem`, so containers are started privileged.

use super::{Container, Handle, Probe, Process, Runtime};
use crate::{config::Artifact, Error};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Output,
};
use tokio::process::Command;
use tracing::{debug, warn};

/// Prefix of every container name.
pub const CONTAINER_PREFIX: &str = "mn.";

/// Interface shaped when a link is configured.
const INTERFACE: &str = "eth0";

/// Maximum time an RPC probe may take (in seconds).
const RPC_PROBE_TIMEOUT: &str = "2";

/// Wrap `value` in single quotes for `sh`.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run `docker` with `args`.
async fn docker(args: &[&str]) -> Result<Output, Error> {
    let output = Command::new("docker").args(args).output().await?;
    Ok(output)
}

/// Run `docker` with `args`, failing if the command does not succeed.
async fn docker_checked(args: &[&str]) -> Result<String, Error> {
    let output = docker(args).await?;
    if !output.status.success() {
        return Err(Error::Command {
            command: format!("docker {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Remove `path` and everything below it (if it exists).
async fn remove_dir(path: &Path) -> Result<(), Error> {
    match tokio::fs::remove_dir_all(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

/// Drives containers through the local `docker` daemon.
#[derive(Clone, Debug)]
pub struct Docker {
    network: String,
    staging: PathBuf,
}

impl Docker {
    /// Create a runtime attaching containers to `network` and staging artifacts under `staging`.
    pub fn new(network: impl Into<String>, staging: impl Into<PathBuf>) -> Self {
        Self {
            network: network.into(),
            staging: staging.into(),
        }
    }

    fn container(handle: &Handle) -> String {
        format!("{CONTAINER_PREFIX}{}", handle.name())
    }

    /// Create the switch (if it does not exist yet).
    pub async fn create_network(&self, subnet: &str) -> Result<(), Error> {
        if docker(&["network", "inspect", self.network.as_str()])
            .await?
            .status
            .success()
        {
            debug!(network = self.network.as_str(), "network exists");
            return Ok(());
        }
        docker_checked(&[
            "network",
            "create",
            "--driver",
            "bridge",
            "--subnet",
            subnet,
            self.network.as_str(),
        ])
        .await?;
        debug!(network = self.network.as_str(), subnet, "created network");
        Ok(())
    }

    /// Remove the switch (if it exists) along with every staged artifact.
    pub async fn remove_network(&self) -> Result<(), Error> {
        let output = docker(&["network", "rm", self.network.as_str()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("not found") {
                return Err(Error::Command {
                    command: format!("docker network rm {}", self.network),
                    stderr: stderr.trim().to_string(),
                });
            }
        }
        debug!(network = self.network.as_str(), "removed network");
        self.clear_staging().await
    }

    /// Remove the staging directory of every node.
    pub async fn clear_staging(&self) -> Result<(), Error> {
        remove_dir(&self.staging).await?;
        debug!(path = %self.staging.display(), "cleared staging");
        Ok(())
    }

    /// Remove the staging directory of `handle`.
    async fn unstage(&self, handle: &Handle) -> Result<(), Error> {
        remove_dir(&self.staging.join(handle.name())).await
    }

    /// Write `artifact` to its staging path.
    async fn stage(&self, handle: &Handle, artifact: &Artifact) -> Result<PathBuf, Error> {
        let local = self.stage_path(handle, artifact);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, &artifact.contents).await?;
        Ok(local)
    }

    /// Local path an artifact is staged at before being copied.
    fn stage_path(&self, handle: &Handle, artifact: &Artifact) -> PathBuf {
        let file = artifact.path.trim_start_matches('/').replace('/', "_");
        self.staging.join(handle.name()).join(file)
    }
}

impl Runtime for Docker {
    async fn create(&self, container: &Container) -> Result<Handle, Error> {
        let handle = Handle::new(container.name.clone());
        let name = Self::container(&handle);
        let address = container.address.to_string();
        let exposed: Vec<String> = container.ports.iter().map(|p| p.to_string()).collect();

        let mut args = vec![
            "run",
            "-d",
            "--name",
            name.as_str(),
            "--hostname",
            container.name.as_str(),
            "--network",
            self.network.as_str(),
            "--ip",
            address.as_str(),
        ];
        if container.privileged {
            args.push("--privileged");
        }
        for port in &exposed {
            args.push("--expose");
            args.push(port);
        }
        args.extend([container.image.as_str(), "tail", "-f", "/dev/null"]);
        docker_checked(&args).await?;
        debug!(
            node = container.name.as_str(),
            address = address.as_str(),
            "created container"
        );

        if let Some(link) = container.link {
            let delay = format!("{}ms", link.latency_ms);
            let rate = link.bandwidth_mbps.map(|mbps| format!("{mbps}mbit"));
            let mut args = vec![
                "exec",
                name.as_str(),
                "tc",
                "qdisc",
                "add",
                "dev",
                INTERFACE,
                "root",
                "netem",
                "delay",
                delay.as_str(),
            ];
            if let Some(rate) = &rate {
                args.extend(["rate", rate.as_str()]);
            }
            if let Err(err) = docker_checked(&args).await {
                // Never leave a half-configured host behind
                match docker_checked(&["rm", "-f", name.as_str()]).await {
                    Ok(_) => debug!(node = container.name.as_str(), "removed unshaped container"),
                    Err(cleanup) => warn!(
                        node = container.name.as_str(),
                        error = ?cleanup,
                        "failed to remove unshaped container"
                    ),
                }
                return Err(err);
            }
            debug!(node = container.name.as_str(), ?link, "shaped link");
        }
        Ok(handle)
    }

    async fn copy(&self, handle: &Handle, artifact: &Artifact) -> Result<(), Error> {
        let name = Self::container(handle);
        let remote_dir = Path::new(&artifact.path)
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("/");
        docker_checked(&["exec", name.as_str(), "mkdir", "-p", remote_dir]).await?;

        // Key material only lives on the host for the duration of the transfer
        let local = self.stage(handle, artifact).await?;
        let source = local.to_string_lossy().to_string();
        let target = format!("{name}:{}", artifact.path);
        let copied = docker_checked(&["cp", source.as_str(), target.as_str()]).await;
        if let Err(err) = tokio::fs::remove_file(&local).await {
            warn!(path = %local.display(), ?err, "failed to remove staged artifact");
        }
        copied?;
        debug!(node = handle.name(), path = artifact.path.as_str(), "copied artifact");
        Ok(())
    }

    async fn exec(&self, handle: &Handle, process: &Process) -> Result<(), Error> {
        let name = Self::container(handle);
        let log_dir = Path::new(&process.log)
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("/");
        let mut command = quote(&process.program);
        for arg in &process.args {
            command.push(' ');
            command.push_str(&quote(arg));
        }
        let script = format!(
            "mkdir -p {} && exec {} > {} 2>&1",
            quote(log_dir),
            command,
            quote(&process.log)
        );
        docker_checked(&["exec", "-d", name.as_str(), "sh", "-c", script.as_str()]).await?;
        debug!(node = handle.name(), program = process.program.as_str(), "launched process");
        Ok(())
    }

    async fn probe(&self, handle: &Handle, probe: &Probe) -> Result<bool, Error> {
        let name = Self::container(handle);
        match probe {
            Probe::Log { path, pattern } => {
                let output = docker(&[
                    "exec",
                    name.as_str(),
                    "grep",
                    "-q",
                    "-F",
                    "--",
                    pattern.as_str(),
                    path.as_str(),
                ])
                .await?;
                Ok(output.status.success())
            }
            Probe::Rpc { url, method } => {
                let body = format!(r#"{{"jsonrpc":"2.0","method":"{method}","params":[],"id":1}}"#);
                let output = docker(&[
                    "exec",
                    name.as_str(),
                    "curl",
                    "-s",
                    "-m",
                    RPC_PROBE_TIMEOUT,
                    "-X",
                    "POST",
                    "-H",
                    "Content-Type: application/json",
                    "-d",
                    body.as_str(),
                    url.as_str(),
                ])
                .await?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(output.status.success() && stdout.contains("\"result\""))
            }
        }
    }

    async fn remove(&self, handle: &Handle) -> Result<(), Error> {
        let name = Self::container(handle);
        let output = docker(&["rm", "-f", name.as_str()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("No such container") {
                return Err(Error::Command {
                    command: format!("docker rm -f {name}"),
                    stderr: stderr.trim().to_string(),
                });
            }
        }
        debug!(node = handle.name(), "removed container");
        if let Err(err) = self.unstage(handle).await {
            warn!(node = handle.name(), ?err, "failed to remove staging directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_stage_path() {
        let docker = Docker::new("emulator", "/tmp/staging");
        let artifact = Artifact {
            path: "/config/node.yaml".to_string(),
            contents: Vec::new(),
        };
        assert_eq!(
            docker.stage_path(&Handle::new("validator1"), &artifact),
            PathBuf::from("/tmp/staging/validator1/config_node.yaml")
        );
    }

    #[tokio::test]
    async fn test_staging_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("emulator-test");
        let docker = Docker::new("emulator", &root);
        let artifact = Artifact {
            path: "/config/node.yaml".to_string(),
            contents: b"account-key: secret".to_vec(),
        };
        let validator = Handle::new("validator1");
        let gateway = Handle::new("gateway");
        let staged = docker.stage(&validator, &artifact).await.unwrap();
        assert_eq!(std::fs::read(&staged).unwrap(), artifact.contents);
        docker.stage(&gateway, &artifact).await.unwrap();

        // Removing one node leaves the others staged
        docker.unstage(&validator).await.unwrap();
        assert!(!root.join("validator1").exists());
        assert!(root.join("gateway").exists());
        docker.unstage(&validator).await.unwrap();

        // Clearing removes the root (and tolerates it being gone)
        docker.clear_staging().await.unwrap();
        assert!(!root.exists());
        docker.clear_staging().await.unwrap();
    }

    #[test]
    fn test_container_name() {
        assert_eq!(Docker::container(&Handle::new("gateway")), "mn.gateway");
    }
}
