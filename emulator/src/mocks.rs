//! In-memory [crate::runtime::Runtime] for testing.

use crate::{
    config::Artifact,
    runtime::{Container, Handle, Probe, Process},
    Error,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

/// An operation observed by the [Runtime].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Created(String),
    Copied(String, String),
    Executed(String),
    Probed(String),
    Removed(String),
}

#[derive(Default)]
struct Host {
    container: Option<Container>,
    files: BTreeMap<String, Vec<u8>>,
    launched: Vec<Process>,
    probes: usize,
    removals: usize,
}

#[derive(Default)]
struct State {
    hosts: HashMap<String, Host>,
    events: Vec<Event>,

    fail_create: HashSet<String>,
    fail_copy: HashSet<String>,
    fail_exec: HashSet<String>,
    fail_remove: HashSet<String>,
    never_ready: HashSet<String>,
    create_delay: HashMap<String, Duration>,
}

/// Records every container operation and fails on demand.
///
/// Clones share state, so a test can keep a clone for assertions after handing the runtime to
/// a [crate::Network].
#[derive(Clone, Default)]
pub struct Runtime {
    state: Arc<Mutex<State>>,
}

fn injected(operation: &str, name: &str) -> Error {
    Error::Command {
        command: format!("{operation} {name}"),
        stderr: "injected failure".to_string(),
    }
}

impl Runtime {
    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Fail container creation for `name`.
    pub fn fail_create(&self, name: &str) {
        self.with(|s| s.fail_create.insert(name.to_string()));
    }

    /// Fail file transfers into `name`.
    pub fn fail_copy(&self, name: &str) {
        self.with(|s| s.fail_copy.insert(name.to_string()));
    }

    /// Fail process launches in `name`.
    pub fn fail_exec(&self, name: &str) {
        self.with(|s| s.fail_exec.insert(name.to_string()));
    }

    /// Fail removal of `name`.
    pub fn fail_remove(&self, name: &str) {
        self.with(|s| s.fail_remove.insert(name.to_string()));
    }

    /// Never report `name` as ready.
    pub fn never_ready(&self, name: &str) {
        self.with(|s| s.never_ready.insert(name.to_string()));
    }

    /// Delay container creation for `name` by `delay`.
    pub fn delay_create(&self, name: &str, delay: Duration) {
        self.with(|s| s.create_delay.insert(name.to_string(), delay));
    }

    /// Clear every injected failure for `name`.
    pub fn recover(&self, name: &str) {
        self.with(|s| {
            s.fail_create.remove(name);
            s.fail_copy.remove(name);
            s.fail_exec.remove(name);
            s.fail_remove.remove(name);
            s.never_ready.remove(name);
            s.create_delay.remove(name);
        });
    }

    /// Returns true if a container for `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        self.with(|s| s.hosts.get(name).is_some_and(|h| h.container.is_some()))
    }

    /// Container created for `name` (if it exists).
    pub fn container(&self, name: &str) -> Option<Container> {
        self.with(|s| s.hosts.get(name).and_then(|h| h.container.clone()))
    }

    /// Names of all existing containers.
    pub fn containers(&self) -> Vec<String> {
        self.with(|s| {
            let mut names: Vec<String> = s
                .hosts
                .iter()
                .filter(|(_, h)| h.container.is_some())
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            names
        })
    }

    /// Contents of `path` inside `name`.
    pub fn file(&self, name: &str, path: &str) -> Option<Vec<u8>> {
        self.with(|s| s.hosts.get(name).and_then(|h| h.files.get(path).cloned()))
    }

    /// Processes launched in `name`.
    pub fn launched(&self, name: &str) -> Vec<Process> {
        self.with(|s| {
            s.hosts
                .get(name)
                .map(|h| h.launched.clone())
                .unwrap_or_default()
        })
    }

    /// Number of probes issued against `name`.
    pub fn probes(&self, name: &str) -> usize {
        self.with(|s| s.hosts.get(name).map_or(0, |h| h.probes))
    }

    /// Number of successful removals of `name`.
    pub fn removals(&self, name: &str) -> usize {
        self.with(|s| s.hosts.get(name).map_or(0, |h| h.removals))
    }

    /// Every operation observed so far (in order).
    pub fn events(&self) -> Vec<Event> {
        self.with(|s| s.events.clone())
    }
}

impl crate::runtime::Runtime for Runtime {
    async fn create(&self, container: &Container) -> Result<Handle, Error> {
        let delay = self.with(|s| s.create_delay.get(&container.name).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            let name = &container.name;
            if s.fail_create.contains(name) {
                return Err(injected("create", name));
            }
            let host = s.hosts.entry(name.clone()).or_default();
            if host.container.is_some() {
                return Err(Error::Command {
                    command: format!("create {name}"),
                    stderr: "container already exists".to_string(),
                });
            }
            host.container = Some(container.clone());
            host.files.clear();
            host.launched.clear();
            s.events.push(Event::Created(name.clone()));
            Ok(Handle::new(name.clone()))
        })
    }

    async fn copy(&self, handle: &Handle, artifact: &Artifact) -> Result<(), Error> {
        self.with(|s| {
            let name = handle.name();
            if s.fail_copy.contains(name) {
                return Err(injected("copy", name));
            }
            let host = s
                .hosts
                .get_mut(name)
                .filter(|h| h.container.is_some())
                .ok_or_else(|| injected("copy", name))?;
            host.files
                .insert(artifact.path.clone(), artifact.contents.clone());
            s.events
                .push(Event::Copied(name.to_string(), artifact.path.clone()));
            Ok(())
        })
    }

    async fn exec(&self, handle: &Handle, process: &Process) -> Result<(), Error> {
        self.with(|s| {
            let name = handle.name();
            if s.fail_exec.contains(name) {
                return Err(injected("exec", name));
            }
            let host = s
                .hosts
                .get_mut(name)
                .filter(|h| h.container.is_some())
                .ok_or_else(|| injected("exec", name))?;
            host.launched.push(process.clone());
            s.events.push(Event::Executed(name.to_string()));
            Ok(())
        })
    }

    async fn probe(&self, handle: &Handle, _probe: &Probe) -> Result<bool, Error> {
        self.with(|s| {
            let name = handle.name();
            let never_ready = s.never_ready.contains(name);
            let Some(host) = s.hosts.get_mut(name) else {
                return Ok(false);
            };
            host.probes += 1;
            s.events.push(Event::Probed(name.to_string()));
            Ok(!never_ready && !host.launched.is_empty())
        })
    }

    async fn remove(&self, handle: &Handle) -> Result<(), Error> {
        self.with(|s| {
            let name = handle.name();
            if s.fail_remove.contains(name) {
                return Err(injected("remove", name));
            }
            if let Some(host) = s.hosts.get_mut(name) {
                if host.container.take().is_some() {
                    host.removals += 1;
                    s.events.push(Event::Removed(name.to_string()));
                }
            }
            Ok(())
        })
    }
}
