//! Server configuration, read from a TOML file, and the service wiring it describes.
//!
//! ```toml
//! listen = "127.0.0.1:8181"
//! threads = 2
//! schemas = ["jukebox.toml"]
//!
//! [[mount]]
//! path = "/network-topology:network-topology/topology=lab/node=r1"
//! schemas = ["device.toml"]
//! backend = "netconf"
//! address = "192.0.2.1:830"
//! lock-policy = "selective"
//! ```
//!
//! Relative schema paths are taken from the directory holding the configuration file.

use log::{info, warn};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{self, Result};
use crate::operations::{OperationRegistry, RemoteOperations};
use crate::resolver::{MountPointService, Resolver, Scope, ServiceSet};
use crate::schema::SchemaContext;
use crate::strategy::{LocalStrategy, LockPolicy, RemoteStrategy};
use datastore::MemoryDataStore;

const DEFAULT_LISTEN: &str = "127.0.0.1:8181";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Schema files of the gateway's own data tree.
    pub schemas: Vec<PathBuf>,
    /// Lock policy of NETCONF mounts that don't set their own.
    #[serde(default)]
    pub lock_policy: LockPolicy,
    #[serde(default, rename = "mount")]
    pub mounts: Vec<MountConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MountConfig {
    /// Resource path of the node the mount hangs off, in the gateway's own tree.
    pub path: String,
    pub schemas: Vec<PathBuf>,
    pub backend: Backend,
    /// Device address, for NETCONF backends.
    pub address: Option<String>,
    pub lock_policy: Option<LockPolicy>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// An in-process data store of the mount's own.
    Local,
    /// A remote device reached over a NETCONF session.
    Netconf,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_threads() -> usize {
    1
}

impl Config {
    /// Reads the configuration file, making relative schema paths relative to its directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).context(error::ReadFileSnafu { path })?;
        let mut config: Config =
            toml::from_str(&text).context(error::ParseTomlSnafu { path })?;

        if let Some(dir) = path.parent() {
            config.schemas = anchor(dir, &config.schemas);
            for mount in &mut config.mounts {
                mount.schemas = anchor(dir, &mount.schemas);
            }
        }
        Ok(config)
    }

    /// Builds the root scope: the schema, a local data store with its strategy, and every mount
    /// point.  NETCONF mounts whose device can't be reached are left out with a warning, so their
    /// paths report the mount as unavailable.
    pub async fn build_scope(&self) -> Result<Arc<Scope>> {
        let schema = Arc::new(SchemaContext::from_files(&self.schemas)?);
        let mounts = Arc::new(MountPointService::new());
        let scope = Arc::new(
            Scope::new(Arc::clone(&schema), local_services()).with_mounts(Arc::clone(&mounts)),
        );

        let resolver = Resolver::new(Arc::clone(&scope));
        for mount in &self.mounts {
            let target = resolver.resolve(&mount.path)?;
            let mount_schema = Arc::new(SchemaContext::from_files(&mount.schemas)?);
            let services = match mount.backend {
                Backend::Local => local_services(),
                Backend::Netconf => {
                    let address = mount.address.as_deref().context(error::InvalidConfigSnafu {
                        msg: format!("NETCONF mount at {} needs an address", mount.path),
                    })?;
                    match netconf::connect(address).await {
                        Ok(session) => {
                            let session = Arc::new(session);
                            ServiceSet {
                                data: Some(Arc::new(RemoteStrategy::new(
                                    session.clone(),
                                    mount.lock_policy.unwrap_or(self.lock_policy),
                                ))),
                                operations: Some(Arc::new(RemoteOperations::new(session))),
                            }
                        }
                        Err(e) => {
                            warn!("Skipping mount at {}: {}", mount.path, e);
                            continue;
                        }
                    }
                }
            };
            info!("Mounting {:?} backend at {}", mount.backend, mount.path);
            mounts.register(target.path, Scope::new(mount_schema, services))?;
        }
        Ok(scope)
    }
}

/// Services backed by a fresh in-process data store.
fn local_services() -> ServiceSet {
    let store = Arc::new(RwLock::new(MemoryDataStore::new()));
    ServiceSet {
        data: Some(Arc::new(LocalStrategy::new(store))),
        operations: Some(Arc::new(OperationRegistry::new())),
    }
}

fn anchor(dir: &Path, paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| if p.is_relative() { dir.join(p) } else { p.clone() })
        .collect()
}
