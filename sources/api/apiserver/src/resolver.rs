//! Turns request paths into resource contexts.
//!
//! A resource path is a '/'-separated list of steps.  Each step is an optionally qualified node
//! name; list entries carry their key values after '=' separated by ','.  The first step must be
//! qualified, and later steps inherit the module of their parent unless they name another one:
//!
//! `example-jukebox:jukebox/library/artist=Foo%20Fighters/album=Wasting%20Light`
//!
//! The step `yang-ext:mount` crosses into a mount point.  Everything after it is resolved again
//! from scratch against the mounted device's own schema and services, so a resolved context
//! never spans two mounts.

use datastore::{PathArg, QName, TreePath};
use log::debug;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use snafu::{ensure, OptionExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{self, Result};
use crate::operations::OperationService;
use crate::schema::{NodeKind, SchemaContext, SchemaNode};
use crate::strategy::RestconfStrategy;

/// The path step that marks a mount point.
pub const MOUNT_MARKER: &str = "yang-ext:mount";

/// Characters left alone when encoding key values: RFC 3986 unreserved characters.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// The services available behind one schema context: the data strategy and operation
/// invocation.  Either can be missing, for example on a device that doesn't support operations.
#[derive(Clone, Default)]
pub struct ServiceSet {
    pub data: Option<Arc<dyn RestconfStrategy>>,
    pub operations: Option<Arc<dyn OperationService>>,
}

impl fmt::Debug for ServiceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSet")
            .field("data", &self.data.is_some())
            .field("operations", &self.operations.is_some())
            .finish()
    }
}

/// A schema context plus the services and mount points that go with it.  The gateway's own data
/// is one scope, and each mount point is another.
#[derive(Debug, Clone)]
pub struct Scope {
    pub schema: Arc<SchemaContext>,
    pub services: ServiceSet,
    pub mounts: Arc<MountPointService>,
}

impl Scope {
    pub fn new(schema: Arc<SchemaContext>, services: ServiceSet) -> Self {
        Self {
            schema,
            services,
            mounts: Arc::new(MountPointService::new()),
        }
    }

    pub fn with_mounts(mut self, mounts: Arc<MountPointService>) -> Self {
        self.mounts = mounts;
        self
    }
}

/// Registry of mount points below a scope, keyed by the path of the node they're mounted on.
#[derive(Debug, Default)]
pub struct MountPointService {
    points: RwLock<HashMap<TreePath, Arc<Scope>>>,
}

impl MountPointService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: TreePath, scope: Scope) -> Result<()> {
        debug!("Registering mount point at {}", path);
        let mut points = self.points.write().ok().context(error::DataStoreLockSnafu)?;
        points.insert(path, Arc::new(scope));
        Ok(())
    }

    pub fn lookup(&self, path: &TreePath) -> Result<Option<Arc<Scope>>> {
        let points = self.points.read().ok().context(error::DataStoreLockSnafu)?;
        Ok(points.get(path).cloned())
    }
}

/// Everything we know about the target of a request once its path is resolved.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    /// Schema context of the scope the target is in.
    pub schema: Arc<SchemaContext>,
    /// The target's schema node.  For list entries this is the list.
    pub node: Arc<SchemaNode>,
    /// Path of the target within its scope.
    pub path: TreePath,
    pub scope: Arc<Scope>,
    /// Encoded path of the mount point the scope hangs off, including the mount marker; empty
    /// outside mounts.
    pub mount_prefix: String,
}

impl ResourceContext {
    pub fn is_mounted(&self) -> bool {
        !self.mount_prefix.is_empty()
    }

    /// Whether the path ends at a whole list rather than one of its entries.
    pub fn is_list(&self) -> bool {
        self.node.kind() == NodeKind::List && !self.path.last().map_or(false, PathArg::is_entry)
    }

    pub fn data(&self) -> Result<&Arc<dyn RestconfStrategy>> {
        self.scope
            .services
            .data
            .as_ref()
            .ok_or_else(|| self.missing_service("data access"))
    }

    pub fn operations(&self) -> Result<&Arc<dyn OperationService>> {
        self.scope
            .services
            .operations
            .as_ref()
            .ok_or_else(|| self.missing_service("operation invocation"))
    }

    fn missing_service(&self, service: &str) -> error::Error {
        if self.is_mounted() {
            error::Error::MountUnavailable {
                path: self.mount_prefix.clone(),
                msg: format!("mount point does not provide {}", service),
            }
        } else {
            error::Error::OperationNotSupported {
                operation: service.to_string(),
                msg: "no service configured".to_string(),
            }
        }
    }

    /// The URI path of a node in this context's scope, relative to the data or operations root.
    pub fn uri_for(&self, path: &TreePath) -> String {
        format!("{}{}", self.mount_prefix, encode_path(path))
    }
}

/// One parsed path step, before schema checks.
struct Segment {
    name: String,
    keys: Option<Vec<String>>,
}

impl Segment {
    fn parse(raw: &str, full_path: &str) -> Result<Self> {
        let (name, keys) = match raw.split_once('=') {
            Some((name, keys)) => (name, Some(keys)),
            None => (raw, None),
        };
        let name = decode(name, full_path)?;
        ensure!(
            !name.is_empty(),
            error::BadRequestSnafu {
                path: full_path,
                msg: "empty step",
            }
        );
        let keys = match keys {
            Some(keys) => Some(
                keys.split(',')
                    .map(|key| decode(key, full_path))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(Self { name, keys })
    }
}

fn decode(raw: &str, full_path: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| error::Error::BadRequest {
            path: full_path.to_string(),
            msg: format!("bad percent-encoding: {}", e),
        })
}

/// Resolves paths within one scope.
pub struct Resolver {
    scope: Arc<Scope>,
    mount_prefix: String,
}

impl Resolver {
    pub fn new(scope: Arc<Scope>) -> Self {
        Self {
            scope,
            mount_prefix: String::new(),
        }
    }

    /// Resolves a path below the data root.  The root itself is the empty path.
    pub fn resolve(&self, path: &str) -> Result<ResourceContext> {
        let root = Arc::clone(self.scope.schema.root());
        self.walk(path, &split(path), root, TreePath::root())
    }

    /// Resolves a path that must name an rpc or action.
    pub fn resolve_operation(&self, path: &str) -> Result<ResourceContext> {
        let context = self.resolve(path)?;
        ensure!(
            context.node.is_operation(),
            error::BadRequestSnafu {
                path,
                msg: "not an operation",
            }
        );
        Ok(context)
    }

    /// Resolves a path relative to an already resolved context, as used for yang-patch targets.
    /// "/" is the context itself.  Mount points can't be crossed from here.
    pub fn resolve_relative(base: &ResourceContext, path: &str) -> Result<ResourceContext> {
        let segments = split(path);
        ensure!(
            !segments.iter().any(|s| *s == MOUNT_MARKER),
            error::BadRequestSnafu {
                path,
                msg: "relative paths can't cross mount points",
            }
        );
        let resolver = Resolver {
            scope: Arc::clone(&base.scope),
            mount_prefix: base.mount_prefix.clone(),
        };
        resolver.walk(path, &segments, Arc::clone(&base.node), base.path.clone())
    }

    fn walk(
        &self,
        full_path: &str,
        segments: &[&str],
        start: Arc<SchemaNode>,
        start_path: TreePath,
    ) -> Result<ResourceContext> {
        let mut node = start;
        let mut steps = start_path.steps().to_vec();

        for (i, raw) in segments.iter().enumerate() {
            if *raw == MOUNT_MARKER {
                return self.cross_mount(full_path, &segments[i + 1..], &node, steps);
            }

            // A list without keys can only be the final step.
            let after_keyless_list = node.kind() == NodeKind::List
                && !steps.last().map_or(false, PathArg::is_entry);
            ensure!(
                !after_keyless_list,
                error::BadRequestSnafu {
                    path: full_path,
                    msg: format!("list {} needs key values", describe(&node)),
                }
            );
            ensure!(
                !node.is_operation() && node.is_composite(),
                error::BadRequestSnafu {
                    path: full_path,
                    msg: format!("{} can't have child steps", describe(&node)),
                }
            );

            let segment = Segment::parse(raw, full_path)?;
            let parent_module = node.qname().map(|q| q.module().to_string());
            ensure!(
                parent_module.is_some() || segment.name.contains(datastore::MODULE_SEPARATOR),
                error::BadRequestSnafu {
                    path: full_path,
                    msg: format!("first step '{}' must be module-qualified", segment.name),
                }
            );

            let child = node
                .find_child(&segment.name, parent_module.as_deref())
                .cloned()
                .context(error::NotFoundSnafu {
                    name: segment.name.clone(),
                    parent: describe(&node),
                })?;
            let qname = child
                .qname()
                .cloned()
                .context(error::InvalidSchemaSnafu {
                    msg: "child node without name",
                })?;

            steps.push(PathArg::node(qname.clone()));
            match (child.kind(), segment.keys) {
                (NodeKind::List, Some(values)) => {
                    ensure!(
                        values.len() == child.keys().len(),
                        error::BadRequestSnafu {
                            path: full_path,
                            msg: format!(
                                "list {} takes {} key values, got {}",
                                qname,
                                child.keys().len(),
                                values.len()
                            ),
                        }
                    );
                    let keys = child.keys().iter().cloned().zip(values).collect();
                    steps.push(PathArg::entry(qname, keys));
                }
                (_, None) => {}
                (_, Some(_)) => {
                    return error::BadRequestSnafu {
                        path: full_path,
                        msg: format!("{} is not a list and takes no key values", qname),
                    }
                    .fail()
                }
            }
            node = child;
        }

        Ok(ResourceContext {
            schema: Arc::clone(&self.scope.schema),
            node,
            path: TreePath::from_steps(steps),
            scope: Arc::clone(&self.scope),
            mount_prefix: self.mount_prefix.clone(),
        })
    }

    fn cross_mount(
        &self,
        full_path: &str,
        rest: &[&str],
        node: &SchemaNode,
        steps: Vec<PathArg>,
    ) -> Result<ResourceContext> {
        let mount_path = TreePath::from_steps(steps);
        let prefix = format!(
            "{}{}/{}",
            self.mount_prefix,
            encode_path(&mount_path),
            MOUNT_MARKER
        );
        ensure!(
            !mount_path.is_root() && node.is_composite(),
            error::BadRequestSnafu {
                path: full_path,
                msg: format!("can't mount on {}", describe(node)),
            }
        );

        let scope = self
            .scope
            .mounts
            .lookup(&mount_path)?
            .context(error::MountUnavailableSnafu {
                path: prefix.clone(),
                msg: "no device is mounted here",
            })?;
        debug!("Crossing mount point at {}", mount_path);

        let resolver = Resolver {
            scope,
            mount_prefix: prefix,
        };
        let root = Arc::clone(resolver.scope.schema.root());
        resolver.walk(full_path, rest, root, TreePath::root())
    }
}

fn split(path: &str) -> Vec<&str> {
    path.trim_start_matches('/')
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn describe(node: &SchemaNode) -> String {
    match node.qname() {
        Some(qname) => qname.to_string(),
        None => "the data root".to_string(),
    }
}

/// Builds the URI path for a tree path, with a leading '/'.  Key values are percent-encoded, and
/// module names are only given when they change, so the result resolves back to the same path.
pub fn encode_path(path: &TreePath) -> String {
    let mut out = String::new();
    let mut module: Option<&str> = None;
    let steps = path.steps();
    for (i, step) in steps.iter().enumerate() {
        // A list's own step is folded into its entry step.
        if let (PathArg::Node(qname), Some(PathArg::Entry { qname: entry, .. })) =
            (step, steps.get(i + 1))
        {
            if qname == entry {
                continue;
            }
        }
        out.push('/');
        out.push_str(&encode_name(step.qname(), module));
        module = Some(step.qname().module());
        if step.is_entry() {
            let keys: Vec<String> = step
                .keys()
                .iter()
                .map(|(_, value)| utf8_percent_encode(value, KEY_ENCODE_SET).to_string())
                .collect();
            out.push('=');
            out.push_str(&keys.join(","));
        }
    }
    out
}

fn encode_name(qname: &QName, parent_module: Option<&str>) -> String {
    if parent_module == Some(qname.module()) {
        qname.name().to_string()
    } else {
        qname.to_string()
    }
}
