//! The schema context: which modules and data nodes exist, and what kind each node is.
//!
//! Schemas are written in TOML.  Top-level nodes are keyed by qualified name; children are keyed
//! by local name when they're in their parent's module, or by qualified name otherwise:
//!
//! ```toml
//! [modules.example-jukebox]
//! revision = "2016-08-15"
//!
//! [nodes."example-jukebox:jukebox"]
//! kind = "container"
//!
//! [nodes."example-jukebox:jukebox".children.playlist]
//! kind = "list"
//! key = ["name"]
//! ordered-by-user = true
//! ```
//!
//! The raw document is checked and turned into a tree of `SchemaNode`s shared through `Arc`, so
//! a resolved request can hold on to its target node cheaply.

use datastore::{QName, Value};
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::path::Path;
use std::sync::Arc;

use crate::error::{self, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Container,
    List,
    Leaf,
    LeafList,
    Rpc,
    Action,
}

/// What a leaf's value looks like in JSON.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeafType {
    #[default]
    String,
    Integer,
    Decimal,
    Boolean,
    Empty,
    Any,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawSchema {
    #[serde(default)]
    pub modules: IndexMap<String, RawModule>,
    #[serde(default)]
    pub nodes: IndexMap<String, RawNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawModule {
    pub revision: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawNode {
    pub kind: NodeKind,
    #[serde(default)]
    pub children: IndexMap<String, RawNode>,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub ordered_by_user: bool,
    pub config: Option<bool>,
    #[serde(rename = "type", default)]
    pub leaf_type: LeafType,
    pub default: Option<Value>,
    #[serde(default)]
    pub input: IndexMap<String, RawNode>,
    #[serde(default)]
    pub output: IndexMap<String, RawNode>,
}

#[derive(Debug)]
pub struct SchemaNode {
    // None for the root and for operation input/output.
    qname: Option<QName>,
    kind: NodeKind,
    config: bool,
    keys: Vec<QName>,
    ordered_by_user: bool,
    leaf_type: LeafType,
    default: Option<Value>,
    children: IndexMap<QName, Arc<SchemaNode>>,
    input: Option<Arc<SchemaNode>>,
    output: Option<Arc<SchemaNode>>,
}

impl SchemaNode {
    pub fn qname(&self) -> Option<&QName> {
        self.qname.as_ref()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Whether the node holds configuration (as opposed to state) data.
    pub fn is_config(&self) -> bool {
        self.config
    }

    pub fn keys(&self) -> &[QName] {
        &self.keys
    }

    pub fn is_ordered_by_user(&self) -> bool {
        self.ordered_by_user
    }

    pub fn leaf_type(&self) -> LeafType {
        self.leaf_type
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = &Arc<SchemaNode>> {
        self.children.values()
    }

    pub fn child(&self, qname: &QName) -> Option<&Arc<SchemaNode>> {
        self.children.get(qname)
    }

    /// Finds a child by the name used in a path or body: qualified, or local when the child is in
    /// `parent_module`.
    pub fn find_child(&self, name: &str, parent_module: Option<&str>) -> Option<&Arc<SchemaNode>> {
        let qname = match name.split_once(datastore::MODULE_SEPARATOR) {
            Some(_) => QName::parse(name).ok()?,
            None => QName::new(parent_module?, name).ok()?,
        };
        self.children.get(&qname)
    }

    pub fn input(&self) -> Option<&Arc<SchemaNode>> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&Arc<SchemaNode>> {
        self.output.as_ref()
    }

    pub fn is_operation(&self) -> bool {
        matches!(self.kind, NodeKind::Rpc | NodeKind::Action)
    }

    /// Whether data nodes of this kind have children (containers, lists and their entries).
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, NodeKind::Container | NodeKind::List)
    }
}

#[derive(Debug)]
pub struct SchemaContext {
    modules: IndexMap<String, RawModule>,
    root: Arc<SchemaNode>,
}

impl SchemaContext {
    /// Parses and checks a single TOML schema document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawSchema = toml::from_str(text).map_err(|e| error::Error::InvalidSchema {
            msg: e.to_string(),
        })?;
        Self::from_raw(vec![raw])
    }

    /// Loads and combines schema documents from files.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut raws = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).context(error::ReadFileSnafu { path })?;
            let raw: RawSchema = toml::from_str(&text).context(error::ParseTomlSnafu { path })?;
            raws.push(raw);
        }
        Self::from_raw(raws)
    }

    /// Combines raw schema documents into one context.  Module and top-level node names must be
    /// unique across documents.
    pub fn from_raw(raws: Vec<RawSchema>) -> Result<Self> {
        let mut modules = IndexMap::new();
        let mut nodes = IndexMap::new();
        for raw in raws {
            for (name, module) in raw.modules {
                ensure!(
                    !modules.contains_key(&name),
                    error::InvalidSchemaSnafu {
                        msg: format!("module '{}' defined twice", name),
                    }
                );
                modules.insert(name, module);
            }
            for (name, node) in raw.nodes {
                ensure!(
                    !nodes.contains_key(&name),
                    error::InvalidSchemaSnafu {
                        msg: format!("node '{}' defined twice", name),
                    }
                );
                nodes.insert(name, node);
            }
        }

        let mut builder = Builder { modules: &modules };
        let mut children = IndexMap::new();
        for (name, raw) in nodes {
            let qname = QName::parse(&name).ok().context(error::InvalidSchemaSnafu {
                msg: format!("top-level node '{}' must be module-qualified", name),
            })?;
            let node = builder.build(qname.clone(), raw, Parent::Root)?;
            children.insert(qname, node);
        }
        debug!(
            "Loaded schema with {} modules and {} top-level nodes",
            modules.len(),
            children.len()
        );

        let root = Arc::new(SchemaNode {
            qname: None,
            kind: NodeKind::Container,
            config: true,
            keys: Vec::new(),
            ordered_by_user: false,
            leaf_type: LeafType::default(),
            default: None,
            children,
            input: None,
            output: None,
        });
        Ok(Self { modules, root })
    }

    /// The unnamed node above all top-level nodes.
    pub fn root(&self) -> &Arc<SchemaNode> {
        &self.root
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn module_revision(&self, name: &str) -> Option<&str> {
        self.modules.get(name).and_then(|m| m.revision.as_deref())
    }
}

/// Where a node being built sits, which decides what kinds it may have.
#[derive(Debug, Copy, Clone)]
enum Parent {
    Root,
    Data { config: bool },
    Operation,
}

struct Builder<'a> {
    modules: &'a IndexMap<String, RawModule>,
}

impl Builder<'_> {
    fn invalid<T>(qname: &QName, msg: &str) -> Result<T> {
        error::InvalidSchemaSnafu {
            msg: format!("{}: {}", qname, msg),
        }
        .fail()
    }

    /// Resolves a child's name, which inherits its parent's module unless qualified.
    fn child_qname(&self, parent: &QName, name: &str) -> Result<QName> {
        let qname = if name.contains(datastore::MODULE_SEPARATOR) {
            QName::parse(name)
        } else {
            parent.sibling(name)
        }
        .map_err(|e| error::Error::InvalidSchema {
            msg: format!("{}: {}", parent, e),
        })?;
        ensure!(
            self.modules.contains_key(qname.module()),
            error::InvalidSchemaSnafu {
                msg: format!("{}: unknown module '{}'", qname, qname.module()),
            }
        );
        Ok(qname)
    }

    fn children(
        &mut self,
        parent: &QName,
        raw: IndexMap<String, RawNode>,
        position: Parent,
    ) -> Result<IndexMap<QName, Arc<SchemaNode>>> {
        let mut children = IndexMap::new();
        for (name, child) in raw {
            let qname = self.child_qname(parent, &name)?;
            let node = self.build(qname.clone(), child, position)?;
            children.insert(qname, node);
        }
        Ok(children)
    }

    fn build(&mut self, qname: QName, raw: RawNode, parent: Parent) -> Result<Arc<SchemaNode>> {
        ensure!(
            self.modules.contains_key(qname.module()),
            error::InvalidSchemaSnafu {
                msg: format!("{}: unknown module '{}'", qname, qname.module()),
            }
        );

        // Config is inherited, and state can't contain config.
        let config = match (parent, raw.config) {
            (Parent::Operation, _) => false,
            (Parent::Root, explicit) => explicit.unwrap_or(true),
            (Parent::Data { config: false }, Some(true)) => {
                return Self::invalid(&qname, "config node under state node")
            }
            (Parent::Data { config }, explicit) => explicit.unwrap_or(config),
        };

        match raw.kind {
            NodeKind::Rpc if !matches!(parent, Parent::Root) => {
                return Self::invalid(&qname, "rpc must be top-level")
            }
            NodeKind::Action if !matches!(parent, Parent::Data { .. }) => {
                return Self::invalid(&qname, "action must be inside a container or list")
            }
            NodeKind::Leaf | NodeKind::LeafList if !raw.children.is_empty() => {
                return Self::invalid(&qname, "leaves can't have children")
            }
            NodeKind::Rpc | NodeKind::Action if !raw.children.is_empty() => {
                return Self::invalid(&qname, "operations only have input and output")
            }
            _ => {}
        }
        if raw.ordered_by_user && !matches!(raw.kind, NodeKind::List | NodeKind::LeafList) {
            return Self::invalid(&qname, "only lists can be ordered-by-user");
        }
        if raw.default.is_some() && raw.kind != NodeKind::Leaf {
            return Self::invalid(&qname, "only leaves have defaults");
        }
        let is_operation = matches!(raw.kind, NodeKind::Rpc | NodeKind::Action);
        if (!raw.input.is_empty() || !raw.output.is_empty()) && !is_operation {
            return Self::invalid(&qname, "only operations have input and output");
        }

        let children_position = Parent::Data { config };
        let children = self.children(&qname, raw.children, children_position)?;

        let mut keys = Vec::new();
        if raw.kind == NodeKind::List {
            if raw.key.is_empty() {
                return Self::invalid(&qname, "list needs at least one key");
            }
            for key in &raw.key {
                let key_qname = self.child_qname(&qname, key)?;
                match children.get(&key_qname) {
                    Some(leaf) if leaf.kind == NodeKind::Leaf => keys.push(key_qname),
                    _ => {
                        let msg = format!("key '{}' is not a leaf child", key);
                        return Self::invalid(&qname, &msg);
                    }
                }
            }
        } else if !raw.key.is_empty() {
            return Self::invalid(&qname, "only lists have keys");
        }

        let (input, output) = if is_operation {
            let input = self.children(&qname, raw.input, Parent::Operation)?;
            let output = self.children(&qname, raw.output, Parent::Operation)?;
            (
                Some(Arc::new(Self::operation_body(&qname, "input", input)?)),
                Some(Arc::new(Self::operation_body(&qname, "output", output)?)),
            )
        } else {
            (None, None)
        };

        Ok(Arc::new(SchemaNode {
            qname: Some(qname),
            kind: raw.kind,
            config,
            keys,
            ordered_by_user: raw.ordered_by_user,
            leaf_type: raw.leaf_type,
            default: raw.default,
            children,
            input,
            output,
        }))
    }

    /// Builds the container-like node holding an operation's input or output.
    fn operation_body(
        operation: &QName,
        name: &str,
        children: IndexMap<QName, Arc<SchemaNode>>,
    ) -> Result<SchemaNode> {
        let qname = operation
            .sibling(name)
            .map_err(|e| error::Error::InvalidSchema { msg: e.to_string() })?;
        Ok(SchemaNode {
            qname: Some(qname),
            kind: NodeKind::Container,
            config: false,
            keys: Vec::new(),
            ordered_by_user: false,
            leaf_type: LeafType::default(),
            default: None,
            children,
            input: None,
            output: None,
        })
    }
}
