//! Backend strategies: the one interface that writes, reads and patches go through, whether the
//! data lives in the local data store or on a remote device.
//!
//! A strategy gives out units of work.  Each unit of work belongs to one request and ends with
//! exactly one `commit` or `cancel`; implementations also clean up in `Drop` so a request that's
//! aborted midway doesn't leave a transaction open or a lock held.

pub mod local;
pub mod remote;

pub use local::LocalStrategy;
pub use remote::{LockPolicy, RemoteStrategy};

use async_trait::async_trait;
use datastore::{DataNode, InsertPosition, LogicalStore, PathArg, TreePath};
use log::trace;
use serde::Deserialize;
use snafu::{ensure, OptionExt};
use std::fmt;

use crate::error::{self, Result};
use crate::schema::{NodeKind, SchemaNode};

/// What a write touches, which decides whether a remote edit sequence takes an explicit lock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EditShape {
    /// One leaf or leaf-list.
    Leaf,
    /// One container, list or list entry.
    Subtree,
    /// Several edits in one patch.
    Multi,
}

impl EditShape {
    /// The shape of a single write to the given node.
    pub fn of(node: &SchemaNode) -> Self {
        match node.kind() {
            NodeKind::Leaf | NodeKind::LeafList => EditShape::Leaf,
            _ => EditShape::Subtree,
        }
    }
}

#[async_trait]
pub trait RestconfStrategy: Send + Sync {
    /// Reads the node at the path from the given store, outside any unit of work.
    async fn read(&self, store: LogicalStore, path: &TreePath) -> Result<Option<DataNode>>;

    async fn exists(&self, store: LogicalStore, path: &TreePath) -> Result<bool> {
        Ok(self.read(store, path).await?.is_some())
    }

    /// Starts a unit of work for changes of the given shape.
    async fn begin_write(&self, shape: EditShape) -> Result<Box<dyn UnitOfWork>>;
}

/// Changes to configuration data that become visible together on commit.  Reads inside the unit
/// of work see its own changes.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn read(&mut self, path: &TreePath) -> Result<Option<DataNode>>;

    async fn exists(&mut self, path: &TreePath) -> Result<bool> {
        Ok(self.read(path).await?.is_some())
    }

    /// Stores data at the path, replacing anything there.
    async fn put(&mut self, path: &TreePath, data: DataNode) -> Result<()>;

    async fn merge(&mut self, path: &TreePath, data: DataNode) -> Result<()>;

    /// Removes the node at the path if it's there.
    async fn delete(&mut self, path: &TreePath) -> Result<()>;

    /// Places an entry in a user-ordered list, replacing and moving any entry with the same keys.
    async fn insert(
        &mut self,
        list_path: &TreePath,
        arg: PathArg,
        data: DataNode,
        position: &InsertPosition,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn cancel(self: Box<Self>) -> Result<()>;
}

/// Write operations, as used by the data endpoints and by yang-patch edits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Store data that must not exist yet.
    Create,
    /// Store data, replacing anything there.
    Replace,
    Merge,
    /// Remove data that must exist.
    Delete,
    /// Remove data if it exists.
    Remove,
    /// Create a list entry at a position.
    Insert,
    /// Reposition an existing list entry.
    Move,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Replace => "replace",
            Operation::Merge => "merge",
            Operation::Delete => "delete",
            Operation::Remove => "remove",
            Operation::Insert => "insert",
            Operation::Move => "move",
        };
        write!(f, "{}", name)
    }
}

impl Operation {
    /// Whether the operation needs data to write.
    pub fn needs_data(self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Replace | Operation::Merge | Operation::Insert
        )
    }
}

/// One change to apply through a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub operation: Operation,
    pub path: TreePath,
    pub data: Option<DataNode>,
    /// Where to put a list entry; only used for entries of user-ordered lists.
    pub position: Option<InsertPosition>,
}

impl Change {
    pub fn new(operation: Operation, path: TreePath, data: Option<DataNode>) -> Self {
        Self {
            operation,
            path,
            data,
            position: None,
        }
    }

    pub fn at(mut self, position: Option<InsertPosition>) -> Self {
        self.position = position;
        self
    }

    /// Applies the change, doing the existence checks its operation calls for.
    pub async fn apply(self, tx: &mut dyn UnitOfWork) -> Result<()> {
        let Change {
            operation,
            path,
            data,
            position,
        } = self;
        trace!("Applying {} at {}", operation, path);

        let data = match (operation.needs_data(), data) {
            (true, None) => {
                return error::MalformedMessageSnafu {
                    msg: format!("{} at {} needs a value", operation, path),
                }
                .fail()
            }
            (_, data) => data,
        };

        match operation {
            Operation::Create | Operation::Insert => {
                ensure!(
                    !tx.exists(&path).await?,
                    error::AlreadyExistsSnafu {
                        path: path.to_string()
                    }
                );
                let position = match (operation, position) {
                    (Operation::Insert, None) => Some(InsertPosition::Last),
                    (_, position) => position,
                };
                store(tx, &path, data, position).await
            }
            Operation::Replace => store(tx, &path, data, position).await,
            Operation::Merge => match data {
                Some(data) => tx.merge(&path, data).await,
                None => Ok(()),
            },
            Operation::Delete => {
                ensure!(
                    tx.exists(&path).await?,
                    error::DataMissingSnafu {
                        path: path.to_string()
                    }
                );
                tx.delete(&path).await
            }
            Operation::Remove => tx.delete(&path).await,
            Operation::Move => {
                let current = tx.read(&path).await?.context(error::DataMissingSnafu {
                    path: path.to_string(),
                })?;
                let position = position.unwrap_or(InsertPosition::Last);
                store(tx, &path, Some(current), Some(position)).await
            }
        }
    }
}

/// Puts data at a path, or inserts it at a position when one is given for a list entry.
async fn store(
    tx: &mut dyn UnitOfWork,
    path: &TreePath,
    data: Option<DataNode>,
    position: Option<InsertPosition>,
) -> Result<()> {
    let data = data.context(error::MalformedMessageSnafu {
        msg: format!("no value for {}", path),
    })?;
    match (position, path.last(), path.parent()) {
        (Some(position), Some(arg), Some(list_path)) if arg.is_entry() => {
            tx.insert(&list_path, arg.clone(), data, &position).await
        }
        (Some(_), _, _) => error::BadElementSnafu {
            msg: format!("{} is not a list entry and can't be positioned", path),
        }
        .fail(),
        (None, _, _) => tx.put(path, data).await,
    }
}
