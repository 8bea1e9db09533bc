/*!
# Background

A 'data store' here holds schema-shaped data trees for the RESTCONF gateway, with the ability to
stage changes in named transactions and commit them atomically.

There are two logical stores, each a tree rooted at an unnamed container:
* configuration: the intended configuration, written by clients.
* operational: observed state, written by the system; clients only read it.

For more detail about their usage, see [apiserver](../apiserver).

# Library

This library provides a trait defining the exact requirements, along with a memory data store
that stages pending transactions as a snapshot of live data plus an ordered log of modifications.
A transaction whose changed paths were changed in live data by someone else since it began fails
to commit with a conflict.

The `path` module defines how nodes are addressed, and the `tree` module defines the nodes
themselves and the primitive operations on them (put, merge, remove, ordered insert).

Leaf values are JSON values, just to have a convenient form that the HTTP layer can pass
through without interpretation.

# Current limitations

* The user (e.g. apiserver) needs to handle locking.
* Conflicts are found by comparing whole subtrees at each changed path, so a commit conflicts
  with any concurrent change below a path it wrote, even one it would have merged cleanly.
*/

pub mod error;
pub mod memory;
pub mod path;
pub mod tree;

pub use error::{Error, Result};
pub use memory::MemoryDataStore;
pub use path::{PathArg, QName, TreePath, MODULE_SEPARATOR};
pub use tree::{Children, DataNode, InsertPosition};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Committed represents whether we want to look at pending (uncommitted) or live (committed) data
/// in the datastore.
#[derive(Debug, Clone, PartialEq)]
pub enum Committed {
    Live,
    Pending {
        // If the change is pending, we need to know the transaction name.
        tx: String,
    },
}

/// The two logical partitions of data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogicalStore {
    Configuration,
    Operational,
}

impl fmt::Display for LogicalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalStore::Configuration => write!(f, "configuration"),
            LogicalStore::Operational => write!(f, "operational"),
        }
    }
}

/// A single change to a logical store, as recorded in a pending transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "operation")]
pub enum Modification {
    Put {
        store: LogicalStore,
        path: TreePath,
        node: DataNode,
    },
    Merge {
        store: LogicalStore,
        path: TreePath,
        node: DataNode,
    },
    Delete {
        store: LogicalStore,
        path: TreePath,
    },
    Insert {
        store: LogicalStore,
        list_path: TreePath,
        arg: PathArg,
        node: DataNode,
        position: InsertPosition,
    },
}

impl Modification {
    pub fn store(&self) -> LogicalStore {
        match self {
            Modification::Put { store, .. }
            | Modification::Merge { store, .. }
            | Modification::Delete { store, .. }
            | Modification::Insert { store, .. } => *store,
        }
    }

    /// The path of the node that changes.
    pub fn path(&self) -> TreePath {
        match self {
            Modification::Put { path, .. }
            | Modification::Merge { path, .. }
            | Modification::Delete { path, .. } => path.clone(),
            Modification::Insert { list_path, arg, .. } => list_path.child(arg.clone()),
        }
    }

    /// Applies the change to the given tree.
    pub fn apply(&self, tree: &mut DataNode) -> Result<()> {
        match self {
            Modification::Put { path, node, .. } => tree.put(path, node.clone()),
            Modification::Merge { path, node, .. } => tree.merge(path, node.clone()),
            Modification::Delete { path, .. } => tree.remove(path).map(|_| ()),
            Modification::Insert {
                list_path,
                arg,
                node,
                position,
                ..
            } => tree.insert_entry(list_path, arg.clone(), node.clone(), position),
        }
    }
}

pub trait DataStore {
    /// Retrieve the node at the given path, if any.  The root path returns the store's whole
    /// tree.
    fn read(
        &self,
        store: LogicalStore,
        path: &TreePath,
        committed: &Committed,
    ) -> Result<Option<DataNode>>;

    /// Returns whether a node is present at the given path.
    fn exists(&self, store: LogicalStore, path: &TreePath, committed: &Committed) -> Result<bool> {
        Ok(self.read(store, path, committed)?.is_some())
    }

    /// Stores the node at the given path, replacing anything that was there.
    fn put(
        &mut self,
        store: LogicalStore,
        path: &TreePath,
        node: DataNode,
        committed: &Committed,
    ) -> Result<()>;

    /// Merges the node into whatever is at the given path.
    fn merge(
        &mut self,
        store: LogicalStore,
        path: &TreePath,
        node: DataNode,
        committed: &Committed,
    ) -> Result<()>;

    /// Removes the node at the given path.  If we succeeded, we return Ok(()); if the node didn't
    /// exist, we also return Ok(()); we return Err only if we failed to check or remove it.
    fn delete(&mut self, store: LogicalStore, path: &TreePath, committed: &Committed)
        -> Result<()>;

    /// Places an entry in a user-ordered list, replacing or moving any entry with the same keys.
    fn insert(
        &mut self,
        store: LogicalStore,
        list_path: &TreePath,
        arg: PathArg,
        node: DataNode,
        position: &InsertPosition,
        committed: &Committed,
    ) -> Result<()>;

    /// Starts a pending transaction with the given name, based on a snapshot of live data.
    /// Starting a transaction that already exists is a no-op.
    fn begin_transaction<S>(&mut self, transaction: S) -> Result<()>
    where
        S: Into<String> + AsRef<str>;

    /// Applies pending changes from the given transaction to the live datastore.  Returns the
    /// list of changed paths.
    fn commit_transaction<S>(&mut self, transaction: S) -> Result<HashSet<TreePath>>
    where
        S: Into<String> + AsRef<str>;

    /// Remove the given pending transaction from the datastore.  Returns the list of paths it
    /// would have changed.  If the transaction doesn't exist, will return Ok with an empty list.
    fn delete_transaction<S>(&mut self, transaction: S) -> Result<HashSet<TreePath>>
    where
        S: Into<String> + AsRef<str>;

    /// Returns a list of the names of any pending transactions in the data store.
    fn list_transactions(&self) -> Result<HashSet<String>>;

}

/// Serde generic "Value" type used for leaf values.
pub type Value = serde_json::Value;
