//! Reads that combine configuration and operational data.
//!
//! For `content=all` the two trees read at the target are merged: every child found on either
//! side appears once, composites found on both sides merge recursively, and when the same leaf
//! is on both sides the operational value wins.

use datastore::{DataNode, LogicalStore, PathArg, QName, TreePath};
use log::trace;
use snafu::{OptionExt, ResultExt};

use crate::error::{self, Result};
use crate::schema::SchemaNode;
use crate::strategy::RestconfStrategy;

/// Module and name of the container wrapping a whole-datastore read.
pub const DATA_ROOT_MODULE: &str = "ietf-restconf";
pub const DATA_ROOT_NAME: &str = "data";

/// Which data a read returns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ContentParam {
    Config,
    NonConfig,
    #[default]
    All,
}

/// Merges the configuration and operational trees read at the same path.
pub fn merge_trees(config: Option<DataNode>, state: Option<DataNode>) -> Option<DataNode> {
    match (config, state) {
        (Some(mut config), Some(state)) => {
            config.merge_from(state);
            Some(config)
        }
        (config, None) => config,
        (None, state) => state,
    }
}

/// Reads the target from the stores the content parameter asks for and merges the results.
/// Nothing found anywhere is `NoData`.
pub async fn read_data(
    strategy: &dyn RestconfStrategy,
    path: &TreePath,
    schema: &SchemaNode,
    content: ContentParam,
) -> Result<DataNode> {
    let config = match content {
        ContentParam::Config | ContentParam::All => {
            strategy.read(LogicalStore::Configuration, path).await?
        }
        ContentParam::NonConfig => None,
    };
    let state = match content {
        ContentParam::NonConfig | ContentParam::All => strategy
            .read(LogicalStore::Operational, path)
            .await?
            .and_then(|state| state_only(state, schema)),
        ContentParam::Config => None,
    };
    trace!(
        "Read {} with {:?}: config {}, state {}",
        path,
        content,
        config.is_some(),
        state.is_some()
    );

    merge_trees(config, state).context(error::NoDataSnafu {
        path: path.to_string(),
    })
}

/// Drops configuration leaves from an operational read.  Devices answer operational reads with
/// configuration mixed in, and non-config reads mustn't show it.  Composites emptied this way are
/// dropped too.
pub fn state_only(node: DataNode, schema: &SchemaNode) -> Option<DataNode> {
    match node {
        DataNode::Leaf(_) => {
            if schema.is_config() {
                None
            } else {
                Some(node)
            }
        }
        DataNode::List(entries) => {
            let kept: datastore::Children = entries
                .into_iter()
                .filter_map(|(arg, entry)| state_only(entry, schema).map(|e| (arg, e)))
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some(DataNode::List(kept))
            }
        }
        DataNode::Container(children) => {
            let kept: datastore::Children = children
                .into_iter()
                .filter_map(|(arg, child)| match schema.child(arg.qname()) {
                    Some(child_schema) => state_only(child, child_schema).map(|c| (arg, c)),
                    // Unknown to the schema; keep it so nothing silently disappears.
                    None => Some((arg, child)),
                })
                .collect();
            if kept.is_empty() && schema.is_config() {
                None
            } else {
                Some(DataNode::Container(kept))
            }
        }
    }
}

/// Wraps the result of a whole-datastore read in the data root container, so it has the same
/// shape as a read of any other container.
pub fn wrap_root(data: DataNode) -> Result<DataNode> {
    Ok(DataNode::empty_container().with_child(PathArg::node(data_root()?), data))
}

/// The qualified name of the data root container.
pub fn data_root() -> Result<QName> {
    QName::new(DATA_ROOT_MODULE, DATA_ROOT_NAME).context(error::DataStoreSnafu {
        op: "name data root",
    })
}
