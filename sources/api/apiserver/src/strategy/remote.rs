//! The strategy for data on a remote device, reached through a NETCONF session.
//!
//! A unit of work is an edit sequence: an optional lock, edit-config requests, then commit and
//! unlock.  Whether to lock is decided by a `LockPolicy` from the shape of the write.

use async_trait::async_trait;
use datastore::{DataNode, InsertPosition, LogicalStore, PathArg, TreePath};
use log::{debug, warn};
use netconf::{Edit, EditOperation, NetconfDataTreeService};
use serde::Deserialize;
use snafu::ResultExt;
use std::sync::Arc;

use super::{EditShape, RestconfStrategy, UnitOfWork};
use crate::error::{self, Result};

/// When an edit sequence takes an explicit lock on the device's datastore.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicy {
    /// Lock for every write.
    #[default]
    Always,
    /// Lock for leaf writes and multi-edit patches; single subtree writes rely on the atomicity
    /// of one edit-config.
    Selective,
    /// Never lock.
    Never,
}

impl LockPolicy {
    pub fn requires_lock(self, shape: EditShape) -> bool {
        match self {
            LockPolicy::Always => true,
            LockPolicy::Selective => matches!(shape, EditShape::Leaf | EditShape::Multi),
            LockPolicy::Never => false,
        }
    }
}

pub struct RemoteStrategy {
    service: Arc<dyn NetconfDataTreeService>,
    lock_policy: LockPolicy,
}

impl RemoteStrategy {
    pub fn new(service: Arc<dyn NetconfDataTreeService>, lock_policy: LockPolicy) -> Self {
        Self {
            service,
            lock_policy,
        }
    }
}

#[async_trait]
impl RestconfStrategy for RemoteStrategy {
    async fn read(&self, store: LogicalStore, path: &TreePath) -> Result<Option<DataNode>> {
        match store {
            LogicalStore::Configuration => self
                .service
                .get_config(path)
                .await
                .context(error::RemoteOperationFailedSnafu {
                    operation: "get-config",
                }),
            LogicalStore::Operational => self
                .service
                .get(path)
                .await
                .context(error::RemoteOperationFailedSnafu { operation: "get" }),
        }
    }

    async fn begin_write(&self, shape: EditShape) -> Result<Box<dyn UnitOfWork>> {
        let locked = self.lock_policy.requires_lock(shape);
        if locked {
            self.service
                .lock()
                .await
                .context(error::RemoteOperationFailedSnafu { operation: "lock" })?;
        }
        debug!("Started remote edit sequence for {:?} edit, locked: {}", shape, locked);
        Ok(Box::new(EditSequence {
            service: Arc::clone(&self.service),
            locked,
            finished: false,
        }))
    }
}

pub struct EditSequence {
    service: Arc<dyn NetconfDataTreeService>,
    locked: bool,
    finished: bool,
}

impl EditSequence {
    async fn edit(&self, edit: Edit) -> Result<()> {
        self.service
            .edit_config(edit)
            .await
            .context(error::RemoteOperationFailedSnafu {
                operation: "edit-config",
            })
    }

    /// Releases the lock if we took one.  Failing to unlock is only logged; the device drops the
    /// lock when the session ends.
    async fn release(&self) {
        if !self.locked {
            return;
        }
        match self.service.unlock().await {
            Ok(()) => debug!("Released remote lock"),
            Err(e) => warn!("Unable to release remote lock: {}", e),
        }
    }
}

#[async_trait]
impl UnitOfWork for EditSequence {
    async fn read(&mut self, path: &TreePath) -> Result<Option<DataNode>> {
        self.service
            .get_config(path)
            .await
            .context(error::RemoteOperationFailedSnafu {
                operation: "get-config",
            })
    }

    async fn put(&mut self, path: &TreePath, data: DataNode) -> Result<()> {
        self.edit(Edit::new(EditOperation::Replace, path.clone(), Some(data)))
            .await
    }

    async fn merge(&mut self, path: &TreePath, data: DataNode) -> Result<()> {
        self.edit(Edit::new(EditOperation::Merge, path.clone(), Some(data)))
            .await
    }

    async fn delete(&mut self, path: &TreePath) -> Result<()> {
        self.edit(Edit::new(EditOperation::Remove, path.clone(), None))
            .await
    }

    async fn insert(
        &mut self,
        list_path: &TreePath,
        arg: PathArg,
        data: DataNode,
        position: &InsertPosition,
    ) -> Result<()> {
        let edit = Edit::new(EditOperation::Replace, list_path.child(arg), Some(data))
            .with_insert(position.clone());
        self.edit(edit).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let result = this
            .service
            .commit()
            .await
            .context(error::RemoteOperationFailedSnafu {
                operation: "commit",
            });
        if let Err(e) = &result {
            warn!("Remote commit failed, discarding changes: {}", e);
            if let Err(e) = this.service.discard_changes().await {
                warn!("Unable to discard remote changes: {}", e);
            }
        }
        this.release().await;
        // Dropped before this point, the sequence is still cleaned up by Drop.
        this.finished = true;
        result.context(error::CommitFailedSnafu)
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let result = this.service.discard_changes().await.context(
            error::RemoteOperationFailedSnafu {
                operation: "discard-changes",
            },
        );
        this.release().await;
        this.finished = true;
        debug!("Cancelled remote edit sequence");
        result
    }
}

impl Drop for EditSequence {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // We can't wait here, so cleanup runs as its own task.
        let service = Arc::clone(&self.service);
        let locked = self.locked;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = service.discard_changes().await {
                        warn!("Unable to discard abandoned remote changes: {}", e);
                    }
                    if locked {
                        if let Err(e) = service.unlock().await {
                            warn!("Unable to release abandoned remote lock: {}", e);
                        }
                    }
                });
            }
            Err(_) => warn!("No runtime to clean up abandoned remote edit sequence"),
        }
    }
}
