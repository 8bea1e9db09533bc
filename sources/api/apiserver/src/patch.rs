//! The yang-patch executor.
//!
//! All edits of a patch go through one unit of work, in order.  The first edit that fails stops
//! the patch: the unit of work is cancelled, so none of the edits take effect, and the status
//! reports which edits succeeded before it.  Only when every edit succeeds is the unit of work
//! committed.

use actix_web::http::StatusCode;
use datastore::{DataNode, InsertPosition, TreePath};
use log::{debug, info, warn};

use crate::error::ErrorEntry;
use crate::strategy::{Change, EditShape, Operation, RestconfStrategy};

/// A decoded yang-patch request.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchContext {
    pub patch_id: String,
    pub comment: Option<String>,
    pub entities: Vec<PatchEntity>,
}

/// One edit of a patch, with its target resolved and its value decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEntity {
    pub edit_id: String,
    pub operation: Operation,
    pub target: TreePath,
    /// Shape of the target, used when the patch has just this one edit.
    pub shape: EditShape,
    pub data: Option<DataNode>,
    pub position: Option<InsertPosition>,
}

impl PatchEntity {
    fn change(&self) -> Change {
        Change::new(self.operation, self.target.clone(), self.data.clone())
            .at(self.position.clone())
    }
}

/// Outcome of one edit.  An edit that was never attempted is not ok and has no errors.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchStatusEntity {
    pub edit_id: String,
    pub ok: bool,
    pub errors: Vec<ErrorEntry>,
}

/// Outcome of a patch, with one entity per edit in edit order.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchStatusContext {
    pub patch_id: String,
    pub ok: bool,
    pub edit_status: Vec<PatchStatusEntity>,
    /// Errors not tied to one edit, such as failing to start the unit of work.
    pub global_errors: Vec<ErrorEntry>,
    status: StatusCode,
}

impl PatchStatusContext {
    /// The HTTP status of the response carrying this status document.
    pub fn status_code(&self) -> StatusCode {
        self.status
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PatchState {
    Pending,
    Applying(usize),
    Committed,
    RolledBack,
}

/// Applies a patch through the strategy, all or nothing.
pub async fn apply_patch(
    strategy: &dyn RestconfStrategy,
    patch: PatchContext,
) -> PatchStatusContext {
    let PatchContext {
        patch_id,
        entities,
        ..
    } = patch;
    let mut statuses: Vec<PatchStatusEntity> = entities
        .iter()
        .map(|e| PatchStatusEntity {
            edit_id: e.edit_id.clone(),
            ok: false,
            errors: Vec::new(),
        })
        .collect();
    let mut state = PatchState::Pending;
    debug!("Patch '{}' is {:?}", patch_id, state);

    let shape = match entities.as_slice() {
        [single] => single.shape,
        _ => EditShape::Multi,
    };
    let mut tx = match strategy.begin_write(shape).await {
        Ok(tx) => tx,
        Err(e) => {
            warn!("Unable to start patch '{}': {}", patch_id, e);
            return PatchStatusContext {
                patch_id,
                ok: false,
                edit_status: statuses,
                global_errors: e.to_entries(),
                status: e.status_code(),
            };
        }
    };

    for (i, entity) in entities.iter().enumerate() {
        state = PatchState::Applying(i);
        debug!("Patch '{}' is {:?}: {}", patch_id, state, entity.edit_id);
        match entity.change().apply(tx.as_mut()).await {
            Ok(()) => statuses[i].ok = true,
            Err(e) => {
                info!(
                    "Edit '{}' of patch '{}' failed, rolling back: {}",
                    entity.edit_id, patch_id, e
                );
                statuses[i].errors = e.to_entries();
                if let Err(cancel) = tx.cancel().await {
                    warn!("Unable to cancel patch '{}': {}", patch_id, cancel);
                }
                state = PatchState::RolledBack;
                debug!("Patch '{}' is {:?}", patch_id, state);
                return PatchStatusContext {
                    patch_id,
                    ok: false,
                    edit_status: statuses,
                    global_errors: Vec::new(),
                    status: StatusCode::CONFLICT,
                };
            }
        }
    }

    match tx.commit().await {
        Ok(()) => {
            state = PatchState::Committed;
            debug!("Patch '{}' is {:?}", patch_id, state);
            PatchStatusContext {
                patch_id,
                ok: true,
                edit_status: statuses,
                global_errors: Vec::new(),
                status: StatusCode::OK,
            }
        }
        Err(e) => {
            warn!("Commit of patch '{}' failed: {}", patch_id, e);
            for status in statuses.iter_mut() {
                status.ok = false;
            }
            if let Some(last) = statuses.last_mut() {
                last.errors = e.to_entries();
            }
            PatchStatusContext {
                patch_id,
                ok: false,
                edit_status: statuses,
                global_errors: Vec::new(),
                status: e.status_code(),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{apply_patch, PatchContext, PatchEntity};
    use crate::schema::test::qn;
    use crate::strategy::remote::test::FakeDevice;
    use crate::strategy::{
        EditShape, LocalStrategy, LockPolicy, Operation, RemoteStrategy, RestconfStrategy,
    };
    use actix_web::http::StatusCode;
    use datastore::{
        Committed, DataNode, DataStore, LogicalStore, MemoryDataStore, PathArg, TreePath,
    };
    use std::sync::{Arc, RwLock};

    fn playlist(name: &str) -> TreePath {
        TreePath::from_steps(vec![
            PathArg::node(qn("jukebox")),
            PathArg::node(qn("playlist")),
            PathArg::entry(qn("playlist"), vec![(qn("name"), name.to_string())]),
        ])
    }

    fn entry(name: &str, description: &str) -> DataNode {
        DataNode::empty_container()
            .with_child(PathArg::node(qn("name")), DataNode::leaf(name))
            .with_child(
                PathArg::node(qn("description")),
                DataNode::leaf(description),
            )
    }

    fn edit(id: &str, operation: Operation, target: &str, data: Option<DataNode>) -> PatchEntity {
        PatchEntity {
            edit_id: id.to_string(),
            operation,
            target: playlist(target),
            shape: EditShape::Subtree,
            data,
            position: None,
        }
    }

    fn patch(entities: Vec<PatchEntity>) -> PatchContext {
        PatchContext {
            patch_id: "test-patch".to_string(),
            comment: None,
            entities,
        }
    }

    /// A local store holding playlist "G".
    fn setup() -> (Arc<RwLock<MemoryDataStore>>, LocalStrategy<MemoryDataStore>) {
        let store = Arc::new(RwLock::new(MemoryDataStore::new()));
        store
            .write()
            .unwrap()
            .put(
                LogicalStore::Configuration,
                &playlist("G"),
                entry("G", "old"),
                &Committed::Live,
            )
            .unwrap();
        (Arc::clone(&store), LocalStrategy::new(store))
    }

    async fn read(strategy: &dyn RestconfStrategy, name: &str) -> Option<DataNode> {
        strategy
            .read(LogicalStore::Configuration, &playlist(name))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn all_edits_commit() {
        let (_, strategy) = setup();
        let status = apply_patch(
            &strategy,
            patch(vec![
                edit("1", Operation::Create, "J", Some(entry("J", "first"))),
                edit("2", Operation::Replace, "J", Some(entry("J", "second"))),
                edit("3", Operation::Delete, "G", None),
            ]),
        )
        .await;

        assert!(status.ok);
        assert_eq!(status.status_code(), StatusCode::OK);
        assert_eq!(status.edit_status.len(), 3);
        assert!(status.edit_status.iter().all(|e| e.ok && e.errors.is_empty()));
        assert_eq!(read(&strategy, "J").await, Some(entry("J", "second")));
        assert_eq!(read(&strategy, "G").await, None);
    }

    #[tokio::test]
    async fn failed_edit_rolls_back() {
        let (_, strategy) = setup();
        let status = apply_patch(
            &strategy,
            patch(vec![
                edit("1", Operation::Create, "J", Some(entry("J", "first"))),
                edit("2", Operation::Replace, "J", Some(entry("J", "second"))),
                edit("3", Operation::Delete, "Absent", None),
            ]),
        )
        .await;

        assert!(!status.ok);
        assert_eq!(status.status_code(), StatusCode::CONFLICT);
        assert_eq!(status.edit_status.len(), 3);
        assert!(status.edit_status[0].ok);
        assert!(status.edit_status[1].ok);
        assert!(!status.edit_status[2].ok);
        assert_eq!(status.edit_status[2].errors.len(), 1);
        assert_eq!(
            status.edit_status[2].errors[0].error_message,
            "Data does not exist"
        );

        // Nothing took effect
        assert_eq!(read(&strategy, "J").await, None);
        assert_eq!(read(&strategy, "G").await, Some(entry("G", "old")));
    }

    #[tokio::test]
    async fn edits_after_failure_are_not_attempted() {
        let (_, strategy) = setup();
        let status = apply_patch(
            &strategy,
            patch(vec![
                edit("1", Operation::Create, "G", Some(entry("G", "again"))),
                edit("2", Operation::Create, "J", Some(entry("J", "first"))),
            ]),
        )
        .await;

        assert_eq!(status.edit_status.len(), 2);
        assert_eq!(status.edit_status[0].errors[0].error_tag, "data-exists");
        assert!(!status.edit_status[1].ok);
        assert!(status.edit_status[1].errors.is_empty());
        assert_eq!(read(&strategy, "J").await, None);
    }

    #[tokio::test]
    async fn commit_failure_is_reported_on_last_edit() {
        let device = Arc::new(FakeDevice::failing(&["commit"]));
        let strategy = RemoteStrategy::new(device.clone(), LockPolicy::Always);
        let status = apply_patch(
            &strategy,
            patch(vec![
                edit("1", Operation::Merge, "J", Some(entry("J", "first"))),
                edit("2", Operation::Remove, "G", None),
            ]),
        )
        .await;

        assert!(!status.ok);
        assert_eq!(status.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(status.edit_status.iter().all(|e| !e.ok));
        assert!(status.edit_status[0].errors.is_empty());
        assert_eq!(
            status.edit_status[1].errors[0].error_message,
            "commit refused"
        );
        assert_eq!(device.calls().last().map(String::as_str), Some("unlock"));
    }

    #[tokio::test]
    async fn lock_failure_is_global() {
        let device = Arc::new(FakeDevice::failing(&["lock"]));
        let strategy = RemoteStrategy::new(device, LockPolicy::Always);
        let status = apply_patch(
            &strategy,
            patch(vec![edit("1", Operation::Remove, "G", None)]),
        )
        .await;

        assert!(!status.ok);
        assert_eq!(status.global_errors.len(), 1);
        assert_eq!(status.edit_status.len(), 1);
        assert!(!status.edit_status[0].ok);
    }
}
