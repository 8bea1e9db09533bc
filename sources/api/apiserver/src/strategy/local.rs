//! The strategy for data kept in the gateway's own data store.
//!
//! Each unit of work is a named pending transaction in the data store.  The store is shared behind
//! a std RwLock; guards are only taken inside the small synchronous helpers below so they're never
//! held across an await.

use async_trait::async_trait;
use datastore::{Committed, DataNode, DataStore, InsertPosition, LogicalStore, PathArg, TreePath};
use log::{debug, warn};
use snafu::{OptionExt, ResultExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::{EditShape, RestconfStrategy, UnitOfWork};
use crate::error::{self, Result};

pub type SharedDataStore<D> = Arc<RwLock<D>>;

pub struct LocalStrategy<D> {
    store: SharedDataStore<D>,
    next_transaction: AtomicU64,
}

impl<D> LocalStrategy<D>
where
    D: DataStore + Send + Sync + 'static,
{
    pub fn new(store: SharedDataStore<D>) -> Self {
        Self {
            store,
            next_transaction: AtomicU64::new(1),
        }
    }

    fn read_live(&self, store: LogicalStore, path: &TreePath) -> Result<Option<DataNode>> {
        let datastore = self.store.read().ok().context(error::DataStoreLockSnafu)?;
        datastore
            .read(store, path, &Committed::Live)
            .context(error::DataStoreSnafu { op: "read" })
    }

    fn begin(&self) -> Result<String> {
        let id = self.next_transaction.fetch_add(1, Ordering::SeqCst);
        let tx = format!("restconf-{}", id);
        let mut datastore = self.store.write().ok().context(error::DataStoreLockSnafu)?;
        datastore
            .begin_transaction(tx.as_str())
            .context(error::DataStoreSnafu {
                op: "begin transaction",
            })?;
        Ok(tx)
    }
}

#[async_trait]
impl<D> RestconfStrategy for LocalStrategy<D>
where
    D: DataStore + Send + Sync + 'static,
{
    async fn read(&self, store: LogicalStore, path: &TreePath) -> Result<Option<DataNode>> {
        self.read_live(store, path)
    }

    async fn begin_write(&self, shape: EditShape) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.begin()?;
        debug!("Started transaction '{}' for {:?} edit", tx, shape);
        Ok(Box::new(LocalTransaction {
            store: Arc::clone(&self.store),
            committed: Committed::Pending { tx: tx.clone() },
            tx,
            finished: false,
        }))
    }
}

pub struct LocalTransaction<D>
where
    D: DataStore,
{
    store: SharedDataStore<D>,
    tx: String,
    committed: Committed,
    finished: bool,
}

impl<D> LocalTransaction<D>
where
    D: DataStore + Send + Sync + 'static,
{
    fn with_store<T, F>(&self, op: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut D, &Committed) -> datastore::Result<T>,
    {
        let mut datastore = self.store.write().ok().context(error::DataStoreLockSnafu)?;
        f(&mut *datastore, &self.committed).context(error::DataStoreSnafu { op })
    }

    fn read_pending(&self, path: &TreePath) -> Result<Option<DataNode>> {
        let datastore = self.store.read().ok().context(error::DataStoreLockSnafu)?;
        datastore
            .read(LogicalStore::Configuration, path, &self.committed)
            .context(error::DataStoreSnafu { op: "read" })
    }

    fn commit_now(&self) -> Result<()> {
        let mut datastore = self.store.write().ok().context(error::DataStoreLockSnafu)?;
        let changed = match datastore.commit_transaction(self.tx.as_str()) {
            Ok(changed) => changed,
            Err(datastore::Error::Conflict { path, .. }) => {
                return error::ConflictSnafu { path }.fail()
            }
            Err(e) => return Err(e).context(error::DataStoreSnafu { op: "commit" }),
        };
        drop(datastore);
        debug!(
            "Committed transaction '{}' with {} changed paths",
            self.tx,
            changed.len()
        );
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        self.with_store("cancel", |datastore, _| {
            datastore.delete_transaction(self.tx.as_str())
        })?;
        debug!("Discarded transaction '{}'", self.tx);
        Ok(())
    }
}

#[async_trait]
impl<D> UnitOfWork for LocalTransaction<D>
where
    D: DataStore + Send + Sync + 'static,
{
    async fn read(&mut self, path: &TreePath) -> Result<Option<DataNode>> {
        self.read_pending(path)
    }

    async fn put(&mut self, path: &TreePath, data: DataNode) -> Result<()> {
        self.with_store("put", |datastore, committed| {
            datastore.put(LogicalStore::Configuration, path, data, committed)
        })
    }

    async fn merge(&mut self, path: &TreePath, data: DataNode) -> Result<()> {
        self.with_store("merge", |datastore, committed| {
            datastore.merge(LogicalStore::Configuration, path, data, committed)
        })
    }

    async fn delete(&mut self, path: &TreePath) -> Result<()> {
        self.with_store("delete", |datastore, committed| {
            datastore.delete(LogicalStore::Configuration, path, committed)
        })
    }

    async fn insert(
        &mut self,
        list_path: &TreePath,
        arg: PathArg,
        data: DataNode,
        position: &InsertPosition,
    ) -> Result<()> {
        self.with_store("insert", |datastore, committed| {
            datastore.insert(
                LogicalStore::Configuration,
                list_path,
                arg,
                data,
                position,
                committed,
            )
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        // On failure the transaction is left for Drop to discard.
        this.commit_now().context(error::CommitFailedSnafu)?;
        this.finished = true;
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.finished = true;
        this.discard()
    }
}

impl<D> Drop for LocalTransaction<D>
where
    D: DataStore,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.store.write() {
            Ok(mut datastore) => match datastore.delete_transaction(self.tx.as_str()) {
                Ok(_) => debug!("Discarded unfinished transaction '{}'", self.tx),
                Err(e) => warn!("Unable to discard transaction '{}': {}", self.tx, e),
            },
            Err(_) => warn!(
                "Data store lock poisoned, leaving transaction '{}' behind",
                self.tx
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::LocalStrategy;
    use crate::error::Error;
    use crate::strategy::{Change, EditShape, Operation, RestconfStrategy, UnitOfWork};
    use datastore::{
        Committed, DataNode, DataStore, InsertPosition, LogicalStore, MemoryDataStore, PathArg,
        QName, TreePath,
    };
    use actix_web::http::StatusCode;
    use maplit::hashset;
    use serde_json::json;
    use std::sync::{Arc, RwLock};

    fn qn(name: &str) -> QName {
        QName::new("example-jukebox", name).unwrap()
    }

    fn gap() -> TreePath {
        TreePath::from_steps(vec![
            PathArg::node(qn("jukebox")),
            PathArg::node(qn("player")),
            PathArg::node(qn("gap")),
        ])
    }

    fn setup() -> (Arc<RwLock<MemoryDataStore>>, LocalStrategy<MemoryDataStore>) {
        let store = Arc::new(RwLock::new(MemoryDataStore::new()));
        (Arc::clone(&store), LocalStrategy::new(store))
    }

    #[tokio::test]
    async fn commit_makes_changes_visible() {
        let (_, strategy) = setup();
        let mut tx = strategy.begin_write(EditShape::Leaf).await.unwrap();
        tx.put(&gap(), DataNode::leaf(json!(1.5))).await.unwrap();

        // Reads in the unit of work see the change, reads outside don't yet
        assert!(tx.exists(&gap()).await.unwrap());
        assert!(!strategy
            .exists(LogicalStore::Configuration, &gap())
            .await
            .unwrap());

        tx.commit().await.unwrap();
        assert_eq!(
            strategy
                .read(LogicalStore::Configuration, &gap())
                .await
                .unwrap(),
            Some(DataNode::leaf(json!(1.5)))
        );
    }

    #[tokio::test]
    async fn cancel_discards() {
        let (store, strategy) = setup();
        let mut tx = strategy.begin_write(EditShape::Subtree).await.unwrap();
        tx.put(&gap(), DataNode::leaf(json!(1))).await.unwrap();
        tx.cancel().await.unwrap();

        assert!(!strategy
            .exists(LogicalStore::Configuration, &gap())
            .await
            .unwrap());
        assert_eq!(store.read().unwrap().list_transactions().unwrap(), hashset!());
    }

    #[tokio::test]
    async fn drop_discards() {
        let (store, strategy) = setup();
        {
            let mut tx = strategy.begin_write(EditShape::Leaf).await.unwrap();
            tx.put(&gap(), DataNode::leaf(json!(1))).await.unwrap();
            assert_eq!(store.read().unwrap().list_transactions().unwrap().len(), 1);
        }
        assert_eq!(store.read().unwrap().list_transactions().unwrap(), hashset!());
        assert!(!store
            .read()
            .unwrap()
            .exists(LogicalStore::Configuration, &gap(), &Committed::Live)
            .unwrap());
    }

    #[tokio::test]
    async fn operations_through_changes() {
        let (_, strategy) = setup();
        let list = TreePath::from_steps(vec![
            PathArg::node(qn("jukebox")),
            PathArg::node(qn("playlist")),
        ]);
        let entry = |name: &str| {
            list.child(PathArg::entry(
                qn("playlist"),
                vec![(qn("name"), name.to_string())],
            ))
        };

        let mut tx = strategy.begin_write(EditShape::Multi).await.unwrap();
        for name in &["a", "b"] {
            Change::new(Operation::Create, entry(*name), Some(DataNode::empty_container()))
                .apply(tx.as_mut())
                .await
                .unwrap();
        }
        Change::new(Operation::Move, entry("b"), None)
            .at(Some(InsertPosition::First))
            .apply(tx.as_mut())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let playlists = strategy
            .read(LogicalStore::Configuration, &list)
            .await
            .unwrap()
            .unwrap();
        let order: Vec<String> = playlists
            .children()
            .unwrap()
            .keys()
            .map(|arg| arg.keys()[0].1.clone())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn racing_creates_conflict() {
        let (_, strategy) = setup();
        let mut first = strategy.begin_write(EditShape::Leaf).await.unwrap();
        let mut second = strategy.begin_write(EditShape::Leaf).await.unwrap();
        for (tx, value) in [(&mut first, 1), (&mut second, 2)] {
            Change::new(Operation::Create, gap(), Some(DataNode::leaf(value)))
                .apply(tx.as_mut())
                .await
                .unwrap();
        }

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        match &err {
            Error::CommitFailed { source } => {
                assert!(matches!(**source, Error::Conflict { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            strategy
                .read(LogicalStore::Configuration, &gap())
                .await
                .unwrap(),
            Some(DataNode::leaf(1))
        );
    }

    #[tokio::test]
    async fn separate_transactions() {
        let (store, strategy) = setup();
        let first = strategy.begin_write(EditShape::Leaf).await.unwrap();
        let second = strategy.begin_write(EditShape::Leaf).await.unwrap();
        assert_eq!(store.read().unwrap().list_transactions().unwrap().len(), 2);
        first.cancel().await.unwrap();
        second.cancel().await.unwrap();
    }
}
