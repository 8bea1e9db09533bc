//! In-memory datastore.
//!
//! A pending transaction starts from a snapshot of live data.  Its changes are applied to that
//! working copy, so reads inside the transaction see its own writes, and are also kept in an
//! ordered log.  Commit first checks that live data under every changed path still matches the
//! snapshot, then replays the log against a copy of live data and swaps it in only if every
//! change applied, so a failed commit leaves live data untouched.

use log::{debug, trace};
use snafu::ResultExt;
use std::collections::{HashMap, HashSet};

use super::{error, Committed, DataStore, LogicalStore, Modification, Result};
use super::{DataNode, InsertPosition, PathArg, TreePath};

/// The root trees of both logical stores.
#[derive(Debug, Clone, Default, PartialEq)]
struct Trees {
    configuration: DataNode,
    operational: DataNode,
}

impl Trees {
    fn tree(&self, store: LogicalStore) -> &DataNode {
        match store {
            LogicalStore::Configuration => &self.configuration,
            LogicalStore::Operational => &self.operational,
        }
    }

    fn tree_mut(&mut self, store: LogicalStore) -> &mut DataNode {
        match store {
            LogicalStore::Configuration => &mut self.configuration,
            LogicalStore::Operational => &mut self.operational,
        }
    }

    fn apply(&mut self, modification: &Modification) -> Result<()> {
        modification.apply(self.tree_mut(modification.store()))
    }
}

#[derive(Debug)]
struct PendingTransaction {
    // Live data when the transaction began
    base: Trees,
    working: Trees,
    log: Vec<Modification>,
}

impl PendingTransaction {
    fn new(live: &Trees) -> Self {
        Self {
            base: live.clone(),
            working: live.clone(),
            log: Vec::new(),
        }
    }

    /// The first changed path whose live data is no longer what the transaction started from.
    fn conflict(&self, live: &Trees) -> Option<TreePath> {
        self.log.iter().find_map(|modification| {
            let store = modification.store();
            let path = modification.path();
            (self.base.tree(store).get(&path) != live.tree(store).get(&path)).then_some(path)
        })
    }

    fn changed_paths(&self) -> HashSet<TreePath> {
        self.log.iter().map(Modification::path).collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryDataStore {
    // Transaction name -> working trees and change log
    pending: HashMap<String, PendingTransaction>,
    // Committed (live) data.
    live: Trees,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn trees(&self, committed: &Committed) -> &Trees {
        match committed {
            Committed::Live => &self.live,
            // An unknown transaction hasn't changed anything, so it sees live data.
            Committed::Pending { tx } => self
                .pending
                .get(tx)
                .map(|pending| &pending.working)
                .unwrap_or(&self.live),
        }
    }

    /// Applies a change to live data directly, or to the given transaction, starting it if
    /// needed.  A change that fails to apply isn't logged.
    fn record(&mut self, modification: Modification, committed: &Committed) -> Result<()> {
        match committed {
            Committed::Live => self.live.apply(&modification),
            Committed::Pending { tx } => {
                let live = &self.live;
                let pending = self
                    .pending
                    .entry(tx.clone())
                    .or_insert_with(|| PendingTransaction::new(live));
                pending.working.apply(&modification)?;
                pending.log.push(modification);
                Ok(())
            }
        }
    }
}

impl DataStore for MemoryDataStore {
    fn read(
        &self,
        store: LogicalStore,
        path: &TreePath,
        committed: &Committed,
    ) -> Result<Option<DataNode>> {
        Ok(self.trees(committed).tree(store).get(path).cloned())
    }

    fn exists(&self, store: LogicalStore, path: &TreePath, committed: &Committed) -> Result<bool> {
        Ok(self.trees(committed).tree(store).get(path).is_some())
    }

    fn put(
        &mut self,
        store: LogicalStore,
        path: &TreePath,
        node: DataNode,
        committed: &Committed,
    ) -> Result<()> {
        let path = path.clone();
        self.record(Modification::Put { store, path, node }, committed)
    }

    fn merge(
        &mut self,
        store: LogicalStore,
        path: &TreePath,
        node: DataNode,
        committed: &Committed,
    ) -> Result<()> {
        let path = path.clone();
        self.record(Modification::Merge { store, path, node }, committed)
    }

    fn delete(
        &mut self,
        store: LogicalStore,
        path: &TreePath,
        committed: &Committed,
    ) -> Result<()> {
        let path = path.clone();
        self.record(Modification::Delete { store, path }, committed)
    }

    fn insert(
        &mut self,
        store: LogicalStore,
        list_path: &TreePath,
        arg: PathArg,
        node: DataNode,
        position: &InsertPosition,
        committed: &Committed,
    ) -> Result<()> {
        let modification = Modification::Insert {
            store,
            list_path: list_path.clone(),
            arg,
            node,
            position: position.clone(),
        };
        self.record(modification, committed)
    }

    fn begin_transaction<S>(&mut self, transaction: S) -> Result<()>
    where
        S: Into<String> + AsRef<str>,
    {
        let live = &self.live;
        self.pending
            .entry(transaction.into())
            .or_insert_with(|| PendingTransaction::new(live));
        Ok(())
    }

    fn commit_transaction<S>(&mut self, transaction: S) -> Result<HashSet<TreePath>>
    where
        S: Into<String> + AsRef<str>,
    {
        // Remove anything pending for this transaction
        let pending = match self.pending.remove(transaction.as_ref()) {
            Some(pending) => pending,
            None => return Ok(HashSet::new()),
        };

        if let Some(path) = pending.conflict(&self.live) {
            return error::ConflictSnafu {
                tx: transaction.as_ref(),
                path: path.to_string(),
            }
            .fail();
        }

        // Replay onto a copy so live data only changes if everything applies
        let mut updated = self.live.clone();
        for modification in &pending.log {
            trace!("Replaying {:?}", modification);
            updated.apply(modification).context(error::ReplaySnafu {
                tx: transaction.as_ref(),
            })?;
        }
        self.live = updated;

        let changed = pending.changed_paths();
        debug!(
            "Committed transaction '{}' with {} changes",
            transaction.as_ref(),
            pending.log.len()
        );
        Ok(changed)
    }

    fn delete_transaction<S>(&mut self, transaction: S) -> Result<HashSet<TreePath>>
    where
        S: Into<String> + AsRef<str>,
    {
        // Remove anything pending for this transaction
        if let Some(pending) = self.pending.remove(transaction.as_ref()) {
            debug!("Discarded transaction '{}'", transaction.as_ref());
            // Return the old pending paths
            Ok(pending.changed_paths())
        } else {
            Ok(HashSet::new())
        }
    }

    fn list_transactions(&self) -> Result<HashSet<String>> {
        Ok(self.pending.keys().cloned().collect())
    }
}

#[cfg(test)]
mod test {
    use super::super::{Committed, DataNode, DataStore, LogicalStore, PathArg, QName, TreePath};
    use super::super::{Error, InsertPosition};
    use super::MemoryDataStore;
    use maplit::hashset;
    use serde_json::json;

    const CONFIG: LogicalStore = LogicalStore::Configuration;

    fn qn(name: &str) -> QName {
        QName::new("example-jukebox", name).unwrap()
    }

    fn path(names: &[&str]) -> TreePath {
        TreePath::from_steps(names.iter().map(|n| PathArg::node(qn(n))).collect())
    }

    #[test]
    fn put_read_delete() {
        let mut m = MemoryDataStore::new();
        let gap = path(&["jukebox", "player", "gap"]);
        m.put(CONFIG, &gap, DataNode::leaf(json!(0.5)), &Committed::Live)
            .unwrap();
        assert_eq!(
            m.read(CONFIG, &gap, &Committed::Live).unwrap(),
            Some(DataNode::leaf(json!(0.5)))
        );

        m.delete(CONFIG, &gap, &Committed::Live).unwrap();
        assert_eq!(m.read(CONFIG, &gap, &Committed::Live).unwrap(), None);
        // Deleting again is fine
        m.delete(CONFIG, &gap, &Committed::Live).unwrap();
    }

    #[test]
    fn root_read_is_whole_tree() {
        let m = MemoryDataStore::new();
        assert_eq!(
            m.read(CONFIG, &TreePath::root(), &Committed::Live).unwrap(),
            Some(DataNode::empty_container())
        );
    }

    #[test]
    fn commit() {
        let mut m = MemoryDataStore::new();
        let gap = path(&["jukebox", "player", "gap"]);
        let tx = "test transaction";
        let pending = Committed::Pending { tx: tx.into() };
        m.put(CONFIG, &gap, DataNode::leaf(json!(1)), &pending)
            .unwrap();

        assert!(m.exists(CONFIG, &gap, &pending).unwrap());
        assert!(!m.exists(CONFIG, &gap, &Committed::Live).unwrap());
        assert_eq!(m.commit_transaction(tx).unwrap(), hashset!(gap.clone()));
        assert!(m.exists(CONFIG, &gap, &Committed::Live).unwrap());
        assert!(m.list_transactions().unwrap().is_empty());
    }

    #[test]
    fn commit_replays_onto_newer_live_data() {
        let mut m = MemoryDataStore::new();
        let gap = path(&["jukebox", "player", "gap"]);
        let volume = path(&["jukebox", "player", "volume"]);
        let tx = "test transaction";
        m.begin_transaction(tx).unwrap();
        m.put(
            CONFIG,
            &gap,
            DataNode::leaf(json!(1)),
            &Committed::Pending { tx: tx.into() },
        )
        .unwrap();

        // Someone else commits after our snapshot was taken
        m.put(CONFIG, &volume, DataNode::leaf(json!(3)), &Committed::Live)
            .unwrap();

        m.commit_transaction(tx).unwrap();
        assert!(m.exists(CONFIG, &gap, &Committed::Live).unwrap());
        assert!(m.exists(CONFIG, &volume, &Committed::Live).unwrap());
    }

    #[test]
    fn snapshot_isolation() {
        let mut m = MemoryDataStore::new();
        let gap = path(&["jukebox", "player", "gap"]);
        let tx = "reader";
        let pending = Committed::Pending { tx: tx.into() };
        m.begin_transaction(tx).unwrap();

        m.put(CONFIG, &gap, DataNode::leaf(json!(1)), &Committed::Live)
            .unwrap();
        assert!(!m.exists(CONFIG, &gap, &pending).unwrap());
        assert!(m.exists(CONFIG, &gap, &Committed::Live).unwrap());
    }

    #[test]
    fn failed_change_is_not_logged() {
        let mut m = MemoryDataStore::new();
        let gap = path(&["jukebox", "player", "gap"]);
        let tx = "test transaction";
        let pending = Committed::Pending { tx: tx.into() };
        m.put(CONFIG, &gap, DataNode::leaf(json!(1)), &pending)
            .unwrap();
        m.put(
            CONFIG,
            &gap.child(PathArg::node(qn("under-leaf"))),
            DataNode::leaf(json!(1)),
            &pending,
        )
        .unwrap_err();
        assert_eq!(m.commit_transaction(tx).unwrap(), hashset!(gap));
    }

    #[test]
    fn failed_replay_leaves_live_untouched() {
        let mut m = MemoryDataStore::new();
        let deep = path(&["jukebox", "player", "gap", "deeper"]);
        let tx = "test transaction";
        let pending = Committed::Pending { tx: tx.into() };
        m.put(CONFIG, &deep, DataNode::leaf(json!(1)), &pending)
            .unwrap();

        // A concurrent commit turns 'gap' into a leaf, so our replay can't put below it
        m.put(
            CONFIG,
            &path(&["jukebox", "player", "gap"]),
            DataNode::leaf(json!(2)),
            &Committed::Live,
        )
        .unwrap();
        let before = m.read(CONFIG, &TreePath::root(), &Committed::Live).unwrap();

        m.commit_transaction(tx).unwrap_err();
        assert_eq!(
            m.read(CONFIG, &TreePath::root(), &Committed::Live).unwrap(),
            before
        );
    }

    #[test]
    fn concurrent_change_conflicts() {
        let mut m = MemoryDataStore::new();
        let gap = path(&["jukebox", "player", "gap"]);
        let first = Committed::Pending {
            tx: "first".into(),
        };
        let second = Committed::Pending {
            tx: "second".into(),
        };
        m.begin_transaction("first").unwrap();
        m.begin_transaction("second").unwrap();

        // Both started before either wrote, so both see 'gap' as absent
        m.put(CONFIG, &gap, DataNode::leaf(json!(1)), &first)
            .unwrap();
        assert!(!m.exists(CONFIG, &gap, &second).unwrap());
        m.put(CONFIG, &gap, DataNode::leaf(json!(2)), &second)
            .unwrap();

        m.commit_transaction("first").unwrap();
        match m.commit_transaction("second") {
            Err(Error::Conflict { path, .. }) => assert_eq!(path, gap.to_string()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            m.read(CONFIG, &gap, &Committed::Live).unwrap(),
            Some(DataNode::leaf(json!(1)))
        );
        assert!(m.list_transactions().unwrap().is_empty());
    }

    #[test]
    fn delete_transaction() {
        let mut m = MemoryDataStore::new();
        let gap = path(&["jukebox", "player", "gap"]);
        let tx = "test transaction";
        let pending = Committed::Pending { tx: tx.into() };
        m.put(CONFIG, &gap, DataNode::leaf(json!(1)), &pending)
            .unwrap();

        // Set something in a different transaction to ensure it doesn't get deleted
        let volume = path(&["jukebox", "player", "volume"]);
        let tx2 = "test transaction 2";
        let pending2 = Committed::Pending { tx: tx2.into() };
        m.put(CONFIG, &volume, DataNode::leaf(json!(2)), &pending2)
            .unwrap();

        assert_eq!(m.delete_transaction(tx).unwrap(), hashset!(gap.clone()));
        assert!(!m.exists(CONFIG, &gap, &pending).unwrap());
        assert!(!m.exists(CONFIG, &gap, &Committed::Live).unwrap());

        // Assure other transactions were not deleted
        assert!(m.exists(CONFIG, &volume, &pending2).unwrap());
        assert_eq!(m.list_transactions().unwrap(), hashset!(tx2.to_string()));
    }

    #[test]
    fn ordered_insert_in_transaction() {
        let mut m = MemoryDataStore::new();
        let list = path(&["jukebox", "playlist"]);
        let entry = |name: &str| PathArg::entry(qn("playlist"), vec![(qn("name"), name.into())]);
        let tx = "test transaction";
        let pending = Committed::Pending { tx: tx.into() };
        for (name, position) in &[
            ("B", InsertPosition::Last),
            ("A", InsertPosition::First),
            ("C", InsertPosition::After(entry("B"))),
        ] {
            m.insert(
                CONFIG,
                &list,
                entry(*name),
                DataNode::empty_container(),
                position,
                &pending,
            )
            .unwrap();
        }
        m.commit_transaction(tx).unwrap();

        let live = m.read(CONFIG, &list, &Committed::Live).unwrap().unwrap();
        let order: Vec<_> = live.children().unwrap().keys().cloned().collect();
        assert_eq!(order, vec![entry("A"), entry("B"), entry("C")]);
    }

    #[test]
    fn failed_insert_keeps_pending_order() {
        let mut m = MemoryDataStore::new();
        let list = path(&["jukebox", "playlist"]);
        let entry = |name: &str| PathArg::entry(qn("playlist"), vec![(qn("name"), name.into())]);
        let pending = Committed::Pending { tx: "tx".into() };
        for name in &["A", "B"] {
            m.insert(
                CONFIG,
                &list,
                entry(*name),
                DataNode::empty_container(),
                &InsertPosition::Last,
                &pending,
            )
            .unwrap();
        }

        m.insert(
            CONFIG,
            &list,
            entry("A"),
            DataNode::empty_container(),
            &InsertPosition::Before(entry("missing")),
            &pending,
        )
        .unwrap_err();

        let view = m.read(CONFIG, &list, &pending).unwrap().unwrap();
        let order: Vec<_> = view.children().unwrap().keys().cloned().collect();
        assert_eq!(order, vec![entry("A"), entry("B")]);
    }
}
