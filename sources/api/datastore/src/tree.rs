//! The in-memory shape of data: containers, lists and leaves.
//!
//! Composite nodes hold their children in insertion order, keyed by the `PathArg` that addresses
//! them, so user-ordered lists keep the order they were written in.  Leaves hold JSON scalars
//! (or arrays, for leaf-lists); we don't interpret their types here.

use indexmap::IndexMap;
use log::trace;
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt};

use super::path::{PathArg, TreePath};
use super::{error, Result, Value};

/// Children of a composite node, in insertion order.
pub type Children = IndexMap<PathArg, DataNode>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataNode {
    /// A container or a list entry; children are addressed by `PathArg::Node`.
    Container(#[serde(with = "indexmap::map::serde_seq")] Children),
    /// A list; children are addressed by `PathArg::Entry`.
    List(#[serde(with = "indexmap::map::serde_seq")] Children),
    Leaf(Value),
}

/// Where to place an entry in a user-ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsertPosition {
    First,
    Last,
    Before(PathArg),
    After(PathArg),
}

impl DataNode {
    pub fn empty_container() -> Self {
        DataNode::Container(Children::new())
    }

    pub fn empty_list() -> Self {
        DataNode::List(Children::new())
    }

    pub fn leaf<V: Into<Value>>(value: V) -> Self {
        DataNode::Leaf(value.into())
    }

    /// Builder-style helper that adds or replaces a child of a composite node.  Leaves are
    /// returned unchanged.
    pub fn with_child(mut self, arg: PathArg, child: DataNode) -> Self {
        if let Some(children) = self.children_mut() {
            children.insert(arg, child);
        }
        self
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, DataNode::Leaf(_))
    }

    pub fn children(&self) -> Option<&Children> {
        match self {
            DataNode::Container(children) | DataNode::List(children) => Some(children),
            DataNode::Leaf(_) => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Children> {
        match self {
            DataNode::Container(children) | DataNode::List(children) => Some(children),
            DataNode::Leaf(_) => None,
        }
    }

    pub fn child(&self, arg: &PathArg) -> Option<&DataNode> {
        self.children().and_then(|children| children.get(arg))
    }

    pub fn leaf_value(&self) -> Option<&Value> {
        match self {
            DataNode::Leaf(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the node at the given path, relative to this node.
    pub fn get(&self, path: &TreePath) -> Option<&DataNode> {
        let mut current = self;
        for arg in path.steps() {
            current = current.child(arg)?;
        }
        Some(current)
    }

    fn get_mut(&mut self, steps: &[PathArg]) -> Option<&mut DataNode> {
        let mut current = self;
        for arg in steps {
            current = current.children_mut()?.get_mut(arg)?;
        }
        Some(current)
    }

    /// Makes sure a step can live under this node: entries only go in lists, and lists only hold
    /// entries.
    fn check_step(&self, arg: &PathArg, at: &[PathArg]) -> Result<()> {
        let fits = match self {
            DataNode::Container(_) => !arg.is_entry(),
            DataNode::List(_) => arg.is_entry(),
            DataNode::Leaf(_) => {
                return error::NotAContainerSnafu {
                    path: TreePath::from_steps(at.to_vec()).to_string(),
                }
                .fail()
            }
        };
        if fits {
            Ok(())
        } else {
            error::KindMismatchSnafu {
                step: arg.to_string(),
                path: TreePath::from_steps(at.to_vec()).to_string(),
            }
            .fail()
        }
    }

    /// Builds the node we create when a write needs an ancestor that doesn't exist yet.  Entries
    /// get their key leaves so they're complete; a plain step followed by an entry step is a list.
    fn ancestor_for(arg: &PathArg, next: Option<&PathArg>) -> DataNode {
        match arg {
            PathArg::Entry { keys, .. } => {
                let mut children = Children::new();
                for (key, value) in keys {
                    children.insert(
                        PathArg::Node(key.clone()),
                        DataNode::Leaf(Value::String(value.clone())),
                    );
                }
                DataNode::Container(children)
            }
            PathArg::Node(_) => match next {
                Some(next) if next.is_entry() => DataNode::empty_list(),
                _ => DataNode::empty_container(),
            },
        }
    }

    /// Walks the given steps, creating any missing nodes along the way, and returns the last one.
    /// `next` is the step the caller is about to add below the result, which decides whether a
    /// created node is a list or a container.
    fn ensure_path(&mut self, steps: &[PathArg], next: Option<&PathArg>) -> Result<&mut DataNode> {
        let mut current = self;
        for (i, arg) in steps.iter().enumerate() {
            current.check_step(arg, &steps[..i])?;
            let following = steps.get(i + 1).or(next);
            let children = current.children_mut().context(error::InternalSnafu {
                msg: "checked composite has no children",
            })?;
            current = children
                .entry(arg.clone())
                .or_insert_with(|| Self::ancestor_for(arg, following));
        }
        Ok(current)
    }

    /// Stores the given node at the path, replacing anything there.  Missing ancestors are
    /// created.  Putting at the root replaces the whole tree.
    pub fn put(&mut self, path: &TreePath, node: DataNode) -> Result<()> {
        trace!("Putting node at {}", path);
        match path.steps().split_last() {
            None => {
                *self = node;
                Ok(())
            }
            Some((last, parent)) => {
                let parent_node = self.ensure_path(parent, Some(last))?;
                parent_node.check_step(last, parent)?;
                if let Some(children) = parent_node.children_mut() {
                    children.insert(last.clone(), node);
                }
                Ok(())
            }
        }
    }

    /// Merges the given node into whatever is at the path; see `merge_from`.
    pub fn merge(&mut self, path: &TreePath, node: DataNode) -> Result<()> {
        trace!("Merging node at {}", path);
        match path.steps().split_last() {
            None => {
                self.merge_from(node);
                Ok(())
            }
            Some((last, parent)) => {
                let parent_node = self.ensure_path(parent, Some(last))?;
                parent_node.check_step(last, parent)?;
                if let Some(children) = parent_node.children_mut() {
                    match children.get_mut(last) {
                        Some(existing) => existing.merge_from(node),
                        None => {
                            children.insert(last.clone(), node);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Structural merge.  Children present on only one side are kept; children on both sides
    /// merge recursively when both are composites of the same kind.  Otherwise, including for
    /// leaves, the incoming node wins.
    pub fn merge_from(&mut self, other: DataNode) {
        match (self, other) {
            (DataNode::Container(ours), DataNode::Container(theirs))
            | (DataNode::List(ours), DataNode::List(theirs)) => {
                for (arg, node) in theirs {
                    match ours.get_mut(&arg) {
                        Some(existing) => existing.merge_from(node),
                        None => {
                            ours.insert(arg, node);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }

    /// Removes the node at the path, returning it if it was there.  A list left without entries
    /// is removed as well.  Removing the root empties the tree.
    pub fn remove(&mut self, path: &TreePath) -> Result<Option<DataNode>> {
        trace!("Removing node at {}", path);
        let (last, parent) = match path.steps().split_last() {
            None => return Ok(Some(std::mem::replace(self, DataNode::empty_container()))),
            Some(split) => split,
        };

        let removed = match self.get_mut(parent).and_then(DataNode::children_mut) {
            Some(children) => children.shift_remove(last),
            None => return Ok(None),
        };

        if last.is_entry() {
            if let Some((list_arg, grandparent)) = parent.split_last() {
                let list_is_empty = self
                    .get_mut(parent)
                    .and_then(|list| list.children().map(|entries| entries.is_empty()))
                    .unwrap_or(false);
                if list_is_empty {
                    if let Some(children) =
                        self.get_mut(grandparent).and_then(DataNode::children_mut)
                    {
                        children.shift_remove(list_arg);
                    }
                }
            }
        }

        Ok(removed)
    }

    /// Places an entry in the list at `list_path` according to `position`, replacing any entry
    /// with the same keys.  The list is created if needed.
    pub fn insert_entry(
        &mut self,
        list_path: &TreePath,
        arg: PathArg,
        entry: DataNode,
        position: &InsertPosition,
    ) -> Result<()> {
        trace!("Inserting {} into {} at {:?}", arg, list_path, position);
        // The point must exist before anything changes.
        let point = match position {
            InsertPosition::Before(point) | InsertPosition::After(point) => {
                let present = self
                    .get(list_path)
                    .and_then(|list| list.child(point))
                    .is_some();
                ensure!(
                    present,
                    error::PointNotFoundSnafu {
                        point: point.to_string(),
                        path: list_path.to_string(),
                    }
                );
                Some(point)
            }
            InsertPosition::First | InsertPosition::Last => None,
        };

        let list = self.ensure_path(list_path.steps(), Some(&arg))?;
        list.check_step(&arg, list_path.steps())?;
        let entries = match list {
            DataNode::List(entries) => entries,
            _ => {
                return error::NotAListSnafu {
                    path: list_path.to_string(),
                }
                .fail()
            }
        };

        // An entry placed relative to itself keeps its position.
        if point == Some(&arg) {
            entries.insert(arg, entry);
            return Ok(());
        }

        entries.shift_remove(&arg);
        let index = match point {
            None if *position == InsertPosition::First => 0,
            None => entries.len(),
            Some(point) => {
                let found = entries
                    .get_index_of(point)
                    .context(error::PointNotFoundSnafu {
                        point: point.to_string(),
                        path: list_path.to_string(),
                    })?;
                match position {
                    InsertPosition::After(_) => found + 1,
                    _ => found,
                }
            }
        };
        entries.shift_insert(index, arg, entry);
        Ok(())
    }
}

impl Default for DataNode {
    fn default() -> Self {
        Self::empty_container()
    }
}

#[cfg(test)]
mod test {
    use super::{DataNode, InsertPosition};
    use crate::path::{PathArg, QName, TreePath};
    use serde_json::json;

    fn qn(name: &str) -> QName {
        QName::new("example-jukebox", name).unwrap()
    }

    fn node(name: &str) -> PathArg {
        PathArg::node(qn(name))
    }

    fn band(name: &str) -> PathArg {
        PathArg::entry(qn("playlist"), vec![(qn("name"), name.to_string())])
    }

    fn path(steps: &[PathArg]) -> TreePath {
        TreePath::from_steps(steps.to_vec())
    }

    fn playlist_path(name: &str) -> TreePath {
        path(&[node("jukebox"), node("playlist"), band(name)])
    }

    #[test]
    fn put_creates_ancestors() {
        let mut root = DataNode::empty_container();
        let gap = path(&[node("jukebox"), node("player"), node("gap")]);
        root.put(&gap, DataNode::leaf(json!(0.2))).unwrap();

        assert_eq!(root.get(&gap), Some(&DataNode::leaf(json!(0.2))));
        assert!(matches!(
            root.get(&path(&[node("jukebox"), node("player")])),
            Some(DataNode::Container(_))
        ));
    }

    #[test]
    fn put_entry_creates_list_and_keys() {
        let mut root = DataNode::empty_container();
        let description = playlist_path("Foo").child(node("description"));
        root.put(&description, DataNode::leaf("about Foo")).unwrap();

        assert!(matches!(
            root.get(&path(&[node("jukebox"), node("playlist")])),
            Some(DataNode::List(_))
        ));
        assert_eq!(
            root.get(&playlist_path("Foo").child(node("name"))),
            Some(&DataNode::leaf("Foo"))
        );
    }

    #[test]
    fn put_replaces() {
        let mut root = DataNode::empty_container();
        let player = path(&[node("jukebox"), node("player")]);
        root.put(
            &player.child(node("gap")),
            DataNode::leaf(json!(1)),
        )
        .unwrap();
        root.put(&player, DataNode::empty_container()).unwrap();
        assert_eq!(root.get(&player.child(node("gap"))), None);
    }

    #[test]
    fn put_under_leaf_fails() {
        let mut root = DataNode::empty_container();
        let gap = path(&[node("jukebox"), node("player"), node("gap")]);
        root.put(&gap, DataNode::leaf(json!(0.2))).unwrap();
        root.put(&gap.child(node("deeper")), DataNode::leaf(1))
            .unwrap_err();
    }

    #[test]
    fn entry_step_into_container_fails() {
        let mut root = DataNode::empty_container();
        root.put(&path(&[node("jukebox")]), DataNode::empty_container())
            .unwrap();
        root.put(&path(&[node("jukebox"), band("Foo")]), DataNode::empty_container())
            .unwrap_err();
    }

    #[test]
    fn merge_recurses_and_incoming_leaf_wins() {
        let mut ours = DataNode::empty_container()
            .with_child(node("a"), DataNode::leaf(1))
            .with_child(
                node("c"),
                DataNode::empty_container().with_child(node("x"), DataNode::leaf("old")),
            );
        let theirs = DataNode::empty_container()
            .with_child(node("b"), DataNode::leaf(2))
            .with_child(
                node("c"),
                DataNode::empty_container()
                    .with_child(node("x"), DataNode::leaf("new"))
                    .with_child(node("y"), DataNode::leaf(true)),
            );
        ours.merge_from(theirs);

        let children = ours.children().unwrap();
        assert_eq!(children.len(), 3);
        let c = ours.child(&node("c")).unwrap();
        assert_eq!(c.child(&node("x")), Some(&DataNode::leaf("new")));
        assert_eq!(c.child(&node("y")), Some(&DataNode::leaf(true)));
    }

    #[test]
    fn merge_at_path() {
        let mut root = DataNode::empty_container();
        let player = path(&[node("jukebox"), node("player")]);
        root.put(&player.child(node("gap")), DataNode::leaf(1))
            .unwrap();
        root.merge(
            &player,
            DataNode::empty_container().with_child(node("volume"), DataNode::leaf(5)),
        )
        .unwrap();
        assert_eq!(root.get(&player).unwrap().children().unwrap().len(), 2);
    }

    #[test]
    fn remove_last_entry_removes_list() {
        let mut root = DataNode::empty_container();
        root.put(&playlist_path("Foo"), DataNode::empty_container())
            .unwrap();
        root.put(&playlist_path("Bar"), DataNode::empty_container())
            .unwrap();
        let list = path(&[node("jukebox"), node("playlist")]);

        assert!(root.remove(&playlist_path("Foo")).unwrap().is_some());
        assert!(root.get(&list).is_some());
        assert!(root.remove(&playlist_path("Bar")).unwrap().is_some());
        assert!(root.get(&list).is_none());
        assert!(root.get(&path(&[node("jukebox")])).is_some());
    }

    #[test]
    fn remove_missing_is_none() {
        let mut root = DataNode::empty_container();
        assert_eq!(root.remove(&playlist_path("Foo")).unwrap(), None);
    }

    #[test]
    fn insert_positions() {
        let mut root = DataNode::empty_container();
        let list = path(&[node("jukebox"), node("playlist")]);
        let entry = DataNode::empty_container;

        root.insert_entry(&list, band("B"), entry(), &InsertPosition::Last)
            .unwrap();
        root.insert_entry(&list, band("A"), entry(), &InsertPosition::First)
            .unwrap();
        root.insert_entry(&list, band("D"), entry(), &InsertPosition::Last)
            .unwrap();
        root.insert_entry(
            &list,
            band("C"),
            entry(),
            &InsertPosition::After(band("B")),
        )
        .unwrap();
        root.insert_entry(
            &list,
            band("Z"),
            entry(),
            &InsertPosition::Before(band("A")),
        )
        .unwrap();

        let order: Vec<_> = root
            .get(&list)
            .unwrap()
            .children()
            .unwrap()
            .keys()
            .map(|arg| arg.keys()[0].1.clone())
            .collect();
        assert_eq!(order, vec!["Z", "A", "B", "C", "D"]);
    }

    #[test]
    fn insert_moves_existing_entry() {
        let mut root = DataNode::empty_container();
        let list = path(&[node("jukebox"), node("playlist")]);
        for name in &["A", "B", "C"] {
            root.insert_entry(
                &list,
                band(name),
                DataNode::empty_container(),
                &InsertPosition::Last,
            )
            .unwrap();
        }
        root.insert_entry(
            &list,
            band("C"),
            DataNode::empty_container(),
            &InsertPosition::First,
        )
        .unwrap();
        let first = root.get(&list).unwrap().children().unwrap().keys().next();
        assert_eq!(first, Some(&band("C")));
    }

    #[test]
    fn insert_missing_point_fails() {
        let mut root = DataNode::empty_container();
        let list = path(&[node("jukebox"), node("playlist")]);
        root.insert_entry(
            &list,
            band("A"),
            DataNode::empty_container(),
            &InsertPosition::Before(band("nope")),
        )
        .unwrap_err();
    }

    #[test]
    fn insert_relative_to_itself_keeps_position() {
        let mut root = DataNode::empty_container();
        let list = path(&[node("jukebox"), node("playlist")]);
        for name in &["A", "B", "C"] {
            root.insert_entry(
                &list,
                band(name),
                DataNode::empty_container(),
                &InsertPosition::Last,
            )
            .unwrap();
        }
        let updated = DataNode::empty_container().with_child(node("description"), DataNode::leaf("x"));
        root.insert_entry(
            &list,
            band("B"),
            updated.clone(),
            &InsertPosition::Before(band("B")),
        )
        .unwrap();
        root.insert_entry(
            &list,
            band("B"),
            updated.clone(),
            &InsertPosition::After(band("B")),
        )
        .unwrap();

        let entries = root.get(&list).unwrap().children().unwrap();
        let keys: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(keys, vec![band("A"), band("B"), band("C")]);
        assert_eq!(entries.get(&band("B")), Some(&updated));
    }

    #[test]
    fn missing_point_leaves_tree_unchanged() {
        let mut root = DataNode::empty_container();
        let list = path(&[node("jukebox"), node("playlist")]);
        for name in &["A", "B"] {
            root.insert_entry(
                &list,
                band(name),
                DataNode::empty_container(),
                &InsertPosition::Last,
            )
            .unwrap();
        }
        let before = root.clone();
        root.insert_entry(
            &list,
            band("A"),
            DataNode::empty_container(),
            &InsertPosition::After(band("nope")),
        )
        .unwrap_err();
        assert_eq!(root, before);

        // Nor are missing ancestors created.
        let other = path(&[node("jukebox"), node("queue")]);
        root.insert_entry(
            &other,
            band("A"),
            DataNode::empty_container(),
            &InsertPosition::Before(band("B")),
        )
        .unwrap_err();
        assert_eq!(root, before);
    }

    #[test]
    fn serde_keeps_child_order() {
        let tree = DataNode::empty_container()
            .with_child(node("z"), DataNode::leaf(1))
            .with_child(node("a"), DataNode::leaf(2));
        let json = serde_json::to_string(&tree).unwrap();
        let back: DataNode = serde_json::from_str(&json).unwrap();
        let keys: Vec<_> = back.children().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec![node("z"), node("a")]);
    }
}
