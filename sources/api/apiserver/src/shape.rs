//! Shaping of read results: default handling, field selection and depth limits.
//!
//! They're applied in that order, after the merge engine, to the tree read at the target.  The
//! target's schema node drives all three; for a list entry that's the list's node.

use datastore::{DataNode, PathArg, QName};
use indexmap::IndexMap;
use snafu::{ensure, OptionExt};
use std::sync::Arc;

use crate::error::{self, Result};
use crate::merge::ContentParam;
use crate::schema::{NodeKind, SchemaNode};

/// How leaves with schema defaults are reported, from the with-defaults parameter.  The two
/// report-all variants are the same mode; the tagged one only changes encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum WithDefaults {
    /// Add defaulted leaves missing from present containers.
    #[default]
    ReportAll,
    /// Leave out leaves whose value equals their default.
    Trim,
    /// Report data as stored.
    Explicit,
}

/// Applies the with-defaults mode to a tree.  Defaults are only added for the kind of data the
/// content parameter asked for.
pub fn apply_defaults(
    node: &mut DataNode,
    schema: &SchemaNode,
    mode: WithDefaults,
    content: ContentParam,
) {
    match mode {
        WithDefaults::Explicit => {}
        WithDefaults::ReportAll => add_defaults(node, schema, content),
        WithDefaults::Trim => trim_defaults(node, schema),
    }
}

fn add_defaults(node: &mut DataNode, schema: &SchemaNode, content: ContentParam) {
    match node {
        DataNode::Leaf(_) => {}
        DataNode::List(entries) => {
            for entry in entries.values_mut() {
                add_defaults(entry, schema, content);
            }
        }
        DataNode::Container(children) => {
            for child_schema in schema.children() {
                let qname = match child_schema.qname() {
                    Some(qname) => qname.clone(),
                    None => continue,
                };
                let arg = PathArg::node(qname);
                match children.get_mut(&arg) {
                    Some(child) => add_defaults(child, child_schema, content),
                    None => {
                        let wanted = match content {
                            ContentParam::All => true,
                            ContentParam::Config => child_schema.is_config(),
                            ContentParam::NonConfig => !child_schema.is_config(),
                        };
                        if let Some(default) = child_schema.default_value().filter(|_| wanted) {
                            children.insert(arg, DataNode::Leaf(default.clone()));
                        }
                    }
                }
            }
        }
    }
}

fn trim_defaults(node: &mut DataNode, schema: &SchemaNode) {
    match node {
        DataNode::Leaf(_) => {}
        DataNode::List(entries) => {
            for entry in entries.values_mut() {
                trim_defaults(entry, schema);
            }
        }
        DataNode::Container(children) => {
            children.retain(|arg, child| match schema.child(arg.qname()) {
                Some(child_schema) => {
                    trim_defaults(child, child_schema);
                    !is_default(child, child_schema)
                }
                None => true,
            });
        }
    }
}

/// Whether a node is a leaf holding its schema default.
pub fn is_default(node: &DataNode, schema: &SchemaNode) -> bool {
    match (node.leaf_value(), schema.default_value()) {
        (Some(value), Some(default)) => value == default,
        _ => false,
    }
}

/// A parsed fields expression: which children to keep below a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelector {
    /// Keep everything below this node.
    pub all: bool,
    pub children: IndexMap<QName, FieldSelector>,
}

impl FieldSelector {
    /// Parses a fields expression (RFC 8040 section 4.8.3) against the target's schema node.
    /// Syntax problems are `InvalidValue`, names the schema doesn't have are `BadElement`.
    pub fn parse(expression: &str, schema: &Arc<SchemaNode>) -> Result<Self> {
        let mut parser = FieldsParser {
            input: expression,
            pos: 0,
        };
        let mut root = FieldSelector::default();
        parser.list(schema, &mut root)?;
        ensure!(
            parser.pos == expression.len(),
            error::InvalidValueSnafu {
                name: "fields",
                value: expression,
                msg: format!("unexpected '{}'", &expression[parser.pos..]),
            }
        );
        Ok(root)
    }

    /// Removes everything not selected.  List entries keep their key leaves.
    pub fn apply(&self, node: &mut DataNode, schema: &SchemaNode) {
        if self.all {
            return;
        }
        match node {
            DataNode::Leaf(_) => {}
            DataNode::List(entries) => {
                for entry in entries.values_mut() {
                    self.apply(entry, schema);
                }
            }
            DataNode::Container(children) => {
                let keys = entry_keys(schema);
                children.retain(|arg, child| {
                    if keys.contains(arg.qname()) {
                        return true;
                    }
                    match (self.children.get(arg.qname()), schema.child(arg.qname())) {
                        (Some(selector), Some(child_schema)) => {
                            selector.apply(child, child_schema);
                            true
                        }
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
                });
            }
        }
    }
}

fn entry_keys(schema: &SchemaNode) -> &[QName] {
    if schema.kind() == NodeKind::List {
        schema.keys()
    } else {
        &[]
    }
}

struct FieldsParser<'a> {
    input: &'a str,
    pos: usize,
}

impl FieldsParser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn invalid<T>(&self, msg: &str) -> Result<T> {
        error::InvalidValueSnafu {
            name: "fields",
            value: self.input,
            msg: format!("{} at position {}", msg, self.pos),
        }
        .fail()
    }

    /// fields-expr = item *(";" item)
    fn list(&mut self, schema: &Arc<SchemaNode>, into: &mut FieldSelector) -> Result<()> {
        loop {
            self.item(schema, into)?;
            match self.peek() {
                Some(';') => self.pos += 1,
                _ => return Ok(()),
            }
        }
    }

    /// item = path ["(" fields-expr ")"], path = identifier *("/" identifier)
    fn item(&mut self, schema: &Arc<SchemaNode>, into: &mut FieldSelector) -> Result<()> {
        let mut node = Arc::clone(schema);
        let mut selector = into;
        loop {
            let name = self.identifier()?;
            let module = node.qname().map(|q| q.module().to_string());
            let child = node
                .find_child(&name, module.as_deref())
                .cloned()
                .context(error::BadElementSnafu {
                    msg: format!("field '{}' is not a child of the target", name),
                })?;
            let qname = child.qname().cloned().context(error::InvalidSchemaSnafu {
                msg: "child node without name",
            })?;
            selector = selector.children.entry(qname).or_default();
            node = child;

            match self.peek() {
                Some('/') => self.pos += 1,
                Some('(') => {
                    self.pos += 1;
                    self.list(&node, selector)?;
                    if self.peek() != Some(')') {
                        return self.invalid("expected ')'");
                    }
                    self.pos += 1;
                    return Ok(());
                }
                _ => {
                    selector.all = true;
                    return Ok(());
                }
            }
        }
    }

    fn identifier(&mut self) -> Result<String> {
        let rest = &self.input[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
            .unwrap_or(rest.len());
        if len == 0 {
            return self.invalid("expected a node name");
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }
}

/// Prunes a tree to the given number of levels, the target itself being level 1.  A list and its
/// entries are one level, and entries keep their key leaves.  For the whole datastore each
/// top-level node is level 1.
pub fn limit_depth(node: &mut DataNode, schema: &SchemaNode, depth: u32, is_root: bool) {
    if is_root {
        if let DataNode::Container(children) = node {
            for (arg, child) in children.iter_mut() {
                if let Some(child_schema) = schema.child(arg.qname()) {
                    prune(child, child_schema, depth);
                }
            }
        }
    } else {
        prune(node, schema, depth);
    }
}

fn prune(node: &mut DataNode, schema: &SchemaNode, levels: u32) {
    match node {
        DataNode::Leaf(_) => {}
        DataNode::List(entries) => {
            for entry in entries.values_mut() {
                prune(entry, schema, levels);
            }
        }
        DataNode::Container(children) => {
            if levels <= 1 {
                let keys = entry_keys(schema);
                children.retain(|arg, _| keys.contains(arg.qname()));
                return;
            }
            for (arg, child) in children.iter_mut() {
                if let Some(child_schema) = schema.child(arg.qname()) {
                    prune(child, child_schema, levels - 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{apply_defaults, limit_depth, FieldSelector, WithDefaults};
    use crate::error::Error;
    use crate::merge::ContentParam;
    use crate::schema::test::{jukebox, qn};
    use crate::schema::SchemaNode;
    use datastore::{DataNode, PathArg};
    use serde_json::json;
    use std::sync::Arc;

    fn jukebox_schema() -> Arc<SchemaNode> {
        Arc::clone(jukebox().root().child(&qn("jukebox")).unwrap())
    }

    fn container(children: Vec<(&str, DataNode)>) -> DataNode {
        DataNode::Container(
            children
                .into_iter()
                .map(|(name, node)| (PathArg::node(qn(name)), node))
                .collect(),
        )
    }

    fn playlist(name: &str, description: &str) -> (PathArg, DataNode) {
        (
            PathArg::entry(qn("playlist"), vec![(qn("name"), name.to_string())]),
            container(vec![
                ("name", DataNode::leaf(name)),
                ("description", DataNode::leaf(description)),
            ]),
        )
    }

    fn sample() -> DataNode {
        container(vec![
            (
                "player",
                container(vec![
                    ("gap", DataNode::leaf(json!(0.5))),
                    ("shuffle", DataNode::leaf(true)),
                ]),
            ),
            (
                "playlist",
                DataNode::List(
                    vec![playlist("a", "first"), playlist("b", "second")]
                        .into_iter()
                        .collect(),
                ),
            ),
        ])
    }

    fn player(tree: &DataNode) -> &DataNode {
        tree.child(&PathArg::node(qn("player"))).unwrap()
    }

    #[test]
    fn report_all_adds_defaults() {
        let schema = jukebox_schema();
        let mut tree = sample();
        apply_defaults(&mut tree, &schema, WithDefaults::ReportAll, ContentParam::All);
        assert_eq!(
            player(&tree).child(&PathArg::node(qn("volume"))),
            Some(&DataNode::leaf(5))
        );
        // Absent containers aren't created for their defaults
        assert!(tree.child(&PathArg::node(qn("library"))).is_none());
    }

    #[test]
    fn defaults_follow_content() {
        let schema = jukebox_schema();
        let with_state = || {
            container(vec![(
                "player",
                container(vec![(
                    "state",
                    container(vec![("status", DataNode::leaf("idle"))]),
                )]),
            )])
        };
        let state = |tree: &DataNode| {
            player(tree)
                .child(&PathArg::node(qn("state")))
                .unwrap()
                .clone()
        };

        let mut config = with_state();
        apply_defaults(&mut config, &schema, WithDefaults::ReportAll, ContentParam::Config);
        assert!(player(&config).child(&PathArg::node(qn("volume"))).is_some());
        assert!(state(&config).child(&PathArg::node(qn("elapsed"))).is_none());

        let mut nonconfig = with_state();
        apply_defaults(
            &mut nonconfig,
            &schema,
            WithDefaults::ReportAll,
            ContentParam::NonConfig,
        );
        assert!(player(&nonconfig).child(&PathArg::node(qn("volume"))).is_none());
        assert!(player(&nonconfig).child(&PathArg::node(qn("gap"))).is_none());
        assert_eq!(
            state(&nonconfig).child(&PathArg::node(qn("elapsed"))),
            Some(&DataNode::leaf(0))
        );

        let mut all = with_state();
        apply_defaults(&mut all, &schema, WithDefaults::ReportAll, ContentParam::All);
        assert!(player(&all).child(&PathArg::node(qn("volume"))).is_some());
        assert!(state(&all).child(&PathArg::node(qn("elapsed"))).is_some());
    }

    #[test]
    fn trim_drops_defaults() {
        let schema = jukebox_schema();
        let mut tree = sample();
        apply_defaults(&mut tree, &schema, WithDefaults::Trim, ContentParam::All);
        assert!(player(&tree).child(&PathArg::node(qn("gap"))).is_none());
        assert!(player(&tree).child(&PathArg::node(qn("shuffle"))).is_some());

        let mut explicit = sample();
        apply_defaults(
            &mut explicit,
            &schema,
            WithDefaults::Explicit,
            ContentParam::All,
        );
        assert_eq!(explicit, sample());
    }

    #[test]
    fn fields_selection() {
        let schema = jukebox_schema();
        let selector = FieldSelector::parse("player/gap;playlist(description)", &schema).unwrap();
        let mut tree = sample();
        selector.apply(&mut tree, &schema);

        assert_eq!(
            player(&tree),
            &container(vec![("gap", DataNode::leaf(json!(0.5)))])
        );
        let playlists = tree.child(&PathArg::node(qn("playlist"))).unwrap();
        for entry in playlists.children().unwrap().values() {
            // Keys stay so entries can be told apart
            assert_eq!(entry.children().unwrap().len(), 2);
        }
    }

    #[test]
    fn fields_errors() {
        let schema = jukebox_schema();
        for (expression, syntax) in &[
            ("player(gap", true),
            ("player)", true),
            ("player;;gap", true),
            ("", true),
            ("drums", false),
            ("player/tempo", false),
        ] {
            match (FieldSelector::parse(expression, &schema), *syntax) {
                (Err(Error::InvalidValue { .. }), true) => {}
                (Err(Error::BadElement { .. }), false) => {}
                (other, _) => panic!("{}: unexpected {:?}", expression, other),
            }
        }
    }

    #[test]
    fn depth_levels() {
        let schema = jukebox_schema();

        let mut one = sample();
        limit_depth(&mut one, &schema, 1, false);
        assert_eq!(one, DataNode::empty_container());

        let mut two = sample();
        limit_depth(&mut two, &schema, 2, false);
        assert_eq!(player(&two), &DataNode::empty_container());
        let playlists = two.child(&PathArg::node(qn("playlist"))).unwrap();
        for entry in playlists.children().unwrap().values() {
            assert_eq!(entry.children().unwrap().len(), 1);
        }

        let mut three = sample();
        limit_depth(&mut three, &schema, 3, false);
        assert_eq!(three, sample());
    }

    #[test]
    fn depth_from_root() {
        let context = jukebox();
        let mut root =
            DataNode::empty_container().with_child(PathArg::node(qn("jukebox")), sample());
        limit_depth(&mut root, context.root(), 1, true);
        assert_eq!(
            root.child(&PathArg::node(qn("jukebox"))),
            Some(&DataNode::empty_container())
        );
    }
}
