//! Paths into the data tree.
//!
//! A `TreePath` is the ordered list of steps from the root of a logical store down to a node.
//! Plain steps name a container, leaf or list by qualified name; a list entry is addressed by
//! the list's step followed by an entry step carrying the values of the list's key leaves.
//!
//! Examples, using the display form (module prefixes are only repeated when they change):
//! * `/example-jukebox:jukebox/player/gap`
//! * `/example-jukebox:jukebox/playlist/playlist[name='Foo']`

use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt;

use super::{error, Result};

/// Separates module name and node name in a qualified name.
pub const MODULE_SEPARATOR: char = ':';

/// Maximum identifier length; YANG doesn't set one, but nothing sane comes close.
const MAX_IDENTIFIER_LENGTH: usize = 255;

/// A node name qualified by the name of the module that defines it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    module: String,
    name: String,
}

impl QName {
    /// Creates a QName, checking that both parts are valid identifiers.
    pub fn new<S1, S2>(module: S1, name: S2) -> Result<Self>
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        let module = module.into();
        let name = name.into();
        Self::check_identifier(&module)?;
        Self::check_identifier(&name)?;
        Ok(Self { module, name })
    }

    /// Parses "module:name".
    pub fn parse<S: AsRef<str>>(qualified: S) -> Result<Self> {
        let qualified = qualified.as_ref();
        match qualified.split_once(MODULE_SEPARATOR) {
            Some((module, name)) => Self::new(module, name),
            None => error::InvalidNameSnafu {
                name: qualified,
                msg: "missing module prefix",
            }
            .fail(),
        }
    }

    /// Returns a QName with the same module as this one and the given name.
    pub fn sibling<S: Into<String>>(&self, name: S) -> Result<Self> {
        Self::new(self.module.clone(), name)
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Determines whether a character is acceptable after the first character of an identifier.
    fn valid_character(c: char) -> bool {
        matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.')
    }

    fn check_identifier(identifier: &str) -> Result<()> {
        ensure!(
            identifier.len() <= MAX_IDENTIFIER_LENGTH,
            error::InvalidNameSnafu {
                name: identifier,
                msg: format!("longer than {} characters", MAX_IDENTIFIER_LENGTH),
            }
        );

        let mut chars = identifier.chars();
        match chars.next() {
            None => {
                return error::InvalidNameSnafu {
                    name: identifier,
                    msg: "cannot be empty",
                }
                .fail()
            }
            Some(first) => ensure!(
                first.is_ascii_alphabetic() || first == '_',
                error::InvalidNameSnafu {
                    name: identifier,
                    msg: format!("cannot start with '{}'", first),
                }
            ),
        }

        if let Some(bad) = chars.find(|c| !Self::valid_character(*c)) {
            return error::InvalidNameSnafu {
                name: identifier,
                msg: format!("invalid character '{}'", bad),
            }
            .fail();
        }

        Ok(())
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.module, MODULE_SEPARATOR, self.name)
    }
}

/// One step of a TreePath.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathArg {
    /// A container, leaf, leaf-list or list node.
    Node(QName),
    /// A single list entry; keys are in the order the list declares them.
    Entry {
        qname: QName,
        keys: Vec<(QName, String)>,
    },
}

impl PathArg {
    pub fn node(qname: QName) -> Self {
        PathArg::Node(qname)
    }

    pub fn entry(qname: QName, keys: Vec<(QName, String)>) -> Self {
        PathArg::Entry { qname, keys }
    }

    pub fn qname(&self) -> &QName {
        match self {
            PathArg::Node(qname) => qname,
            PathArg::Entry { qname, .. } => qname,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, PathArg::Entry { .. })
    }

    /// Key values of an entry step, empty for plain steps.
    pub fn keys(&self) -> &[(QName, String)] {
        match self {
            PathArg::Node(_) => &[],
            PathArg::Entry { keys, .. } => keys,
        }
    }

    /// Writes the step, including the module prefix only if it differs from `parent_module`.
    fn fmt_relative(&self, f: &mut fmt::Formatter<'_>, parent_module: Option<&str>) -> fmt::Result {
        let qname = self.qname();
        if parent_module == Some(qname.module()) {
            write!(f, "{}", qname.name())?;
        } else {
            write!(f, "{}", qname)?;
        }
        for (key, value) in self.keys() {
            write!(f, "[{}='{}']", key.name(), value)?;
        }
        Ok(())
    }
}

impl fmt::Display for PathArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_relative(f, None)
    }
}

/// A path from the root of a logical store to a node.  The empty path is the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreePath {
    steps: Vec<PathArg>,
}

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<PathArg>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PathArg] {
        &self.steps
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&PathArg> {
        self.steps.last()
    }

    /// Returns the path of the parent node, or None for the root.
    pub fn parent(&self) -> Option<TreePath> {
        self.steps
            .split_last()
            .map(|(_, rest)| Self::from_steps(rest.to_vec()))
    }

    /// Returns a new path with the given step added.
    pub fn child(&self, arg: PathArg) -> TreePath {
        let mut steps = self.steps.clone();
        steps.push(arg);
        Self { steps }
    }

}

impl From<Vec<PathArg>> for TreePath {
    fn from(steps: Vec<PathArg>) -> Self {
        Self::from_steps(steps)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "/");
        }
        let mut parent_module = None;
        for step in &self.steps {
            write!(f, "/")?;
            step.fmt_relative(f, parent_module)?;
            parent_module = Some(step.qname().module());
        }
        Ok(())
    }
}
