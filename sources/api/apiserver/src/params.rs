//! Query parameter checks.
//!
//! Parameters arrive as a multi-valued map so repeated parameters can be caught.  Each endpoint
//! accepts a fixed set of names; anything else is `UnknownAttribute`, and a recognized parameter
//! given more than once is `InvalidValue`.

use datastore::{InsertPosition, PathArg, TreePath};
use indexmap::IndexMap;
use snafu::{ensure, OptionExt};
use std::sync::Arc;

use crate::error::{self, Result};
use crate::merge::ContentParam;
use crate::resolver::{encode_path, ResourceContext, Resolver};
use crate::schema::NodeKind;
use crate::shape::{FieldSelector, WithDefaults};

/// Query parameters by name, each with every value given, in request order.
pub type QueryParams = IndexMap<String, Vec<String>>;

const READ_PARAMS: &[&str] = &["content", "depth", "fields", "with-defaults"];
const WRITE_PARAMS: &[&str] = &["insert", "point"];

const MAX_DEPTH: u32 = 65535;

/// Decodes a query string into a multi-valued map.
pub fn parse_query(query: &str) -> QueryParams {
    let mut params = QueryParams::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Rejects parameters other than the given ones.
pub fn check_allowed(params: &QueryParams, allowed: &[&str]) -> Result<()> {
    for name in params.keys() {
        ensure!(
            allowed.contains(&name.as_str()),
            error::UnknownAttributeSnafu { name }
        );
    }
    Ok(())
}

/// Returns the single value of a parameter, if it was given.
fn single<'a>(params: &'a QueryParams, name: &str) -> Result<Option<&'a str>> {
    match params.get(name).map(Vec::as_slice) {
        None | Some([]) => Ok(None),
        Some([value]) => Ok(Some(value.as_str())),
        Some(values) => error::InvalidValueSnafu {
            name,
            value: values.join(","),
            msg: "parameter can appear at most once",
        }
        .fail(),
    }
}

/// Checked parameters of a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadParams {
    pub content: ContentParam,
    /// None is unbounded.
    pub depth: Option<u32>,
    pub fields: Option<String>,
    pub with_defaults: WithDefaults,
    /// Mark leaves reported with their default value.
    pub tagged: bool,
}

impl ReadParams {
    pub fn from_query(params: &QueryParams) -> Result<Self> {
        check_allowed(params, READ_PARAMS)?;
        let mut read = ReadParams::default();

        if let Some(value) = single(params, "content")? {
            read.content = match value {
                "config" => ContentParam::Config,
                "nonconfig" => ContentParam::NonConfig,
                "all" => ContentParam::All,
                _ => {
                    return error::InvalidValueSnafu {
                        name: "content",
                        value,
                        msg: "allowed values are config, nonconfig and all",
                    }
                    .fail()
                }
            };
        }

        if let Some(value) = single(params, "depth")? {
            read.depth = parse_depth(value)?;
        }

        if let Some(value) = single(params, "fields")? {
            read.fields = Some(value.to_string());
        }

        if let Some(value) = single(params, "with-defaults")? {
            let (mode, tagged) = match value {
                "report-all" => (WithDefaults::ReportAll, false),
                "report-all-tagged" => (WithDefaults::ReportAll, true),
                "trim" => (WithDefaults::Trim, false),
                "explicit" => (WithDefaults::Explicit, false),
                _ => {
                    return error::InvalidValueSnafu {
                        name: "with-defaults",
                        value,
                        msg: "allowed values are report-all, report-all-tagged, trim and explicit",
                    }
                    .fail()
                }
            };
            read.with_defaults = mode;
            read.tagged = tagged;
        }

        Ok(read)
    }

    /// Parses the fields parameter, if any, against the target.
    pub fn field_selector(&self, context: &ResourceContext) -> Result<Option<FieldSelector>> {
        match &self.fields {
            Some(fields) => Ok(Some(FieldSelector::parse(fields, &context.node)?)),
            None => Ok(None),
        }
    }
}

fn parse_depth(value: &str) -> Result<Option<u32>> {
    if value == "unbounded" {
        return Ok(None);
    }
    let depth = value.parse::<u32>().ok().context(error::InvalidValueSnafu {
        name: "depth",
        value,
        msg: "must be an integer or \"unbounded\"",
    })?;
    ensure!(
        (1..=MAX_DEPTH).contains(&depth),
        error::InvalidValueSnafu {
            name: "depth",
            value,
            msg: format!("must be between 1 and {}", MAX_DEPTH),
        }
    );
    Ok(Some(depth))
}

/// The insert parameter, before `point` is attached.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Insert {
    First,
    Last,
    Before,
    After,
}

impl Insert {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "first" => Ok(Insert::First),
            "last" => Ok(Insert::Last),
            "before" => Ok(Insert::Before),
            "after" => Ok(Insert::After),
            _ => error::BadElementSnafu {
                msg: format!("Unrecognized insert parameter value '{}'", value),
            }
            .fail(),
        }
    }

    fn needs_point(self) -> bool {
        matches!(self, Insert::Before | Insert::After)
    }
}

/// Checked parameters of a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteParams {
    pub insert: Option<Insert>,
    pub point: Option<String>,
}

impl WriteParams {
    pub fn from_query(params: &QueryParams) -> Result<Self> {
        check_allowed(params, WRITE_PARAMS)?;
        let insert = single(params, "insert")?.map(Insert::parse).transpose()?;
        let point = single(params, "point")?.map(str::to_string);

        let needs_point = insert.map_or(false, Insert::needs_point);
        match (&point, needs_point) {
            (None, true) => {
                return error::InvalidValueSnafu {
                    name: "point",
                    value: "",
                    msg: "required when insert is before or after",
                }
                .fail()
            }
            (Some(point), false) => {
                return error::InvalidValueSnafu {
                    name: "point",
                    value: point.as_str(),
                    msg: "only allowed when insert is before or after",
                }
                .fail()
            }
            _ => {}
        }
        Ok(Self { insert, point })
    }

    /// Works out where an entry goes in the list it's written to.  `list` is the context of the
    /// list itself; `point` names a sibling entry, either relative to it or as a full path.
    pub fn position(&self, list: &ResourceContext) -> Result<Option<InsertPosition>> {
        let insert = match self.insert {
            Some(insert) => insert,
            None => return Ok(None),
        };
        ensure!(
            list.node.kind() == NodeKind::List && list.node.is_ordered_by_user(),
            error::BadElementSnafu {
                msg: "insert is only allowed for user-ordered lists",
            }
        );
        Ok(Some(match insert {
            Insert::First => InsertPosition::First,
            Insert::Last => InsertPosition::Last,
            Insert::Before | Insert::After => {
                let point = self.point.as_deref().unwrap_or_default();
                let arg = resolve_point(list, point)?;
                if insert == Insert::Before {
                    InsertPosition::Before(arg)
                } else {
                    InsertPosition::After(arg)
                }
            }
        }))
    }
}

/// Resolves a point to the entry step of a sibling in the given list.  The point is a resource
/// path from the data root, or from the list's parent when it starts with the list's own name.
fn resolve_point(list: &ResourceContext, point: &str) -> Result<PathArg> {
    let bad_point = || error::Error::BadElement {
        msg: format!("point '{}' is not an entry of the target list", point),
    };
    // The list's own path, without the entry step if the target is an entry.
    let list_path = list
        .path
        .steps()
        .iter()
        .rposition(|arg| !arg.is_entry())
        .map(|i| TreePath::from_steps(list.path.steps()[..=i].to_vec()))
        .ok_or_else(bad_point)?;
    let parent = list_path.parent().ok_or_else(bad_point)?;
    let relative = format!("{}/{}", encode_path(&parent), point.trim_start_matches('/'));

    let resolver = Resolver::new(Arc::clone(&list.scope));
    let resolved = resolver
        .resolve(point)
        .or_else(|_| resolver.resolve(&relative))
        .map_err(|_| bad_point())?;

    match (resolved.path.parent(), resolved.path.last()) {
        (Some(parent), Some(arg)) if arg.is_entry() && parent == list_path => Ok(arg.clone()),
        _ => Err(bad_point()),
    }
}
