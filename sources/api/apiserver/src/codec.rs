//! Schema-guided JSON encoding of request and response bodies.
//!
//! Member names are module-qualified at the top of a document and wherever the module changes
//! from the parent's, as in `{"example-jukebox:jukebox": {"library": {...}}}`.  Lists and
//! leaf-lists are JSON arrays.  Decoding checks every member against the schema and every leaf
//! value against its type, so nothing unknown reaches a backend.

use datastore::{Children, DataNode, InsertPosition, PathArg, QName, TreePath, Value};
use serde_json::{json, Map};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{self, ErrorEntry, Result};
use crate::merge::{DATA_ROOT_MODULE, DATA_ROOT_NAME};
use crate::patch::{PatchContext, PatchEntity, PatchStatusContext};
use crate::resolver::{ResourceContext, Resolver};
use crate::schema::{LeafType, NodeKind, SchemaNode};
use crate::shape::is_default;
use crate::strategy::{EditShape, Operation};

/// Media type of RESTCONF data and operation bodies.
pub const YANG_DATA_JSON: &str = "application/yang-data+json";
/// Media type of yang-patch requests and status documents.
pub const YANG_PATCH_JSON: &str = "application/yang-patch+json";

const YANG_PATCH: &str = "ietf-yang-patch:yang-patch";
const YANG_PATCH_STATUS: &str = "ietf-yang-patch:yang-patch-status";
const ERRORS: &str = "ietf-restconf:errors";
const DEFAULT_ANNOTATION: &str = "ietf-netconf-with-defaults:default";

/// Parses a request body as JSON.
pub fn parse_body(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| error::Error::MalformedMessage {
        msg: e.to_string(),
    })
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Decoding

/// Decodes the body of a write to the target itself, such as a PUT or a plain PATCH.  The body
/// has one member named by the target's qualified name.  For a list entry the keys in the body
/// must match the keys in the path.
pub fn decode_resource(context: &ResourceContext, body: &Value) -> Result<DataNode> {
    if context.path.is_root() {
        return decode_root(context, body);
    }

    let (name, value) = single_member(body)?;
    let node = &context.node;
    let qname = node.qname().context(error::MalformedMessageSnafu {
        msg: "target has no name",
    })?;
    ensure!(
        names(name, qname),
        error::MalformedMessageSnafu {
            msg: format!("body names '{}' but the target is '{}'", name, qname),
        }
    );

    match context.path.last() {
        Some(arg @ PathArg::Entry { .. }) => {
            let (entry_arg, entry) = decode_single_entry(node, value)?;
            ensure!(
                &entry_arg == arg,
                error::BadRequestSnafu {
                    path: context.path.to_string(),
                    msg: "keys in the body don't match the keys in the path",
                }
            );
            Ok(entry)
        }
        _ => decode_node(node, value),
    }
}

/// The whole datastore: the data root wrapper, or just the top-level members.
fn decode_root(context: &ResourceContext, body: &Value) -> Result<DataNode> {
    let object = as_object(body, "data root")?;
    let root_name = format!("{}:{}", DATA_ROOT_MODULE, DATA_ROOT_NAME);
    let object = match object.get(&root_name) {
        Some(inner) if object.len() == 1 => as_object(inner, &root_name)?,
        _ => object,
    };
    Ok(DataNode::Container(decode_members(
        context.schema.root(),
        object,
    )?))
}

/// Decodes the body of a POST creating a child of the target.  Returns the path of the new child
/// along with its data.
pub fn decode_child(context: &ResourceContext, body: &Value) -> Result<(TreePath, DataNode)> {
    let (name, value) = single_member(body)?;

    if context.is_list() {
        let node = &context.node;
        ensure!(
            node.qname().map_or(false, |q| names(name, q)),
            error::UnknownElementSnafu {
                name,
                parent: context.path.to_string(),
            }
        );
        let (arg, entry) = decode_single_entry(node, value)?;
        return Ok((context.path.child(arg), entry));
    }

    ensure!(
        context.node.is_composite(),
        error::BadElementSnafu {
            msg: format!("{} can't have children", context.path),
        }
    );
    let module = context.node.qname().map(|q| q.module().to_string());
    let child = context
        .node
        .find_child(name, module.as_deref())
        .context(error::UnknownElementSnafu {
            name,
            parent: context.path.to_string(),
        })?;
    let qname = child.qname().cloned().context(error::MalformedMessageSnafu {
        msg: "child has no name",
    })?;
    ensure!(
        !child.is_operation(),
        error::UnknownElementSnafu {
            name,
            parent: context.path.to_string(),
        }
    );

    let node_path = context.path.child(PathArg::node(qname));
    if child.kind() == NodeKind::List {
        let (arg, entry) = decode_single_entry(child, value)?;
        Ok((node_path.child(arg), entry))
    } else {
        Ok((node_path, decode_node(child, value)?))
    }
}

/// Decodes the input of an rpc or action.  An empty body is an empty input.
pub fn decode_input(context: &ResourceContext, body: &[u8]) -> Result<DataNode> {
    let input = context.node.input().context(error::BadRequestSnafu {
        path: context.path.to_string(),
        msg: "target is not an operation",
    })?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DataNode::empty_container());
    }

    let body = parse_body(body)?;
    let (name, value) = single_member(&body)?;
    let qname = input.qname().context(error::MalformedMessageSnafu {
        msg: "input has no name",
    })?;
    ensure!(
        names(name, qname),
        error::MalformedMessageSnafu {
            msg: format!("expected '{}', found '{}'", qname, name),
        }
    );
    let object = as_object(value, name)?;
    Ok(DataNode::Container(decode_members(input, object)?))
}

/// Decodes a yang-patch document.  Edit targets and points are resolved relative to the request
/// target, and each value is decoded as a write to its edit's target.
pub fn decode_patch(context: &ResourceContext, body: &Value) -> Result<PatchContext> {
    let (name, value) = single_member(body)?;
    ensure!(
        name == YANG_PATCH,
        error::MalformedMessageSnafu {
            msg: format!("expected '{}', found '{}'", YANG_PATCH, name),
        }
    );
    let patch = as_object(value, YANG_PATCH)?;
    let patch_id = string_member(patch, "patch-id")?;
    let comment = match patch.get("comment") {
        Some(c) => Some(
            c.as_str()
                .context(error::MalformedMessageSnafu {
                    msg: "comment must be a string",
                })?
                .to_string(),
        ),
        None => None,
    };
    let edits = patch
        .get("edit")
        .and_then(Value::as_array)
        .context(error::MalformedMessageSnafu {
            msg: "yang-patch needs an edit list",
        })?;
    ensure!(
        !edits.is_empty(),
        error::MalformedMessageSnafu {
            msg: "yang-patch needs at least one edit",
        }
    );

    let mut entities = Vec::with_capacity(edits.len());
    for edit in edits {
        entities.push(decode_edit(context, as_object(edit, "edit")?)?);
    }
    Ok(PatchContext {
        patch_id,
        comment,
        entities,
    })
}

fn decode_edit(context: &ResourceContext, edit: &Map<String, Value>) -> Result<PatchEntity> {
    let edit_id = string_member(edit, "edit-id")?;
    let operation: Operation = serde_json::from_value(
        edit.get("operation")
            .cloned()
            .context(error::MalformedMessageSnafu {
                msg: format!("edit '{}' has no operation", edit_id),
            })?,
    )
    .map_err(|e| error::Error::MalformedMessage {
        msg: format!("edit '{}': {}", edit_id, e),
    })?;
    let target = string_member(edit, "target")?;
    let target = Resolver::resolve_relative(context, &target)?;

    let data = match edit.get("value") {
        Some(value) if operation.needs_data() => Some(decode_resource(&target, value)?),
        Some(_) => {
            return error::MalformedMessageSnafu {
                msg: format!("edit '{}': {} takes no value", edit_id, operation),
            }
            .fail()
        }
        None if operation.needs_data() => {
            return error::MalformedMessageSnafu {
                msg: format!("edit '{}': {} needs a value", edit_id, operation),
            }
            .fail()
        }
        None => None,
    };

    let position = match operation {
        Operation::Insert | Operation::Move => edit_position(context, &target, edit, &edit_id)?,
        _ => None,
    };

    Ok(PatchEntity {
        edit_id,
        operation,
        shape: EditShape::of(&target.node),
        target: target.path,
        data,
        position,
    })
}

/// The where and point of an insert or move edit.  The point names a sibling entry.
fn edit_position(
    context: &ResourceContext,
    target: &ResourceContext,
    edit: &Map<String, Value>,
    edit_id: &str,
) -> Result<Option<InsertPosition>> {
    ensure!(
        target.node.is_ordered_by_user() && !target.is_list(),
        error::BadElementSnafu {
            msg: format!("edit '{}' must target an entry of a user-ordered list", edit_id),
        }
    );
    let place = match edit.get("where").and_then(Value::as_str) {
        Some(place) => place,
        None => return Ok(Some(InsertPosition::Last)),
    };
    let point = || -> Result<PathArg> {
        let point = string_member(edit, "point")?;
        let point = Resolver::resolve_relative(context, &point)?;
        let list_path = target.path.parent();
        let arg = point.path.last().cloned();
        match arg {
            Some(arg @ PathArg::Entry { .. }) if point.path.parent() == list_path => Ok(arg),
            _ => error::BadElementSnafu {
                msg: format!("point of edit '{}' is not an entry of the same list", edit_id),
            }
            .fail(),
        }
    };
    Ok(Some(match place {
        "first" => InsertPosition::First,
        "last" => InsertPosition::Last,
        "before" => InsertPosition::Before(point()?),
        "after" => InsertPosition::After(point()?),
        other => {
            return error::BadElementSnafu {
                msg: format!("unrecognized where '{}' in edit '{}'", other, edit_id),
            }
            .fail()
        }
    }))
}

/// Decodes a value for the given schema node: an object for containers, an array of entries for
/// lists, an array of values for leaf-lists, a scalar for leaves.
fn decode_node(schema: &SchemaNode, value: &Value) -> Result<DataNode> {
    let name = schema.qname().map(|q| q.to_string()).unwrap_or_default();
    match schema.kind() {
        NodeKind::Container => Ok(DataNode::Container(decode_members(
            schema,
            as_object(value, &name)?,
        )?)),
        NodeKind::List => {
            let entries = value.as_array().context(error::MalformedMessageSnafu {
                msg: format!("list '{}' must be an array", name),
            })?;
            let mut children = Children::new();
            for entry in entries {
                let (arg, entry) = decode_entry(schema, as_object(entry, &name)?)?;
                children.insert(arg, entry);
            }
            Ok(DataNode::List(children))
        }
        NodeKind::Leaf => Ok(DataNode::Leaf(check_leaf(schema, value)?)),
        NodeKind::LeafList => {
            let values = value.as_array().context(error::InvalidLeafSnafu {
                path: name.as_str(),
                msg: "leaf-list must be an array",
            })?;
            let values = values
                .iter()
                .map(|v| check_leaf(schema, v))
                .collect::<Result<Vec<_>>>()?;
            Ok(DataNode::Leaf(Value::Array(values)))
        }
        NodeKind::Rpc | NodeKind::Action => error::UnknownElementSnafu {
            name,
            parent: "data",
        }
        .fail(),
    }
}

/// One list entry, given either as a one-element array or as a bare object.
fn decode_single_entry(list: &SchemaNode, value: &Value) -> Result<(PathArg, DataNode)> {
    let object = match value {
        Value::Array(entries) => {
            ensure!(
                entries.len() == 1,
                error::MalformedMessageSnafu {
                    msg: format!("expected exactly one entry, found {}", entries.len()),
                }
            );
            &entries[0]
        }
        other => other,
    };
    let name = list.qname().map(|q| q.to_string()).unwrap_or_default();
    decode_entry(list, as_object(object, &name)?)
}

fn decode_entry(list: &SchemaNode, object: &Map<String, Value>) -> Result<(PathArg, DataNode)> {
    let qname = list.qname().cloned().context(error::MalformedMessageSnafu {
        msg: "list has no name",
    })?;
    let children = decode_members(list, object)?;
    let mut keys = Vec::with_capacity(list.keys().len());
    for key in list.keys() {
        let value = children
            .get(&PathArg::node(key.clone()))
            .and_then(DataNode::leaf_value)
            .context(error::MalformedMessageSnafu {
                msg: format!("entry of '{}' is missing key '{}'", qname, key.name()),
            })?;
        keys.push((key.clone(), key_string(value)));
    }
    Ok((PathArg::entry(qname, keys), DataNode::Container(children)))
}

/// Decodes the members of an object into children of the given container-like node.  Metadata
/// members (starting with '@') are ignored.
fn decode_members(schema: &SchemaNode, object: &Map<String, Value>) -> Result<Children> {
    let module = schema.qname().map(|q| q.module().to_string());
    let parent = schema
        .qname()
        .map(|q| q.to_string())
        .unwrap_or_else(|| "data root".to_string());

    let mut children = Children::new();
    for (name, value) in object {
        if name.starts_with('@') {
            continue;
        }
        let child = schema
            .find_child(name, module.as_deref())
            .filter(|c| !c.is_operation())
            .context(error::UnknownElementSnafu {
                name: name.as_str(),
                parent: parent.as_str(),
            })?;
        let qname = child.qname().cloned().context(error::MalformedMessageSnafu {
            msg: format!("'{}' has no name", name),
        })?;
        children.insert(PathArg::node(qname), decode_node(child, value)?);
    }
    Ok(children)
}

/// Checks a leaf value against the leaf's type.  Integers and decimals may be given as strings,
/// as they are for 64-bit values, and are stored as numbers.
fn check_leaf(schema: &SchemaNode, value: &Value) -> Result<Value> {
    let path = schema.qname().map(|q| q.to_string()).unwrap_or_default();
    let invalid = |msg: &str| -> Result<Value> {
        error::InvalidLeafSnafu {
            path: path.as_str(),
            msg: format!("{}, found {}", msg, value),
        }
        .fail()
    };

    match (schema.leaf_type(), value) {
        (LeafType::Any, v) => Ok(v.clone()),
        (LeafType::String, Value::String(_)) => Ok(value.clone()),
        (LeafType::String, _) => invalid("expected a string"),
        (LeafType::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (LeafType::Boolean, _) => invalid("expected true or false"),
        (LeafType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        (LeafType::Integer, Value::String(s)) => match s.parse::<i64>() {
            Ok(n) => Ok(json!(n)),
            Err(_) => invalid("expected an integer"),
        },
        (LeafType::Integer, _) => invalid("expected an integer"),
        (LeafType::Decimal, Value::Number(_)) => Ok(value.clone()),
        (LeafType::Decimal, Value::String(s)) => match s.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(json!(n)),
            _ => invalid("expected a number"),
        },
        (LeafType::Decimal, _) => invalid("expected a number"),
        (LeafType::Empty, Value::Array(items)) if items.len() == 1 && items[0].is_null() => {
            Ok(value.clone())
        }
        (LeafType::Empty, _) => invalid("expected [null]"),
    }
}

/// The string form of a key leaf's value, as used in paths.
fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a qualified member name refers to the node with the given name.
fn names(member: &str, qname: &QName) -> bool {
    match member.split_once(datastore::MODULE_SEPARATOR) {
        Some((module, name)) => module == qname.module() && name == qname.name(),
        None => false,
    }
}

fn single_member(body: &Value) -> Result<(&str, &Value)> {
    let object = as_object(body, "body")?;
    ensure!(
        object.len() == 1,
        error::MalformedMessageSnafu {
            msg: format!("expected exactly one member, found {}", object.len()),
        }
    );
    object
        .iter()
        .next()
        .map(|(k, v)| (k.as_str(), v))
        .context(error::MalformedMessageSnafu {
            msg: "empty body",
        })
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().context(error::MalformedMessageSnafu {
        msg: format!("{} must be an object", what),
    })
}

fn string_member(object: &Map<String, Value>, name: &str) -> Result<String> {
    object
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .context(error::MalformedMessageSnafu {
            msg: format!("missing string member '{}'", name),
        })
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Encoding

/// Encodes the result of a read at the target.  With `tagged`, leaves holding their default value
/// carry the with-defaults annotation.
pub fn encode_resource(context: &ResourceContext, data: &DataNode, tagged: bool) -> Result<Value> {
    if context.path.is_root() {
        // Reads of the whole datastore come back wrapped in the data root.
        let root_name = format!("{}:{}", DATA_ROOT_MODULE, DATA_ROOT_NAME);
        let inner = data
            .children()
            .and_then(|c| c.values().next())
            .unwrap_or(data);
        let members = encode_members(context.schema.root(), inner, tagged);
        return Ok(json!({ root_name: members }));
    }

    let node = &context.node;
    let qname = node.qname().context(error::MalformedMessageSnafu {
        msg: "target has no name",
    })?;
    let value = match context.path.last() {
        Some(PathArg::Entry { .. }) => {
            Value::Array(vec![Value::Object(encode_members(node, data, tagged))])
        }
        _ => encode_node(node, data, tagged),
    };

    let mut object = Map::new();
    if tagged && is_default(data, node) {
        object.insert(format!("@{}", qname), default_annotation());
    }
    object.insert(qname.to_string(), value);
    Ok(Value::Object(object))
}

/// Encodes operation output, or nothing when the output is empty.
pub fn encode_output(context: &ResourceContext, output: &DataNode) -> Option<Value> {
    let schema = context.node.output()?;
    let qname = schema.qname()?;
    if output.children().map_or(true, |c| c.is_empty()) {
        return None;
    }
    Some(json!({ qname.to_string(): encode_members(schema, output, false) }))
}

fn encode_node(schema: &SchemaNode, data: &DataNode, tagged: bool) -> Value {
    match data {
        DataNode::Leaf(value) => value.clone(),
        DataNode::Container(_) => Value::Object(encode_members(schema, data, tagged)),
        DataNode::List(entries) => Value::Array(
            entries
                .values()
                .map(|entry| Value::Object(encode_members(schema, entry, tagged)))
                .collect(),
        ),
    }
}

fn encode_members(schema: &SchemaNode, data: &DataNode, tagged: bool) -> Map<String, Value> {
    let module = schema.qname().map(QName::module);
    let mut object = Map::new();
    let children = match data.children() {
        Some(children) => children,
        None => return object,
    };

    for (arg, child) in children {
        let qname = arg.qname();
        let name = if Some(qname.module()) == module {
            qname.name().to_string()
        } else {
            qname.to_string()
        };
        match schema.child(qname) {
            Some(child_schema) => {
                if tagged && child.is_leaf() && is_default(child, child_schema) {
                    object.insert(format!("@{}", name), default_annotation());
                }
                object.insert(name, encode_node(child_schema, child, tagged));
            }
            None => {
                object.insert(name, encode_unknown(child));
            }
        }
    }
    object
}

/// Data the schema doesn't know about is encoded with qualified names throughout.
fn encode_unknown(data: &DataNode) -> Value {
    match data {
        DataNode::Leaf(value) => value.clone(),
        DataNode::Container(children) => Value::Object(
            children
                .iter()
                .map(|(arg, child)| (arg.qname().to_string(), encode_unknown(child)))
                .collect(),
        ),
        DataNode::List(entries) => Value::Array(entries.values().map(encode_unknown).collect()),
    }
}

fn default_annotation() -> Value {
    json!({ DEFAULT_ANNOTATION: true })
}

/// The error report body for a failed request.
pub fn encode_errors(entries: &[ErrorEntry]) -> Result<Value> {
    let entries = serde_json::to_value(entries).context(error::ResponseSerializationSnafu)?;
    Ok(json!({ ERRORS: { "error": entries } }))
}

/// The yang-patch status document.
pub fn encode_patch_status(status: &PatchStatusContext) -> Result<Value> {
    let mut edits = Vec::with_capacity(status.edit_status.len());
    for entity in &status.edit_status {
        let mut edit = Map::new();
        edit.insert("edit-id".to_string(), json!(entity.edit_id));
        if entity.ok {
            edit.insert("ok".to_string(), json!([null]));
        } else if !entity.errors.is_empty() {
            let errors =
                serde_json::to_value(&entity.errors).context(error::ResponseSerializationSnafu)?;
            edit.insert("errors".to_string(), json!({ "error": errors }));
        }
        edits.push(Value::Object(edit));
    }

    let mut document = Map::new();
    document.insert("patch-id".to_string(), json!(status.patch_id));
    if status.ok {
        document.insert("ok".to_string(), json!([null]));
    } else if !status.global_errors.is_empty() {
        let errors = serde_json::to_value(&status.global_errors)
            .context(error::ResponseSerializationSnafu)?;
        document.insert("errors".to_string(), json!({ "error": errors }));
    }
    document.insert("edit-status".to_string(), json!({ "edit": edits }));
    Ok(json!({ YANG_PATCH_STATUS: document }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::resolver::{Scope, ServiceSet};
    use crate::schema::test::{jukebox, qn};
    use std::sync::Arc;

    fn resolve(path: &str) -> ResourceContext {
        let scope = Arc::new(Scope::new(jukebox(), ServiceSet::default()));
        Resolver::new(scope).resolve(path).unwrap()
    }

    #[test]
    fn container_body() {
        let context = resolve("/example-jukebox:jukebox/player");
        let body = json!({"example-jukebox:player": {"gap": 1.5, "volume": "7"}});
        let data = decode_resource(&context, &body).unwrap();
        let children = data.children().unwrap();
        assert_eq!(
            children.get(&PathArg::node(qn("gap"))),
            Some(&DataNode::leaf(json!(1.5)))
        );
        // Integers given as strings are stored as numbers
        assert_eq!(
            children.get(&PathArg::node(qn("volume"))),
            Some(&DataNode::leaf(json!(7)))
        );
    }

    #[test]
    fn entry_body_keys_must_match() {
        let context = resolve("/example-jukebox:jukebox/playlist=Foo");
        let body = json!({"example-jukebox:playlist": [{"name": "Foo", "description": "x"}]});
        let data = decode_resource(&context, &body).unwrap();
        assert_eq!(data.children().unwrap().len(), 2);

        let body = json!({"example-jukebox:playlist": [{"name": "Bar"}]});
        match decode_resource(&context, &body) {
            Err(Error::BadRequest { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn body_errors() {
        let context = resolve("/example-jukebox:jukebox/player");
        match decode_resource(&context, &json!({"example-jukebox:player": {"bogus": 1}})) {
            Err(Error::UnknownElement { name, .. }) => assert_eq!(name, "bogus"),
            other => panic!("unexpected {:?}", other),
        }
        match decode_resource(&context, &json!({"example-jukebox:player": {"shuffle": "yes"}})) {
            Err(Error::InvalidLeaf { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        match decode_resource(&context, &json!({"example-jukebox:library": {}})) {
            Err(Error::MalformedMessage { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        match parse_body(b"{not json") {
            Err(Error::MalformedMessage { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn child_body() {
        let context = resolve("/example-jukebox:jukebox");
        let body = json!({"example-jukebox:playlist": [{"name": "Foo"}]});
        let (path, _) = decode_child(&context, &body).unwrap();
        assert_eq!(
            path,
            resolve("/example-jukebox:jukebox/playlist=Foo").path
        );

        let list = resolve("/example-jukebox:jukebox/playlist");
        let body = json!({"example-jukebox:playlist": {"name": "Bar"}});
        let (path, _) = decode_child(&list, &body).unwrap();
        assert_eq!(
            path,
            resolve("/example-jukebox:jukebox/playlist=Bar").path
        );

        match decode_child(&context, &json!({"example-jukebox:nothing": {}})) {
            Err(Error::UnknownElement { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn augmented_members_are_qualified() {
        let context = resolve("/example-jukebox:jukebox");
        let body = json!({"example-jukebox:jukebox": {
            "player": {"shuffle": true},
            "augment-jukebox:speakers": {"count": 2, "tags": ["left", "right"]}
        }});
        let data = decode_resource(&context, &body).unwrap();
        let encoded = encode_resource(&context, &data, false).unwrap();
        assert_eq!(encoded, body);
    }

    #[test]
    fn encode_entry_and_root() {
        let context = resolve("/example-jukebox:jukebox/playlist=Foo");
        let entry = DataNode::empty_container()
            .with_child(PathArg::node(qn("name")), DataNode::leaf("Foo"));
        assert_eq!(
            encode_resource(&context, &entry, false).unwrap(),
            json!({"example-jukebox:playlist": [{"name": "Foo"}]})
        );

        let root = resolve("/");
        let data = crate::merge::wrap_root(DataNode::empty_container().with_child(
            PathArg::node(qn("jukebox")),
            DataNode::empty_container(),
        ))
        .unwrap();
        assert_eq!(
            encode_resource(&root, &data, false).unwrap(),
            json!({"ietf-restconf:data": {"example-jukebox:jukebox": {}}})
        );
    }

    #[test]
    fn tagged_defaults() {
        let context = resolve("/example-jukebox:jukebox/player");
        let data = DataNode::empty_container()
            .with_child(PathArg::node(qn("volume")), DataNode::leaf(5))
            .with_child(PathArg::node(qn("gap")), DataNode::leaf(1.0));
        assert_eq!(
            encode_resource(&context, &data, true).unwrap(),
            json!({"example-jukebox:player": {
                "@volume": {"ietf-netconf-with-defaults:default": true},
                "volume": 5,
                "gap": 1.0
            }})
        );
    }

    #[test]
    fn operation_input() {
        let scope = Arc::new(Scope::new(jukebox(), ServiceSet::default()));
        let context = Resolver::new(scope)
            .resolve_operation("/example-jukebox:play")
            .unwrap();
        let input = decode_input(
            &context,
            br#"{"example-jukebox:input": {"playlist": "Foo", "song-number": 2}}"#,
        )
        .unwrap();
        assert_eq!(input.children().unwrap().len(), 2);
        assert_eq!(
            decode_input(&context, b"  ").unwrap(),
            DataNode::empty_container()
        );
    }

    #[test]
    fn patch_document() {
        let context = resolve("/example-jukebox:jukebox");
        let body = json!({"ietf-yang-patch:yang-patch": {
            "patch-id": "p1",
            "edit": [
                {"edit-id": "e1", "operation": "create", "target": "/playlist=Foo",
                 "value": {"example-jukebox:playlist": [{"name": "Foo"}]}},
                {"edit-id": "e2", "operation": "insert", "target": "/playlist=Bar",
                 "where": "before", "point": "/playlist=Foo",
                 "value": {"example-jukebox:playlist": [{"name": "Bar"}]}},
                {"edit-id": "e3", "operation": "delete", "target": "/player/gap"}
            ]
        }});
        let patch = decode_patch(&context, &body).unwrap();
        assert_eq!(patch.patch_id, "p1");
        assert_eq!(patch.entities.len(), 3);
        assert_eq!(patch.entities[0].operation, Operation::Create);
        assert_eq!(
            patch.entities[1].position,
            Some(InsertPosition::Before(
                resolve("/example-jukebox:jukebox/playlist=Foo")
                    .path
                    .last()
                    .cloned()
                    .unwrap()
            ))
        );
        assert_eq!(patch.entities[2].shape, EditShape::Leaf);
        assert!(patch.entities[2].data.is_none());

        let bad = json!({"ietf-yang-patch:yang-patch": {"patch-id": "p2", "edit": [
            {"edit-id": "e1", "operation": "frobnicate", "target": "/player"}
        ]}});
        match decode_patch(&context, &bad) {
            Err(Error::MalformedMessage { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn error_document() {
        let err = Error::DataMissing {
            path: "/example-jukebox:jukebox".to_string(),
        };
        let body = encode_errors(&err.to_entries()).unwrap();
        assert_eq!(
            body["ietf-restconf:errors"]["error"][0]["error-tag"],
            json!("data-missing")
        );
        assert_eq!(
            body["ietf-restconf:errors"]["error"][0]["error-type"],
            json!("protocol")
        );
    }
}
