//! The controller module maps between the resolved resources and the backend strategies, similar
//! to the controller in the MVC model.  Handlers in the router deal with HTTP; everything here
//! deals with resource contexts, decoded bodies and units of work.

use datastore::{PathArg, TreePath, Value};
use log::{debug, warn};
use snafu::{ensure, OptionExt};
use std::sync::Arc;

use crate::codec;
use crate::error::{self, Error, Result};
use crate::merge::{read_data, wrap_root};
use crate::params::{check_allowed, QueryParams, ReadParams, WriteParams};
use crate::patch::{apply_patch, PatchStatusContext};
use crate::resolver::ResourceContext;
use crate::shape::{apply_defaults, limit_depth};
use crate::strategy::{Change, EditShape, Operation, UnitOfWork};

const NO_PARAMS: &[&str] = &[];

/// Reads the target, shaped by the read parameters, and encodes it for the response.
pub(crate) async fn read(context: &ResourceContext, query: &QueryParams) -> Result<Value> {
    let params = ReadParams::from_query(query)?;
    ensure_data(context)?;
    let selector = params.field_selector(context)?;
    let strategy = context.data()?;

    let mut data = read_data(
        strategy.as_ref(),
        &context.path,
        &context.node,
        params.content,
    )
    .await?;

    apply_defaults(
        &mut data,
        &context.node,
        params.with_defaults,
        params.content,
    );
    if let Some(selector) = selector {
        selector.apply(&mut data, &context.node);
    }
    if let Some(depth) = params.depth {
        limit_depth(&mut data, &context.node, depth, context.path.is_root());
    }

    if context.path.is_root() {
        data = wrap_root(data)?;
    }
    codec::encode_resource(context, &data, params.tagged)
}

/// Stores the body at the target, replacing anything there.  Returns whether the target was
/// created rather than replaced.
pub(crate) async fn replace(
    context: &ResourceContext,
    query: &QueryParams,
    body: &Value,
) -> Result<bool> {
    let params = WriteParams::from_query(query)?;
    ensure_data(context)?;
    let data = codec::decode_resource(context, body)?;
    let position = params.position(context)?;
    let strategy = context.data()?;

    let mut tx = strategy.begin_write(EditShape::of(&context.node)).await?;
    let existed = match tx.exists(&context.path).await {
        Ok(existed) => existed,
        Err(e) => return Err(abort(tx, e).await),
    };
    let change = Change::new(Operation::Replace, context.path.clone(), Some(data)).at(position);
    finish(tx, change).await?;

    debug!(
        "{} {}",
        if existed { "Replaced" } else { "Created" },
        context.path
    );
    Ok(!existed)
}

/// Creates the child named in the body under the target.  Returns the URI of the new child,
/// relative to the data root.
pub(crate) async fn create(
    context: &ResourceContext,
    query: &QueryParams,
    body: &Value,
) -> Result<String> {
    let params = WriteParams::from_query(query)?;
    ensure_data(context)?;
    let (path, data) = codec::decode_child(context, body)?;
    let child = child_context(context, &path)?;
    let position = params.position(&child)?;
    let strategy = context.data()?;

    let tx = strategy.begin_write(EditShape::of(&child.node)).await?;
    let change = Change::new(Operation::Create, path.clone(), Some(data)).at(position);
    finish(tx, change).await?;

    debug!("Created {}", path);
    Ok(context.uri_for(&path))
}

/// Merges the body into the target.
pub(crate) async fn merge(
    context: &ResourceContext,
    query: &QueryParams,
    body: &Value,
) -> Result<()> {
    check_allowed(query, NO_PARAMS)?;
    ensure_data(context)?;
    let data = codec::decode_resource(context, body)?;
    let strategy = context.data()?;

    let tx = strategy.begin_write(EditShape::of(&context.node)).await?;
    finish(
        tx,
        Change::new(Operation::Merge, context.path.clone(), Some(data)),
    )
    .await
}

/// Deletes the target, which must exist.
pub(crate) async fn delete(context: &ResourceContext, query: &QueryParams) -> Result<()> {
    check_allowed(query, NO_PARAMS)?;
    ensure_data(context)?;
    ensure!(
        !context.path.is_root(),
        error::BadRequestSnafu {
            path: "/",
            msg: "the whole datastore can't be deleted",
        }
    );
    let strategy = context.data()?;

    let tx = strategy.begin_write(EditShape::of(&context.node)).await?;
    finish(
        tx,
        Change::new(Operation::Delete, context.path.clone(), None),
    )
    .await
}

/// Runs a yang-patch document against the target.
pub(crate) async fn patch(
    context: &ResourceContext,
    query: &QueryParams,
    body: &Value,
) -> Result<PatchStatusContext> {
    check_allowed(query, NO_PARAMS)?;
    ensure_data(context)?;
    let patch = codec::decode_patch(context, body)?;
    let strategy = context.data()?;
    debug!(
        "Applying patch '{}' with {} edits at {}",
        patch.patch_id,
        patch.entities.len(),
        context.path
    );
    Ok(apply_patch(strategy.as_ref(), patch).await)
}

/// Invokes the operation at the target.  Returns the encoded output, if there is any.
pub(crate) async fn invoke(
    context: &ResourceContext,
    query: &QueryParams,
    body: &[u8],
) -> Result<Option<Value>> {
    check_allowed(query, NO_PARAMS)?;
    ensure!(
        context.node.is_operation(),
        error::BadRequestSnafu {
            path: context.path.to_string(),
            msg: "target is not an operation",
        }
    );
    let input = codec::decode_input(context, body)?;
    let service = context.operations()?;

    let output = service.invoke(&context.path, input).await?;
    Ok(output.and_then(|output| codec::encode_output(context, &output)))
}

/// Data requests can't target operations.
fn ensure_data(context: &ResourceContext) -> Result<()> {
    ensure!(
        !context.node.is_operation(),
        error::BadRequestSnafu {
            path: context.path.to_string(),
            msg: "operations are only reachable by POST",
        }
    );
    Ok(())
}

/// Builds the context of a child about to be created under the given context.
fn child_context(context: &ResourceContext, path: &TreePath) -> Result<ResourceContext> {
    let qname = path
        .last()
        .map(PathArg::qname)
        .context(error::BadRequestSnafu {
            path: path.to_string(),
            msg: "no child named",
        })?;
    let node = if context.is_list() {
        Arc::clone(&context.node)
    } else {
        context
            .node
            .child(qname)
            .cloned()
            .context(error::UnknownElementSnafu {
                name: qname.to_string(),
                parent: context.path.to_string(),
            })?
    };
    Ok(ResourceContext {
        node,
        path: path.clone(),
        ..context.clone()
    })
}

/// Applies one change and commits, or cancels if the change fails.
async fn finish(mut tx: Box<dyn UnitOfWork>, change: Change) -> Result<()> {
    if let Err(e) = change.apply(tx.as_mut()).await {
        return Err(abort(tx, e).await);
    }
    tx.commit().await
}

/// Cancels a unit of work after a failure, returning the failure.
async fn abort(tx: Box<dyn UnitOfWork>, err: Error) -> Error {
    if let Err(cancel) = tx.cancel().await {
        warn!("Unable to cancel after '{}': {}", err, cancel);
    }
    err
}

