/*!
# Background

Some data behind the gateway lives on remote devices that are only reachable through a
NETCONF-style session: clients lock a datastore, send edits, commit them, and unlock.

# Library

This library provides the `NetconfDataTreeService` trait, which is everything the gateway needs
from a device's data, and `NetconfRpcService` for invoking the device's own rpcs and actions.
`NetconfSession` implements both over any async byte stream (TCP in production, an in-memory
duplex in tests).

Messages are framed with RFC 6242 chunked framing (see the `framing` module).  The payload of each
message is a JSON document describing the RPC (see the `rpc` module); encoding payloads as XML is
left to whatever sits between us and a real device.

# Current limitations

* Only one RPC is in flight per session at a time.
* There's no keepalive or reconnect; a dropped session surfaces as an error on the next RPC.
*/

pub mod error;
pub mod framing;
pub mod rpc;
pub mod session;

pub use error::{Error, Result};
pub use rpc::{Datastore, Edit, EditOperation, ErrorSeverity, ErrorType, RpcError};
pub use session::{connect, NetconfSession};

use async_trait::async_trait;
use datastore::{DataNode, TreePath};

/// Operations the gateway performs against a remote device's data tree.
#[async_trait]
pub trait NetconfDataTreeService: Send + Sync {
    /// Locks the target datastore for this session.
    async fn lock(&self) -> Result<()>;

    /// Releases a lock taken by `lock`.
    async fn unlock(&self) -> Result<()>;

    /// Reads configuration and state at the given path.
    async fn get(&self, path: &TreePath) -> Result<Option<DataNode>>;

    /// Reads configuration only at the given path.
    async fn get_config(&self, path: &TreePath) -> Result<Option<DataNode>>;

    /// Sends one edit to the target datastore.
    async fn edit_config(&self, edit: Edit) -> Result<()>;

    /// Makes edits to the target datastore live.
    async fn commit(&self) -> Result<()>;

    /// Throws away uncommitted edits to the target datastore.
    async fn discard_changes(&self) -> Result<()>;
}

/// Invocation of the rpcs and actions a remote device defines.
#[async_trait]
pub trait NetconfRpcService: Send + Sync {
    /// Invokes the operation named by the last step of `path`.  Returns the output, if any.
    async fn invoke(&self, path: &TreePath, input: DataNode) -> Result<Option<DataNode>>;
}
