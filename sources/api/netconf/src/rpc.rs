//! Messages exchanged with a device.
//!
//! Each framed message is one JSON document.  The client sends a `Hello` and then `RpcRequest`s;
//! the device answers with its own `Hello` and then one `RpcReply` per request, in order.

use datastore::{DataNode, InsertPosition, TreePath};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability a device must advertise for chunked framing.
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
/// Capability for the candidate datastore, needed for lock/edit/commit.
pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Hello {
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
}

/// A configuration datastore on the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Datastore {
    Running,
    Candidate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditOperation {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EditOperation::Merge => "merge",
            EditOperation::Replace => "replace",
            EditOperation::Create => "create",
            EditOperation::Delete => "delete",
            EditOperation::Remove => "remove",
        };
        write!(f, "{}", name)
    }
}

/// One edit-config change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Edit {
    pub operation: EditOperation,
    pub path: TreePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataNode>,
    /// Position within a user-ordered list, for entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<InsertPosition>,
}

impl Edit {
    pub fn new(operation: EditOperation, path: TreePath, data: Option<DataNode>) -> Self {
        Self {
            operation,
            path,
            data,
            insert: None,
        }
    }

    pub fn with_insert(mut self, insert: InsertPosition) -> Self {
        self.insert = Some(insert);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "operation")]
pub enum Rpc {
    Lock { target: Datastore },
    Unlock { target: Datastore },
    Get { path: TreePath },
    GetConfig { source: Datastore, path: TreePath },
    EditConfig { target: Datastore, edit: Edit },
    Commit,
    DiscardChanges,
    /// An rpc or action defined by the device's schema; the last step of `path` names it.
    Invoke { path: TreePath, input: DataNode },
}

impl Rpc {
    /// Protocol name of the operation, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Rpc::Lock { .. } => "lock",
            Rpc::Unlock { .. } => "unlock",
            Rpc::Get { .. } => "get",
            Rpc::GetConfig { .. } => "get-config",
            Rpc::EditConfig { .. } => "edit-config",
            Rpc::Commit => "commit",
            Rpc::DiscardChanges => "discard-changes",
            Rpc::Invoke { .. } => "invoke",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcRequest {
    pub message_id: u64,
    pub rpc: Rpc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcReply {
    pub message_id: u64,
    /// Data returned by get and get-config, or an operation's output; absent when there's none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rpc_error: Vec<RpcError>,
}

impl RpcReply {
    pub fn ok(message_id: u64) -> Self {
        Self {
            message_id,
            data: None,
            rpc_error: Vec::new(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSeverity {
    Error,
    Warning,
}

/// An error reported by the device, as in RFC 6241 section 4.3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcError {
    pub error_type: ErrorType,
    pub error_tag: String,
    pub error_severity: ErrorSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new<S: Into<String>>(error_type: ErrorType, tag: S, message: Option<String>) -> Self {
        Self {
            error_type,
            error_tag: tag.into(),
            error_severity: ErrorSeverity::Error,
            error_message: message,
            error_path: None,
            error_info: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_severity == ErrorSeverity::Error
    }

    /// Joins the messages (or tags) of several errors for display.
    pub fn summarize(errors: &[RpcError]) -> String {
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_message {
            Some(message) => write!(f, "{} ({})", message, self.error_tag),
            None => write!(f, "{}", self.error_tag),
        }
    }
}
