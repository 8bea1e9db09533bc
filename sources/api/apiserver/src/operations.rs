//! Invocation of rpcs and actions.
//!
//! The gateway doesn't implement any operations itself; backends register handlers by the
//! operation's qualified name, and remote devices carry out their own over NETCONF.  Actions also
//! receive the path of the data node they're invoked on.

use async_trait::async_trait;
use datastore::{DataNode, QName, TreePath};
use log::debug;
use netconf::NetconfRpcService;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{self, Result};

#[async_trait]
pub trait OperationService: Send + Sync {
    /// Invokes the operation at the given path (the rpc's own step, or the data node's path
    /// followed by the action's step) with the given input, returning its output if it has any.
    async fn invoke(&self, path: &TreePath, input: DataNode) -> Result<Option<DataNode>>;
}

pub type Handler = Box<dyn Fn(&TreePath, DataNode) -> Result<Option<DataNode>> + Send + Sync>;

/// Operation handlers keyed by operation name.
#[derive(Default)]
pub struct OperationRegistry {
    handlers: HashMap<QName, Handler>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, operation: QName, handler: F)
    where
        F: Fn(&TreePath, DataNode) -> Result<Option<DataNode>> + Send + Sync + 'static,
    {
        self.handlers.insert(operation, Box::new(handler));
    }

    pub fn with<F>(mut self, operation: QName, handler: F) -> Self
    where
        F: Fn(&TreePath, DataNode) -> Result<Option<DataNode>> + Send + Sync + 'static,
    {
        self.register(operation, handler);
        self
    }
}

#[async_trait]
impl OperationService for OperationRegistry {
    async fn invoke(&self, path: &TreePath, input: DataNode) -> Result<Option<DataNode>> {
        let operation = path
            .last()
            .map(|step| step.qname().clone())
            .context(error::BadRequestSnafu {
                path: path.to_string(),
                msg: "no operation named",
            })?;
        let handler = self
            .handlers
            .get(&operation)
            .context(error::OperationNotSupportedSnafu {
                operation: operation.to_string(),
                msg: "no implementation registered",
            })?;
        debug!("Invoking {} at {}", operation, path);
        handler(path, input)
    }
}

/// Operations of a mounted device, passed through its session.
pub struct RemoteOperations {
    service: Arc<dyn NetconfRpcService>,
}

impl RemoteOperations {
    pub fn new(service: Arc<dyn NetconfRpcService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl OperationService for RemoteOperations {
    async fn invoke(&self, path: &TreePath, input: DataNode) -> Result<Option<DataNode>> {
        debug!("Invoking {} on remote device", path);
        self.service
            .invoke(path, input)
            .await
            .context(error::RemoteOperationFailedSnafu { operation: "invoke" })
    }
}

#[cfg(test)]
mod test {
    use super::{OperationRegistry, OperationService, RemoteOperations};
    use crate::error::Error;
    use async_trait::async_trait;
    use datastore::{DataNode, PathArg, QName, TreePath};
    use netconf::{ErrorType, NetconfRpcService, RpcError};
    use std::sync::Arc;

    fn operation(name: &str) -> (QName, TreePath) {
        let qname = QName::new("example-jukebox", name).unwrap();
        let path = TreePath::from_steps(vec![PathArg::node(qname.clone())]);
        (qname, path)
    }

    #[tokio::test]
    async fn registered_handler_runs() {
        let (play, path) = operation("play");
        let registry = OperationRegistry::new().with(play, |_, input| Ok(Some(input)));
        let output = registry
            .invoke(&path, DataNode::empty_container())
            .await
            .unwrap();
        assert_eq!(output, Some(DataNode::empty_container()));
    }

    #[tokio::test]
    async fn unknown_operation() {
        let (_, path) = operation("stop");
        match OperationRegistry::new()
            .invoke(&path, DataNode::empty_container())
            .await
        {
            Err(Error::OperationNotSupported { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    /// A device that refuses every operation.
    struct RefusingDevice;

    #[async_trait]
    impl NetconfRpcService for RefusingDevice {
        async fn invoke(&self, _: &TreePath, _: DataNode) -> netconf::Result<Option<DataNode>> {
            Err(netconf::Error::Rpc {
                operation: "invoke".to_string(),
                errors: vec![RpcError::new(
                    ErrorType::Application,
                    "operation-failed",
                    Some("Not now".to_string()),
                )],
            })
        }
    }

    #[tokio::test]
    async fn remote_errors_keep_device_detail() {
        let (_, path) = operation("play");
        let remote = RemoteOperations::new(Arc::new(RefusingDevice));
        let err = remote
            .invoke(&path, DataNode::empty_container())
            .await
            .unwrap_err();
        match &err {
            Error::RemoteOperationFailed { operation, source } => {
                assert_eq!(operation, "invoke");
                assert_eq!(source.rpc_errors()[0].error_tag, "operation-failed");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
