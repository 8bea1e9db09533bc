//! A client session with one device.
//!
//! Requests are serialized: the framed stream sits behind an async mutex, and each RPC holds it
//! from sending the request until its reply arrives, so replies can't be mixed up between callers.
//! A caller dropped while waiting leaves its reply in the stream; the next caller skips it by
//! message-id.

use async_trait::async_trait;
use bytes::Bytes;
use datastore::{DataNode, TreePath};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::error;
use crate::framing::ChunkedCodec;
use crate::rpc::{Datastore, Edit, Hello, Rpc, RpcReply, RpcRequest, BASE_1_1, CANDIDATE};
use crate::{NetconfDataTreeService, NetconfRpcService, Result};

pub struct NetconfSession<T> {
    framed: Mutex<Framed<T, ChunkedCodec>>,
    next_message_id: AtomicU64,
    capabilities: Vec<String>,
    session_id: Option<u32>,
    target: Datastore,
}

impl<T> NetconfSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Exchanges hellos over the given stream and returns the established session.  The device
    /// must support base:1.1, since we only speak chunked framing.
    pub async fn establish(stream: T) -> Result<Self> {
        let mut framed = Framed::new(stream, ChunkedCodec::new());

        let ours = Hello {
            capabilities: vec![BASE_1_1.to_string()],
            session_id: None,
        };
        let body = serde_json::to_vec(&ours).context(error::SerializeSnafu)?;
        framed.send(Bytes::from(body)).await?;

        let frame = framed.next().await.context(error::ClosedSnafu {
            waiting_for: "hello",
        })??;
        let theirs: Hello = serde_json::from_slice(&frame).context(error::DeserializeSnafu)?;
        ensure!(
            theirs.capabilities.iter().any(|c| c == BASE_1_1),
            error::MissingCapabilitySnafu {
                capability: BASE_1_1
            }
        );
        debug!(
            "Established session {:?} with {} device capabilities",
            theirs.session_id,
            theirs.capabilities.len()
        );

        // Edits go to the candidate datastore when there is one, otherwise straight to running.
        let target = if theirs.capabilities.iter().any(|c| c == CANDIDATE) {
            Datastore::Candidate
        } else {
            Datastore::Running
        };

        Ok(Self {
            framed: Mutex::new(framed),
            next_message_id: AtomicU64::new(1),
            capabilities: theirs.capabilities,
            session_id: theirs.session_id,
            target,
        })
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    /// The datastore that locks and edits apply to.
    pub fn target(&self) -> Datastore {
        self.target
    }

    /// Sends one RPC and waits for its reply.  Device errors with error severity fail the call;
    /// warnings are logged and otherwise ignored.
    pub async fn rpc(&self, rpc: Rpc) -> Result<Option<DataNode>> {
        let operation = rpc.name();
        let mut framed = self.framed.lock().await;

        // Ids are taken under the lock so they increase in the order requests are sent.
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest { message_id, rpc };
        trace!("Sending {:?}", request);
        let body = serde_json::to_vec(&request).context(error::SerializeSnafu)?;
        framed.send(Bytes::from(body)).await?;

        let reply = loop {
            let frame = framed.next().await.context(error::ClosedSnafu {
                waiting_for: format!("{} reply", operation),
            })??;
            let reply: RpcReply =
                serde_json::from_slice(&frame).context(error::DeserializeSnafu)?;
            // A caller that gave up before its reply arrived leaves the reply behind us.
            if reply.message_id < message_id {
                debug!(
                    "Discarding reply to abandoned message-id {}",
                    reply.message_id
                );
                continue;
            }
            ensure!(
                reply.message_id == message_id,
                error::MessageIdMismatchSnafu {
                    expected: message_id,
                    got: reply.message_id,
                }
            );
            break reply;
        };
        drop(framed);

        let (errors, warnings): (Vec<_>, Vec<_>) =
            reply.rpc_error.into_iter().partition(|e| e.is_error());
        for warning in warnings {
            warn!("Device warning for {}: {}", operation, warning);
        }
        ensure!(
            errors.is_empty(),
            error::RpcSnafu { operation, errors }
        );

        debug!("{} (message-id {}) succeeded", operation, message_id);
        Ok(reply.data)
    }
}

/// Connects to a device over TCP and establishes a session.
pub async fn connect<A>(addr: A) -> Result<NetconfSession<TcpStream>>
where
    A: ToSocketAddrs + std::fmt::Display,
{
    let stream = TcpStream::connect(&addr)
        .await
        .context(error::ConnectSnafu {
            addr: addr.to_string(),
        })?;
    NetconfSession::establish(stream).await
}

#[async_trait]
impl<T> NetconfDataTreeService for NetconfSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn lock(&self) -> Result<()> {
        let target = self.target;
        self.rpc(Rpc::Lock { target }).await.map(|_| ())
    }

    async fn unlock(&self) -> Result<()> {
        let target = self.target;
        self.rpc(Rpc::Unlock { target }).await.map(|_| ())
    }

    async fn get(&self, path: &TreePath) -> Result<Option<DataNode>> {
        self.rpc(Rpc::Get { path: path.clone() }).await
    }

    async fn get_config(&self, path: &TreePath) -> Result<Option<DataNode>> {
        let source = self.target;
        let path = path.clone();
        self.rpc(Rpc::GetConfig { source, path }).await
    }

    async fn edit_config(&self, edit: Edit) -> Result<()> {
        let target = self.target;
        self.rpc(Rpc::EditConfig { target, edit }).await.map(|_| ())
    }

    async fn commit(&self) -> Result<()> {
        // Without a candidate datastore, edits are already live.
        if self.target == Datastore::Running {
            return Ok(());
        }
        self.rpc(Rpc::Commit).await.map(|_| ())
    }

    async fn discard_changes(&self) -> Result<()> {
        if self.target == Datastore::Running {
            return Ok(());
        }
        self.rpc(Rpc::DiscardChanges).await.map(|_| ())
    }
}

#[async_trait]
impl<T> NetconfRpcService for NetconfSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn invoke(&self, path: &TreePath, input: DataNode) -> Result<Option<DataNode>> {
        let path = path.clone();
        self.rpc(Rpc::Invoke { path, input }).await
    }
}
