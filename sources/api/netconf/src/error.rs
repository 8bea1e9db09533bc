use snafu::Snafu;
use std::io;

use crate::rpc::RpcError;

/// Possible errors from talking to a NETCONF device.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to connect to {}: {}", addr, source))]
    Connect { addr: String, source: io::Error },

    #[snafu(display("Session I/O error: {}", source))]
    Io { source: io::Error },

    #[snafu(display("Invalid chunked framing: {}", msg))]
    Framing { msg: String },

    #[snafu(display("Message of {} bytes exceeds the maximum of {}", size, max))]
    MessageTooLarge { size: usize, max: usize },

    #[snafu(display("Failed to serialize RPC: {}", source))]
    Serialize { source: serde_json::Error },

    #[snafu(display("Failed to parse reply from device: {}", source))]
    Deserialize { source: serde_json::Error },

    #[snafu(display("Session closed by device while waiting for {}", waiting_for))]
    Closed { waiting_for: String },

    #[snafu(display("Device doesn't support {}", capability))]
    MissingCapability { capability: String },

    #[snafu(display("Reply message-id {} doesn't match request {}", got, expected))]
    MessageIdMismatch { expected: u64, got: u64 },

    #[snafu(display("Device rejected {}: {}", operation, RpcError::summarize(errors)))]
    Rpc {
        operation: String,
        errors: Vec<RpcError>,
    },
}

// The codec traits in tokio-util require their error type to come from io::Error.
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl Error {
    /// Errors the device reported, if the failure came from the device rather than the session.
    pub fn rpc_errors(&self) -> &[RpcError] {
        match self {
            Error::Rpc { errors, .. } => errors,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
