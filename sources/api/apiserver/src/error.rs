use actix_web::http::StatusCode;
use netconf::ErrorType;
use serde::Serialize;
use snafu::Snafu;
use std::io;
use std::path::PathBuf;

// We keep resolution, validation, engine and server errors together so it's easy to define
// response codes and RESTCONF error tags for everything that can go wrong during a request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    // Resolution errors
    #[snafu(display("Invalid resource path '{}': {}", path, msg))]
    BadRequest { path: String, msg: String },

    #[snafu(display("Schema node '{}' not found under {}", name, parent))]
    NotFound { name: String, parent: String },

    #[snafu(display("Mount point at {} is not available: {}", path, msg))]
    MountUnavailable { path: String, msg: String },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Parameter errors
    #[snafu(display("Unknown parameter '{}'", name))]
    UnknownAttribute { name: String },

    #[snafu(display("Invalid {} parameter '{}': {}", name, value, msg))]
    InvalidValue {
        name: String,
        value: String,
        msg: String,
    },

    #[snafu(display("{}", msg))]
    BadElement { msg: String },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Body errors
    #[snafu(display("Malformed request body: {}", msg))]
    MalformedMessage { msg: String },

    #[snafu(display("Unknown element '{}' in {}", name, parent))]
    UnknownElement { name: String, parent: String },

    #[snafu(display("Invalid value for {}: {}", path, msg))]
    InvalidLeaf { path: String, msg: String },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Data errors
    #[snafu(display("Data already exists"))]
    AlreadyExists { path: String },

    #[snafu(display("Data does not exist"))]
    DataMissing { path: String },

    #[snafu(display(
        "Request could not be completed because the relevant data model content does not exist"
    ))]
    NoData { path: String },

    #[snafu(display("Data at {} was changed by another request", path))]
    Conflict { path: String },

    #[snafu(display("{} is not supported: {}", operation, msg))]
    OperationNotSupported { operation: String, msg: String },

    #[snafu(display("Operation {} failed: {}", operation, msg))]
    OperationFailed { operation: String, msg: String },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Backend errors
    #[snafu(display("Remote {} failed: {}", operation, source))]
    RemoteOperationFailed {
        operation: String,
        source: netconf::Error,
    },

    #[snafu(display("Commit failed: {}", source))]
    CommitFailed {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Data store error during {}: {}", op, source))]
    DataStore {
        op: String,
        #[snafu(source(from(datastore::Error, Box::new)))]
        source: Box<datastore::Error>,
    },

    #[snafu(display("Another thread poisoned the data store lock by panicking"))]
    DataStoreLock,

    #[snafu(display("Unable to serialize response: {}", source))]
    ResponseSerialization { source: serde_json::Error },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Startup errors
    #[snafu(display("Unable to read {}: {}", path.display(), source))]
    ReadFile { path: PathBuf, source: io::Error },

    #[snafu(display("Unable to parse {}: {}", path.display(), source))]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Invalid schema: {}", msg))]
    InvalidSchema { msg: String },

    #[snafu(display("Invalid configuration: {}", msg))]
    InvalidConfig { msg: String },

    #[snafu(display("Unable to bind to {}: {}", addr, source))]
    BindServer { addr: String, source: io::Error },

    #[snafu(display("Unable to start server: {}", source))]
    ServerStart { source: io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One entry of a RESTCONF error report, as used in error responses and yang-patch status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorEntry {
    pub error_type: ErrorType,
    pub error_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<serde_json::Value>,
}

impl Error {
    /// The RESTCONF error-tag for this error.
    pub fn error_tag(&self) -> &'static str {
        use Error::*;
        match self {
            BadRequest { .. } => "invalid-value",
            NotFound { .. } => "unknown-element",
            MountUnavailable { .. } => "data-missing",
            UnknownAttribute { .. } => "unknown-attribute",
            InvalidValue { .. } => "invalid-value",
            BadElement { .. } => "bad-element",
            MalformedMessage { .. } => "malformed-message",
            UnknownElement { .. } => "unknown-element",
            InvalidLeaf { .. } => "invalid-value",
            AlreadyExists { .. } => "data-exists",
            DataMissing { .. } => "data-missing",
            NoData { .. } => "data-missing",
            Conflict { .. } => "in-use",
            OperationNotSupported { .. } => "operation-not-supported",
            CommitFailed { source } => source.error_tag(),
            DataStoreLock
            | OperationFailed { .. }
            | RemoteOperationFailed { .. }
            | DataStore { .. }
            | ResponseSerialization { .. }
            | ReadFile { .. }
            | ParseToml { .. }
            | InvalidSchema { .. }
            | InvalidConfig { .. }
            | BindServer { .. }
            | ServerStart { .. } => "operation-failed",
        }
    }

    /// The RESTCONF error-type for this error.
    pub fn error_type(&self) -> ErrorType {
        use Error::*;
        match self {
            RemoteOperationFailed { .. } | OperationFailed { .. } | DataStore { .. } => {
                ErrorType::Application
            }
            CommitFailed { source } => source.error_type(),
            _ => ErrorType::Protocol,
        }
    }

    /// The HTTP status a request failing with this error gets.
    pub fn status_code(&self) -> StatusCode {
        use Error::*;
        match self {
            // 400 Bad Request
            BadRequest { .. } => StatusCode::BAD_REQUEST,
            NotFound { .. } => StatusCode::BAD_REQUEST,
            UnknownAttribute { .. } => StatusCode::BAD_REQUEST,
            InvalidValue { .. } => StatusCode::BAD_REQUEST,
            BadElement { .. } => StatusCode::BAD_REQUEST,
            MalformedMessage { .. } => StatusCode::BAD_REQUEST,
            UnknownElement { .. } => StatusCode::BAD_REQUEST,
            InvalidLeaf { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            NoData { .. } => StatusCode::NOT_FOUND,
            MountUnavailable { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AlreadyExists { .. } => StatusCode::CONFLICT,
            DataMissing { .. } => StatusCode::CONFLICT,
            Conflict { .. } => StatusCode::CONFLICT,

            // 501 Not Implemented
            OperationNotSupported { .. } => StatusCode::NOT_IMPLEMENTED,

            // Whatever the cause of the failure gets
            CommitFailed { source } => source.status_code(),

            // 500 Internal Server Error
            OperationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RemoteOperationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DataStore { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DataStoreLock => StatusCode::INTERNAL_SERVER_ERROR,
            ResponseSerialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ReadFile { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ParseToml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            InvalidSchema { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            InvalidConfig { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BindServer { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ServerStart { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The data path the error refers to, if there is one.
    fn error_path(&self) -> Option<String> {
        use Error::*;
        match self {
            AlreadyExists { path } | DataMissing { path } | NoData { path } => Some(path.clone()),
            Conflict { path } => Some(path.clone()),
            InvalidLeaf { path, .. } => Some(path.clone()),
            CommitFailed { source } => source.error_path(),
            _ => None,
        }
    }

    /// Builds the error report entries for this error.  Errors reported by a remote device are
    /// passed through as the device gave them.
    pub fn to_entries(&self) -> Vec<ErrorEntry> {
        let remote = match self {
            Error::RemoteOperationFailed { source, .. } => source.rpc_errors(),
            Error::CommitFailed { source } => return source.to_entries(),
            _ => &[],
        };
        if !remote.is_empty() {
            return remote
                .iter()
                .map(|e| ErrorEntry {
                    error_type: e.error_type,
                    error_tag: e.error_tag.clone(),
                    error_path: e.error_path.clone(),
                    error_message: e
                        .error_message
                        .clone()
                        .unwrap_or_else(|| self.to_string()),
                    error_info: e.error_info.clone(),
                })
                .collect();
        }

        vec![ErrorEntry {
            error_type: self.error_type(),
            error_tag: self.error_tag().to_string(),
            error_path: self.error_path(),
            error_message: self.to_string(),
            error_info: None,
        }]
    }
}
