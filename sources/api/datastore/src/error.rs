use snafu::Snafu;

/// Possible errors from datastore operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Name '{}' has invalid format: {}", name, msg))]
    InvalidName { name: String, msg: String },

    #[snafu(display("Can't add children below leaf at {}", path))]
    NotAContainer { path: String },

    #[snafu(display("Step '{}' doesn't fit the node at {}", step, path))]
    KindMismatch { step: String, path: String },

    #[snafu(display("Node at {} is not a list", path))]
    NotAList { path: String },

    #[snafu(display("Insertion point {} not found in list {}", point, path))]
    PointNotFound { point: String, path: String },

    #[snafu(display("Failed to apply transaction '{}' to live data: {}", tx, source))]
    Replay {
        tx: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display(
        "Transaction '{}' conflicts with a change committed to {} after it began",
        tx,
        path
    ))]
    Conflict { tx: String, path: String },

    #[snafu(display("Data store logic error: {}", msg))]
    Internal { msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;
