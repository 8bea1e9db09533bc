/*!
# Background

The apiserver is a RESTCONF gateway.  It exposes a schema-governed data tree over HTTP, while the
data itself lives either in a local transactional data store or on remote devices reachable only
through NETCONF-style lock/edit/commit sessions.  Remote devices hang off mount points in the
gateway's own tree, each with its own schema.

# Design

A request path is resolved against the schema, crossing into mount points as needed, to a
`ResourceContext`.  The context carries the services of the scope the target lives in, most
importantly its `RestconfStrategy`: `LocalStrategy` wraps data store transactions and
`RemoteStrategy` wraps NETCONF edit sequences, and everything above them only sees units of work
that end in exactly one commit or cancel.

Reads go through the merge engine, which combines configuration and operational data, and are
then shaped by the `depth`, `fields` and `with-defaults` parameters.  Writes are single changes in
a unit of work.  Yang-patch documents run through the patch executor, which applies every edit in
one unit of work and commits nothing if any edit fails.

## API

Data resources live under `/rests/data`:

* `GET` reads the target.  Parameters: `content`, `depth`, `fields`, `with-defaults`.
* `PUT` replaces the target, answering 201 if it was created and 204 if it was replaced.
  Parameters: `insert`, `point`.
* `POST` creates the child given in the body and answers 201 with its location.  Parameters:
  `insert`, `point`.  POST to an action invokes it.
* `PATCH` merges the body into the target.  With a body of type `application/yang-patch+json` it
  runs the yang-patch and answers with its status document.
* `DELETE` removes the target, which must exist.

Rpcs are invoked with `POST /rests/operations/{module}:{rpc}`.

Errors are reported as RESTCONF error documents, with the status code, error-type and error-tag
given by `error::Error`.

# Current limitations

* Only JSON bodies are supported.
* Schemas are TOML documents describing the node tree; YANG modules have to be converted first.
* Leaf types are checked for their base type only.
*/

pub mod codec;
pub mod config;
pub mod error;
pub mod merge;
pub mod operations;
pub mod params;
pub mod patch;
pub mod resolver;
pub mod schema;
pub mod server;
pub mod shape;
pub mod strategy;

pub use config::Config;
pub use error::{Error, Result};
pub use server::serve;
