//! # offsync Protocol
//!
//! Record lifecycle tags, conflict policies and sync messages for offsync.
//!
//! This crate provides:
//! - [`StateTag`] for the per-record sync lifecycle
//! - [`PublicState`] for the four user-visible classifications
//! - [`ConflictPolicy`] for automatic conflict resolution
//! - Push/pull messages exchanged with the transport
//! - CBOR encoding/decoding helpers
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod ids;
mod messages;
mod policy;
mod state;

pub use codec::{from_cbor, to_cbor};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{Body, Cursor, RecordId, Revision};
pub use messages::{
    PullRequest, PullResponse, PushKind, PushOutcome, PushRequest, RemoteChange, TransportFailure,
};
pub use policy::ConflictPolicy;
pub use state::{PublicState, StateTag};
