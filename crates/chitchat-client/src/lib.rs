//! ChitChat client.
//!
//! [`ChatClient`] connects to a server over QUIC and exposes the three calls
//! of the chat service. [`ChatClient::subscribe`] hands the event stream to
//! an independent background task, so reading broadcasts never blocks
//! publishing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod transport;

pub use client::{ChatClient, Subscription};
pub use error::ClientError;
pub use transport::{Connection, TransportError};
