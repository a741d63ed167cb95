//! # marionette-core
//!
//! Adaptation layer between a remote-automation command model and the
//! Marionette wire protocol spoken by Gecko-based browsers.
//!
//! A caller hands over a named [`Command`](command::Command) with an optional
//! session id and a parameter map. The layer rewrites it into the flat JSON
//! envelope Marionette expects, addressed to the actor negotiated during the
//! handshake, frames it onto a TCP socket, and normalizes the reply back into
//! a [`NormalizedResponse`](response::NormalizedResponse) with a numeric
//! status.
//!
//! ## Modules
//!
//! - [`protocol`] - `<length>:<json>` framing
//! - [`transport`] - Framed send/receive over an async stream
//! - [`command`] - Caller-side command model and command names
//! - [`rewrite`] - Command name and parameter rewriting into wire envelopes
//! - [`response`] - Status codes and reply normalization
//! - [`element`] - Element reference shape
//! - [`discovery`] - Candidate endpoint enumeration
//! - [`session`] - Connection state machine, handshake, and dispatch
//! - [`launcher`] - Starting and stopping the automation target
//! - [`driver`] - Launcher plus session behind one facade
//! - [`config`] - Persistent settings
//!
//! ## Example
//!
//! ```no_run
//! use marionette_core::command::{names, Command};
//! use marionette_core::config::BridgeConfig;
//! use marionette_core::session::SessionCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = SessionCoordinator::new();
//! session.connect(&BridgeConfig::load()).await?;
//!
//! let created = session.dispatch(Command::new(names::NEW_SESSION)).await?;
//! let url = session
//!     .dispatch(Command::new(names::GET_CURRENT_URL).with_optional_session(created.session_id().cloned()))
//!     .await?;
//! println!("{}", url.value());
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod element;
pub mod launcher;
pub mod protocol;
pub mod response;
pub mod rewrite;
pub mod session;
pub mod transport;
