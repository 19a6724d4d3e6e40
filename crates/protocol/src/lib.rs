//! # Conductor Protocol Library
//!
//! Wire definitions shared by the Conductor client crates.
//!
//! ## Overview
//!
//! - **Stream frames**: JSON text frames tagged by `type` (`input`, `output`,
//!   `resize`) plus the byte encoding used for pasted binary data
//! - **API bodies**: request and response types of the session server's HTTP
//!   API, and the paths they are served under
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::Frame;
//!
//! let json = Frame::resize(24, 80).to_json().unwrap();
//! assert!(json.contains("\"type\":\"resize\""));
//!
//! match Frame::from_json(r#"{"type":"output","data":"$ "}"#).unwrap() {
//!     Frame::Output { data } => assert_eq!(data, "$ "),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Stream frames
//! - [`api`]: HTTP bodies and paths
//! - [`error`]: Error types

pub mod api;
pub mod error;
pub mod messages;

pub use api::{
    CreateSessionRequest, CreatedSession, LoginRequest, LoginResponse, RenameSessionRequest,
    SessionInfo,
};
pub use error::{ProtocolError, Result};
pub use messages::{encode_binary_paste, Frame};
