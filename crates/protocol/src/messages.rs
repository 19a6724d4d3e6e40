//! Stream frame definitions.
//!
//! Text frames on the session stream are JSON objects tagged by `type`.
//! Pasted binary data travels as raw binary frames and never goes through
//! this enum.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// A text frame exchanged over the session stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Keystrokes typed by the user (client to server).
    Input {
        #[serde(default)]
        data: String,
    },
    /// Terminal output (server to client).
    Output {
        #[serde(default)]
        data: String,
    },
    /// Viewport geometry announcement (client to server).
    Resize {
        #[serde(default)]
        rows: u16,
        #[serde(default)]
        cols: u16,
    },
    /// Any frame kind this client does not understand.
    #[serde(other)]
    Unknown,
}

impl Frame {
    /// Creates an input frame.
    pub fn input(data: impl Into<String>) -> Self {
        Frame::Input { data: data.into() }
    }

    /// Creates a resize frame.
    pub fn resize(rows: u16, cols: u16) -> Self {
        Frame::Resize { rows, cols }
    }

    /// Returns the wire name of this frame kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Input { .. } => "input",
            Frame::Output { .. } => "output",
            Frame::Resize { .. } => "resize",
            Frame::Unknown => "unknown",
        }
    }

    /// Serializes the frame to its JSON text form.
    pub fn to_json(&self) -> Result<String> {
        if matches!(self, Frame::Unknown) {
            return Err(ProtocolError::UnsupportedFrame(self.kind().to_string()));
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Converts pasted binary data into the bytes of a raw binary frame.
///
/// Each UTF-16 code unit is truncated to its low 8 bits.
pub fn encode_binary_paste(data: &str) -> Vec<u8> {
    data.encode_utf16().map(|unit| (unit & 0xff) as u8).collect()
}
