//! Protocol message types for the backup service
//!
//! Request:  [user_id u32][version u8][op u8]([name_len u16][name])([payload_size u32][payload])
//! Response: [version u8][status u16]([name_len u16][name][payload_size u32][payload])
//!
//! All multi-byte integers are little-endian on the wire.

use std::fmt;
use tokio::fs::File;

/// Protocol version stamped on every response
pub const SERVER_VERSION: u8 = 1;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 5468;

/// Reserved name of the per-user file listing
pub const FILE_LIST_NAME: &str = "__file_list.txt";

/// Payload bytes are moved through buffers of this size
pub const CHUNK_SIZE: usize = 1024;

/// Operations a client can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    BackupFile = 100,
    RestoreFile = 200,
    DeleteFile = 201,
    GenerateFileList = 202,
}

impl OpCode {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            100 => Some(Self::BackupFile),
            200 => Some(Self::RestoreFile),
            201 => Some(Self::DeleteFile),
            202 => Some(Self::GenerateFileList),
            _ => None,
        }
    }

    /// Ops whose request header carries a file name
    pub fn carries_name(self) -> bool {
        matches!(self, Self::BackupFile | Self::RestoreFile | Self::DeleteFile)
    }
}

/// Result codes returned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    DeleteOk = 208,
    BackupOk = 209,
    RestoreOk = 210,
    ListOk = 211,
    FileNotFound = 1001,
    UserHasNoFiles = 1002,
    GenericError = 1003,
}

impl StatusCode {
    pub fn from_wire(raw: u16) -> Option<Self> {
        match raw {
            208 => Some(Self::DeleteOk),
            209 => Some(Self::BackupOk),
            210 => Some(Self::RestoreOk),
            211 => Some(Self::ListOk),
            1001 => Some(Self::FileNotFound),
            1002 => Some(Self::UserHasNoFiles),
            1003 => Some(Self::GenericError),
            _ => None,
        }
    }

    /// Statuses followed by a file name and payload
    pub fn carries_file(self) -> bool {
        matches!(self, Self::RestoreOk | Self::ListOk)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as u16)
    }
}

/// Request parsed from one connection
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub user_id: u32,
    pub version: u8,
    /// Raw op byte; see [`Request::op_code`]
    pub op: u8,
    pub name_len: u16,
    pub file_name: String,
    pub payload_size: u32,
    /// Set only when exactly `payload_size` bytes were stored
    pub payload_received: bool,
}

impl Request {
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::from_wire(self.op)
    }
}

/// Response built by the process step
#[derive(Debug)]
pub struct Response {
    pub version: u8,
    pub status: StatusCode,
    pub file_name: String,
    pub payload_size: u32,
    /// Open source of the payload, streamed after the header and never
    /// serialized itself
    pub payload: Option<File>,
}

impl Response {
    pub fn status(status: StatusCode) -> Self {
        Self {
            version: SERVER_VERSION,
            status,
            file_name: String::new(),
            payload_size: 0,
            payload: None,
        }
    }

    /// Response that streams `payload` back under `file_name`.
    /// Returns `None` when the name does not fit the 2-byte length field.
    pub fn with_file(
        status: StatusCode,
        file_name: &str,
        payload_size: u32,
        payload: File,
    ) -> Option<Self> {
        u16::try_from(file_name.len()).ok()?;
        Some(Self {
            version: SERVER_VERSION,
            status,
            file_name: file_name.to_string(),
            payload_size,
            payload: Some(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_wire() {
        assert_eq!(OpCode::from_wire(100), Some(OpCode::BackupFile));
        assert_eq!(OpCode::from_wire(202), Some(OpCode::GenerateFileList));
        assert_eq!(OpCode::from_wire(7), None);
        assert!(OpCode::DeleteFile.carries_name());
        assert!(!OpCode::GenerateFileList.carries_name());
    }

    #[test]
    fn test_status_carries_file() {
        assert!(StatusCode::RestoreOk.carries_file());
        assert!(StatusCode::ListOk.carries_file());
        assert!(!StatusCode::FileNotFound.carries_file());
        assert_eq!(StatusCode::from_wire(1002), Some(StatusCode::UserHasNoFiles));
        assert_eq!(StatusCode::GenericError.to_string(), "GenericError (1003)");
    }

    #[tokio::test]
    async fn test_with_file_rejects_oversized_name() {
        let file = || File::from_std(tempfile::tempfile().unwrap());

        let resp = Response::with_file(StatusCode::ListOk, FILE_LIST_NAME, 10, file()).unwrap();
        assert_eq!(resp.version, SERVER_VERSION);
        assert_eq!(resp.file_name, FILE_LIST_NAME);
        assert!(resp.payload.is_some());

        let long = "n".repeat(u16::MAX as usize + 1);
        assert!(Response::with_file(StatusCode::RestoreOk, &long, 1, file()).is_none());
    }
}
