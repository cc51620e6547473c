//! Client side of the backup protocol. One connection per request.

use crate::codec::WireCodec;
use crate::error::WireError;
use crate::protocol::{OpCode, SERVER_VERSION, StatusCode};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// A decoded server reply, payload included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub version: u8,
    pub status: u16,
    pub file_name: Option<String>,
    pub payload: Option<Vec<u8>>,
}

impl Reply {
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_wire(self.status)
    }

    /// Names from a file-list payload.
    pub fn file_list(&self) -> Option<Vec<String>> {
        let payload = self.payload.as_ref()?;
        Some(
            String::from_utf8_lossy(payload)
                .lines()
                .map(str::to_string)
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct BackupClient<A> {
    addr: A,
    codec: WireCodec,
}

impl<A> BackupClient<A>
where
    A: ToSocketAddrs + Clone,
{
    pub fn new(addr: A) -> Self {
        Self {
            addr,
            codec: WireCodec::default(),
        }
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        TcpStream::connect(self.addr.clone()).await
    }

    /// Upload `size` bytes from `source` under `name`.
    pub async fn backup_from<S>(
        &self,
        user_id: u32,
        name: &str,
        source: &mut S,
        size: u32,
    ) -> Result<Reply, WireError>
    where
        S: AsyncRead + Unpin,
    {
        let mut stream = self.connect().await?;
        let header = self.codec.encode_request_header(
            user_id,
            SERVER_VERSION,
            OpCode::BackupFile as u8,
            Some(name),
            None,
        )?;
        stream.write_all(&header).await?;
        self.codec.send_payload(source, &mut stream, size).await?;
        self.read_reply(&mut stream).await
    }

    pub async fn backup(&self, user_id: u32, name: &str, data: &[u8]) -> Result<Reply, WireError> {
        let size = u32::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds 4 GiB"))?;
        self.backup_from(user_id, name, &mut &data[..], size).await
    }

    /// Upload a local file under its own file name.
    pub async fn backup_file(&self, user_id: u32, path: &Path) -> Result<Reply, WireError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let mut file = File::open(path).await?;
        let len = file.metadata().await?.len();
        let size = u32::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file exceeds 4 GiB"))?;
        self.backup_from(user_id, name, &mut file, size).await
    }

    pub async fn restore(&self, user_id: u32, name: &str) -> Result<Reply, WireError> {
        self.request(user_id, OpCode::RestoreFile as u8, Some(name)).await
    }

    pub async fn delete(&self, user_id: u32, name: &str) -> Result<Reply, WireError> {
        self.request(user_id, OpCode::DeleteFile as u8, Some(name)).await
    }

    pub async fn list(&self, user_id: u32) -> Result<Reply, WireError> {
        self.request(user_id, OpCode::GenerateFileList as u8, None).await
    }

    /// Send a header-only request with an arbitrary op byte.
    pub async fn request(&self, user_id: u32, op: u8, name: Option<&str>) -> Result<Reply, WireError> {
        let mut stream = self.connect().await?;
        let header = self
            .codec
            .encode_request_header(user_id, SERVER_VERSION, op, name, None)?;
        stream.write_all(&header).await?;
        self.read_reply(&mut stream).await
    }

    async fn read_reply(&self, stream: &mut TcpStream) -> Result<Reply, WireError> {
        let header = self.codec.read_response_header(stream).await?;
        let payload = if header.file_name.is_some() {
            let mut data = Vec::new();
            self.codec.recv_payload(stream, &mut data).await?;
            Some(data)
        } else {
            None
        };
        Ok(Reply {
            version: header.version,
            status: header.status,
            file_name: header.file_name,
            payload,
        })
    }
}
