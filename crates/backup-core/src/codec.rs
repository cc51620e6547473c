//! Fixed-layout wire codec.
//!
//! Every multi-byte integer travels little-endian. Values are held in host
//! order in memory; the codec is told the host byte order once and applies
//! the conversion in a single place ([`WireCodec::normalize`]).

use crate::error::WireError;
use crate::protocol::{CHUNK_SIZE, OpCode, Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte order of the machine running the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }
}

/// Unsigned integer that can be carried in a fixed-width field.
pub trait WireInt: Copy {
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;

    fn from_host_bytes(bytes: Self::Bytes) -> Self;
    fn to_host_bytes(self) -> Self::Bytes;
}

macro_rules! impl_wire_int {
    ($($t:ty),*) => {$(
        impl WireInt for $t {
            type Bytes = [u8; std::mem::size_of::<$t>()];

            fn from_host_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from_ne_bytes(bytes)
            }

            fn to_host_bytes(self) -> Self::Bytes {
                self.to_ne_bytes()
            }
        }
    )*};
}

impl_wire_int!(u8, u16, u32);

/// Decoded response header, as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: u8,
    pub status: u16,
    pub file_name: Option<String>,
}

impl ResponseHeader {
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_wire(self.status)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    host: ByteOrder,
}

impl WireCodec {
    pub fn new(host: ByteOrder) -> Self {
        Self { host }
    }

    // Wire order is little-endian; reverse when the host is not.
    fn normalize(&self, bytes: &mut [u8]) {
        if self.host == ByteOrder::Big {
            bytes.reverse();
        }
    }

    pub fn decode<T: WireInt>(&self, mut bytes: T::Bytes) -> T {
        self.normalize(bytes.as_mut());
        T::from_host_bytes(bytes)
    }

    pub fn encode<T: WireInt>(&self, value: T) -> T::Bytes {
        let mut bytes = value.to_host_bytes();
        self.normalize(bytes.as_mut());
        bytes
    }

    /// Append a fixed-width field to an outgoing buffer.
    pub fn put<T: WireInt>(&self, buf: &mut Vec<u8>, value: T) {
        buf.extend_from_slice(self.encode(value).as_ref());
    }

    /// Append `[len u16][bytes]`.
    pub fn put_name(&self, buf: &mut Vec<u8>, name: &str) -> Result<(), WireError> {
        let len = u16::try_from(name.len()).map_err(|_| WireError::NameTooLong(name.len()))?;
        self.put(buf, len);
        buf.extend_from_slice(name.as_bytes());
        Ok(())
    }

    /// Read exactly one fixed-width field.
    pub async fn read_int<T, R>(&self, reader: &mut R) -> Result<T, WireError>
    where
        T: WireInt,
        R: AsyncRead + Unpin,
    {
        let mut bytes = T::Bytes::default();
        let width = bytes.as_ref().len();
        reader
            .read_exact(bytes.as_mut())
            .await
            .map_err(|e| WireError::from_read(e, width))?;
        Ok(self.decode::<T>(bytes))
    }

    /// Read `len` bytes of file name.
    pub async fn read_name<R>(&self, reader: &mut R, len: u16) -> Result<String, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| WireError::from_read(e, len as usize))?;
        // Undecodable bytes become U+FFFD, which the store refuses as a name.
        Ok(match String::from_utf8(buf) {
            Ok(name) => name,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    /// Read the request header: user id, version, op and, for ops that
    /// carry one, the file name. The payload size is left on the stream.
    pub async fn read_request_header<R>(&self, reader: &mut R) -> Result<Request, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let mut request = Request {
            user_id: self.read_int(reader).await?,
            version: self.read_int(reader).await?,
            op: self.read_int(reader).await?,
            ..Default::default()
        };

        if request.op_code().is_some_and(OpCode::carries_name) {
            request.name_len = self.read_int(reader).await?;
            request.file_name = self.read_name(reader, request.name_len).await?;
        }

        Ok(request)
    }

    /// Encode `[version][status]` and, for file-bearing statuses,
    /// `[name_len][name]`.
    pub fn encode_response_header(&self, response: &Response) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(5 + response.file_name.len());
        self.put(&mut buf, response.version);
        self.put(&mut buf, response.status as u16);
        if response.status.carries_file() {
            self.put_name(&mut buf, &response.file_name)?;
        }
        Ok(buf)
    }

    /// Encode a request header, including the payload size for uploads.
    pub fn encode_request_header(
        &self,
        user_id: u32,
        version: u8,
        op: u8,
        file_name: Option<&str>,
        payload_size: Option<u32>,
    ) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(12);
        self.put(&mut buf, user_id);
        self.put(&mut buf, version);
        self.put(&mut buf, op);
        if let Some(name) = file_name {
            self.put_name(&mut buf, name)?;
        }
        if let Some(size) = payload_size {
            self.put(&mut buf, size);
        }
        Ok(buf)
    }

    pub async fn read_response_header<R>(&self, reader: &mut R) -> Result<ResponseHeader, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let version = self.read_int(reader).await?;
        let status: u16 = self.read_int(reader).await?;
        let file_name = if StatusCode::from_wire(status).is_some_and(StatusCode::carries_file) {
            let len = self.read_int(reader).await?;
            Some(self.read_name(reader, len).await?)
        } else {
            None
        };
        Ok(ResponseHeader {
            version,
            status,
            file_name,
        })
    }

    /// Write `[payload_size]` then exactly `size` bytes from `source`,
    /// `CHUNK_SIZE` at a time. A source that ends early is an error: the
    /// size has already been promised to the peer.
    pub async fn send_payload<S, W>(
        &self,
        source: &mut S,
        writer: &mut W,
        size: u32,
    ) -> Result<(), WireError>
    where
        S: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer.write_all(self.encode(size).as_ref()).await?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut remaining = size as usize;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE);
            source.read_exact(&mut buf[..want]).await?;
            writer.write_all(&buf[..want]).await?;
            remaining -= want;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Read `[payload_size]` then exactly that many bytes into `sink`.
    pub async fn recv_payload<R, W>(&self, reader: &mut R, sink: &mut W) -> Result<u32, WireError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let size: u32 = self.read_int(reader).await?;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut remaining = size as usize;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE);
            reader
                .read_exact(&mut buf[..want])
                .await
                .map_err(|e| WireError::from_read(e, want))?;
            sink.write_all(&buf[..want]).await?;
            remaining -= want;
        }
        sink.flush().await?;
        Ok(size)
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(ByteOrder::host())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FILE_LIST_NAME, SERVER_VERSION};

    #[test]
    fn test_fields_are_little_endian() {
        let codec = WireCodec::default();
        let mut buf = Vec::new();
        codec.put(&mut buf, 0x0102_0304u32);
        codec.put(&mut buf, 0x0506u16);
        codec.put(&mut buf, 7u8);
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01, 0x06, 0x05, 0x07]);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn test_big_endian_host_reverses() {
        // A big-endian host keeps the most significant byte first in memory,
        // so the codec must flip it on the way to and from the wire.
        let codec = WireCodec::new(ByteOrder::Big);
        let in_memory: u32 = codec.decode([0x2a, 0, 0, 0]);
        assert_eq!(in_memory.to_ne_bytes(), [0, 0, 0, 0x2a]);
        assert_eq!(codec.encode(in_memory), [0x2a, 0, 0, 0]);
    }

    #[cfg(target_endian = "little")]
    #[tokio::test]
    async fn test_big_endian_host_request_header() {
        let big = WireCodec::new(ByteOrder::Big);
        let wire = big
            .encode_request_header(42, SERVER_VERSION, OpCode::BackupFile as u8, Some("notes.txt"), Some(5))
            .unwrap();
        // Every multi-byte field is flipped relative to this host's layout.
        assert_eq!(&wire[..4], &42u32.to_be_bytes());
        assert_eq!(&wire[6..8], &9u16.to_be_bytes());
        assert_eq!(&wire[8..17], b"notes.txt");
        assert_eq!(&wire[17..], &5u32.to_be_bytes());

        let mut reader = wire.as_slice();
        let request = big.read_request_header(&mut reader).await.unwrap();
        assert_eq!(request.user_id, 42);
        assert_eq!(request.version, SERVER_VERSION);
        assert_eq!(request.op_code(), Some(OpCode::BackupFile));
        assert_eq!(request.name_len, 9);
        assert_eq!(request.file_name, "notes.txt");
        let size: u32 = big.read_int(&mut reader).await.unwrap();
        assert_eq!(size, 5);
        assert!(reader.is_empty());

        let plain = WireCodec::new(ByteOrder::Little);
        let misread: u32 = plain.read_int(&mut &wire[..4]).await.unwrap();
        assert_eq!(misread, u32::from_le_bytes(42u32.to_be_bytes()));
    }

    #[tokio::test]
    async fn test_read_request_header_with_name() {
        let codec = WireCodec::default();
        let mut wire: &[u8] = &[
            42, 0, 0, 0, // user id
            1,   // version
            200, // restore
            9, 0, b'n', b'o', b't', b'e', b's', b'.', b't', b'x', b't',
        ];
        let request = codec.read_request_header(&mut wire).await.unwrap();
        assert_eq!(request.user_id, 42);
        assert_eq!(request.op_code(), Some(OpCode::RestoreFile));
        assert_eq!(request.name_len, 9);
        assert_eq!(request.file_name, "notes.txt");
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_list_request_has_no_name() {
        let codec = WireCodec::default();
        let mut wire: &[u8] = &[7, 0, 0, 0, 1, 202, 0xff];
        let request = codec.read_request_header(&mut wire).await.unwrap();
        assert_eq!(request.op_code(), Some(OpCode::GenerateFileList));
        assert_eq!(request.name_len, 0);
        assert_eq!(wire, [0xff]);
    }

    #[tokio::test]
    async fn test_short_header_is_connection_closed() {
        let codec = WireCodec::default();
        let mut wire: &[u8] = &[1, 0];
        let err = codec.read_request_header(&mut wire).await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed { expected: 4 }));
    }

    #[test]
    fn test_response_header_layout() {
        let codec = WireCodec::default();
        let plain = Response::status(StatusCode::FileNotFound);
        assert_eq!(
            codec.encode_response_header(&plain).unwrap(),
            [SERVER_VERSION, 0xe9, 0x03]
        );

        let list = Response {
            file_name: FILE_LIST_NAME.to_string(),
            payload_size: 3,
            ..Response::status(StatusCode::ListOk)
        };
        let buf = codec.encode_response_header(&list).unwrap();
        assert_eq!(&buf[..5], &[SERVER_VERSION, 211, 0, 15, 0]);
        assert_eq!(&buf[5..], FILE_LIST_NAME.as_bytes());
    }

    #[tokio::test]
    async fn test_payload_is_chunked_and_exact() {
        let codec = WireCodec::default();
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| i as u8).collect();

        let mut wire = Vec::new();
        codec
            .send_payload(&mut data.as_slice(), &mut wire, data.len() as u32)
            .await
            .unwrap();
        assert_eq!(wire.len(), 4 + data.len());

        let mut received = Vec::new();
        let size = codec
            .recv_payload(&mut wire.as_slice(), &mut received)
            .await
            .unwrap();
        assert_eq!(size as usize, data.len());
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_send_payload_fails_on_short_source() {
        let codec = WireCodec::default();
        let mut wire = Vec::new();
        let err = codec
            .send_payload(&mut &b"abc"[..], &mut wire, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }
}
