//! One connection, one request, one response.
//!
//! A session moves strictly forward through:
//! receive header → acquire user → receive payload (backup only) →
//! process → send header → send payload (restore/list only) → release user.

use crate::codec::{ByteOrder, WireCodec};
use crate::error::{SessionError, Stage, StoreError};
use crate::locks::{LockRegistry, LockStrategy};
use crate::protocol::{FILE_LIST_NAME, OpCode, Request, Response, SERVER_VERSION, StatusCode};
use crate::store::{FileStore, validate_name};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// State shared by every session of one server.
#[derive(Debug)]
pub struct ServerState {
    pub codec: WireCodec,
    pub locks: LockRegistry,
    pub store: FileStore,
}

impl ServerState {
    pub fn new(host: ByteOrder, strategy: LockStrategy, store: FileStore) -> Self {
        Self {
            codec: WireCodec::new(host),
            locks: LockRegistry::new(strategy),
            store,
        }
    }
}

/// What a completed session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub user_id: u32,
    pub op: u8,
    pub status: StatusCode,
}

pub struct Session<S> {
    stream: S,
    state: Arc<ServerState>,
    request: Request,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, state: Arc<ServerState>) -> Self {
        Self {
            stream,
            state,
            request: Request::default(),
        }
    }

    /// Drive the session to completion. The user id is held from the end of
    /// the header until this returns, whatever the outcome.
    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        let state = Arc::clone(&self.state);

        self.request = state
            .codec
            .read_request_header(&mut self.stream)
            .await
            .map_err(SessionError::at(Stage::ReceiveHeader))?;

        let user_id = self.request.user_id;
        debug!(
            user_id,
            op = self.request.op,
            file_name = %self.request.file_name,
            "request header received"
        );
        if self.request.version != SERVER_VERSION {
            warn!(user_id, version = self.request.version, "client version differs from server");
        }

        let _lease = state.locks.acquire(user_id).await;

        if self.request.op_code() == Some(OpCode::BackupFile) {
            self.receive_payload().await?;
        }

        let response = process(&self.request, &state.store).await;
        let status = response.status;
        self.send_response(response).await?;

        let _ = self.stream.shutdown().await;

        Ok(SessionOutcome {
            user_id,
            op: self.request.op,
            status,
        })
    }

    async fn receive_payload(&mut self) -> Result<(), SessionError> {
        let user_id = self.request.user_id;
        let store = &self.state.store;

        if let Err(e) = store.ensure_user_dir(user_id).await {
            warn!(user_id, error = %e, "failed to create user directory");
        }

        let size: u32 = self
            .state
            .codec
            .read_int(&mut self.stream)
            .await
            .map_err(SessionError::at(Stage::ReceivePayload))?;
        self.request.payload_size = size;

        let stored = store
            .write_payload(user_id, &self.request.file_name, size, &mut self.stream)
            .await;
        match stored {
            Ok(_) => self.request.payload_received = true,
            Err(e) => warn!(user_id, file_name = %self.request.file_name, error = %e, "upload not stored"),
        }
        Ok(())
    }

    async fn send_response(&mut self, mut response: Response) -> Result<(), SessionError> {
        let codec = self.state.codec;

        let header = codec
            .encode_response_header(&response)
            .map_err(SessionError::at(Stage::SendHeader))?;
        self.stream
            .write_all(&header)
            .await
            .map_err(|e| SessionError::at(Stage::SendHeader)(e.into()))?;

        if let Some(mut file) = response.payload.take() {
            codec
                .send_payload(&mut file, &mut self.stream, response.payload_size)
                .await
                .map_err(SessionError::at(Stage::SendPayload))?;
        } else {
            self.stream
                .flush()
                .await
                .map_err(|e| SessionError::at(Stage::SendHeader)(e.into()))?;
        }
        Ok(())
    }
}

/// Decide the response for a request against the current store contents.
/// Storage faults become `GenericError`.
pub async fn process(request: &Request, store: &FileStore) -> Response {
    let user_id = request.user_id;
    let result = match request.op_code() {
        Some(OpCode::BackupFile) => Ok(Response::status(if request.payload_received {
            StatusCode::BackupOk
        } else {
            StatusCode::GenericError
        })),
        Some(OpCode::RestoreFile) => restore(request, store).await,
        Some(OpCode::DeleteFile) => delete(request, store).await,
        Some(OpCode::GenerateFileList) => file_list(user_id, store).await,
        None => {
            warn!(user_id, op = request.op, "unknown op");
            Ok(Response::status(StatusCode::GenericError))
        }
    };

    let response = result.unwrap_or_else(|e| {
        warn!(user_id, op = request.op, error = %e, "request failed");
        Response::status(StatusCode::GenericError)
    });
    info!(user_id, op = request.op, status = %response.status, "request processed");
    response
}

async fn restore(request: &Request, store: &FileStore) -> Result<Response, StoreError> {
    let user_id = request.user_id;
    let name = &request.file_name;

    if store.user_has_no_files(user_id).await? {
        return Ok(Response::status(StatusCode::UserHasNoFiles));
    }
    validate_name(name)?;
    if !store.contains(user_id, name).await? {
        return Ok(Response::status(StatusCode::FileNotFound));
    }

    let (size, file) = store.read_payload(user_id, name).await?;
    Response::with_file(StatusCode::RestoreOk, name, size, file)
        .ok_or_else(|| StoreError::InvalidName(name.clone()))
}

async fn delete(request: &Request, store: &FileStore) -> Result<Response, StoreError> {
    let user_id = request.user_id;
    let name = &request.file_name;

    if store.user_has_no_files(user_id).await? {
        return Ok(Response::status(StatusCode::UserHasNoFiles));
    }
    validate_name(name)?;
    if !store.contains(user_id, name).await? {
        return Ok(Response::status(StatusCode::FileNotFound));
    }

    let status = if store.delete_file(user_id, name).await? {
        StatusCode::DeleteOk
    } else {
        StatusCode::GenericError
    };
    Ok(Response::status(status))
}

async fn file_list(user_id: u32, store: &FileStore) -> Result<Response, StoreError> {
    if store.user_has_no_files(user_id).await? {
        return Ok(Response::status(StatusCode::UserHasNoFiles));
    }

    store.generate_manifest(user_id).await?;
    let (size, file) = store.read_manifest(user_id).await?;
    Response::with_file(StatusCode::ListOk, FILE_LIST_NAME, size, file)
        .ok_or_else(|| StoreError::InvalidName(FILE_LIST_NAME.to_string()))
}
