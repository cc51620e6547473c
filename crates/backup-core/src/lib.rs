//! backup-core: per-user file backup service
//!
//! Serves upload, restore, delete and list requests over TCP using a
//! fixed-layout little-endian protocol, one request per connection.
//! Sessions for the same user id are serialized; different users run in
//! parallel.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod locks;
pub mod protocol;
pub mod session;
pub mod store;

pub use client::{BackupClient, Reply};
pub use codec::{ByteOrder, WireCodec};
pub use config::ServerConfig;
pub use locks::{LockRegistry, LockStrategy};
pub use protocol::{OpCode, StatusCode};
pub use session::{ServerState, Session};
pub use store::FileStore;

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Bootstrap the store and serve until Ctrl-C.
pub async fn run(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = FileStore::new(&config.root_dir);
    store.init().await?;

    let host = ByteOrder::host();
    let state = Arc::new(ServerState::new(host, config.lock_strategy(), store));

    let listener = TcpListener::bind((config.bind_addr.as_str(), config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        root = %state.store.root().display(),
        ?host,
        lock = ?state.locks.strategy(),
        "backup server listening"
    );

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await;

    info!("backup server stopped");
    Ok(())
}

/// Accept connections until `shutdown` resolves, one task per connection.
pub async fn serve<F>(listener: TcpListener, state: Arc<ServerState>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    let span = info_span!("session", %peer);
                    tokio::spawn(
                        async move {
                            debug!("connection accepted");
                            match Session::new(stream, state).run().await {
                                Ok(outcome) => info!(
                                    user_id = outcome.user_id,
                                    status = %outcome.status,
                                    "session complete"
                                ),
                                Err(e) => warn!(error = %e, "session aborted"),
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }
}
