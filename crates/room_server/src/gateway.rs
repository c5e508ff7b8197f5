//! Runs gateway transactions on tokio's blocking pool.
//!
//! A store transaction holds the database connection for its whole body, so
//! it must never run on an async worker thread.

use crate::error::RoomError;
use room_store::{RoomStore, RoomTx, StoreError};
use std::sync::Arc;
use tokio::task;

/// Runs `body` as one transaction of `store` on the blocking pool.
pub(crate) async fn transaction<T, F>(store: &Arc<dyn RoomStore>, body: F) -> Result<T, RoomError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn RoomTx) -> Result<T, RoomError> + Send + 'static,
{
    let store = store.clone();
    task::spawn_blocking(move || store.transaction(body))
        .await
        .map_err(|e| RoomError::Store(StoreError::Database(format!("store task failed: {e}"))))?
}
