//! The file-upload interface boundary: an external collaborator (object
//! storage for embedded images) is modeled only at its edge. The core never
//! implements an uploader; it ships a disabled stand-in so the rest of the
//! engine can depend on the trait unconditionally.

use async_trait::async_trait;

use crate::errors::DrawbridgeError;
use crate::model::FileMeta;

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upload(
        &self,
        session_id: &str,
        file_bytes: &[u8],
        mime_type: &str,
    ) -> Result<FileMeta, DrawbridgeError>;
}

/// The default collaborator: always reports itself unavailable. A real
/// object-storage client would be injected into the `Engine` in its place.
pub struct DisabledFileStore;

#[async_trait]
impl FileStore for DisabledFileStore {
    async fn upload(
        &self,
        _session_id: &str,
        _file_bytes: &[u8],
        _mime_type: &str,
    ) -> Result<FileMeta, DrawbridgeError> {
        Err(DrawbridgeError::FileStoreDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_store_always_refuses() {
        let store = DisabledFileStore;
        let err = store.upload("s1", b"bytes", "image/png").await.unwrap_err();
        assert!(matches!(err, DrawbridgeError::FileStoreDisabled));
    }
}
