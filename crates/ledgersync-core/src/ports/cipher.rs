//! Content cipher port
//!
//! Optional encryption of change files and metadata documents. Key
//! management is the implementor's business; the engine only passes bytes
//! through. Without a cipher, payloads are stored as plain JSON.

/// Port trait for payload encryption
pub trait IContentCipher: Send + Sync {
    /// Encrypts a payload before upload
    fn encrypt(&self, plain: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decrypts a downloaded payload
    fn decrypt(&self, sealed: &[u8]) -> anyhow::Result<Vec<u8>>;
}
