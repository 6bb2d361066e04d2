//! Signing key persistence. The file holds the 32-byte Ed25519 seed as
//! lowercase hex.
use std::path::Path;

use data_encoding::HEXLOWER;
use kontrol::Ed25519Signer;

#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("key file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("key file is not hex: {0}")]
    Decode(#[from] data_encoding::DecodeError),

    #[error("key file holds {0} bytes, expected 32")]
    Length(usize),
}

/// Load the signer from `path`, creating the file with a fresh key if it
/// does not exist. Without a path the key lives only for this process.
pub fn load_or_generate(path: Option<&Path>) -> Result<Ed25519Signer, KeyFileError> {
    let Some(path) = path else {
        tracing::warn!("no key file configured, tokens will not survive a restart");
        return Ok(Ed25519Signer::generate());
    };

    if path.exists() {
        let text = std::fs::read_to_string(path)?;
        let bytes = HEXLOWER.decode(text.trim().as_bytes())?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyFileError::Length(bytes.len()))?;
        let signer = Ed25519Signer::from_seed(&seed);
        tracing::info!("loaded signing key from {}", path.display());
        return Ok(signer);
    }

    let signer = Ed25519Signer::generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, HEXLOWER.encode(&signer.seed()))?;
    tracing::info!("generated signing key at {}", path.display());
    Ok(signer)
}
