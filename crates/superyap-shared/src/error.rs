use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("Invalid store path: {0:?}")]
    InvalidPath(String),

    #[error("Invalid sticker index: {0}")]
    InvalidSticker(u32),

    #[error("Obfuscation key must not be empty")]
    EmptyKey,
}
