/// Misuse of the cipher configuration.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    #[error("Encryption requested but no key was configured.")]
    MissingKey,

    #[error("Encryption key must hold at least one byte.")]
    EmptyKey,
}

/// Reasons a session refuses to start. Failures once a session runs never surface here,
/// they end up in the per-device status instead.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("A session is already active on this server.")]
    AlreadyActive,

    #[error("Cipher is not usable: {0}")]
    Cipher(#[from] CipherError),
}
