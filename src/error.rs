pub type SoireeResult<T> = Result<T, SoireeError>;

#[derive(thiserror::Error, Debug)]
pub enum SoireeError {
    #[error("validation error: {0}")]
    Validation(String),

    /// An image, background, or animation source was unreachable or undecodable.
    #[error("load error: {0}")]
    Load(String),

    /// The asset store rejected or failed an upload. `unauthorized` distinguishes
    /// auth failures from transient ones so callers can word the notice differently.
    #[error("upload error: {message}")]
    Upload { message: String, unauthorized: bool },

    /// A persisted document could not be parsed or violates the wire contract.
    #[error("document error: {0}")]
    Document(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SoireeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload {
            message: msg.into(),
            unauthorized: false,
        }
    }

    pub fn upload_unauthorized(msg: impl Into<String>) -> Self {
        Self::Upload {
            message: msg.into(),
            unauthorized: true,
        }
    }

    pub fn document(msg: impl Into<String>) -> Self {
        Self::Document(msg.into())
    }
}
