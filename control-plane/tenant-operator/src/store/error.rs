#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("resource version conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("kube api error: {0}")]
    Kube(kube::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ref resp) if resp.code == 404 => {
                StoreError::NotFound(resp.message.clone())
            }
            kube::Error::Api(ref resp)
                if resp.code == 409 && resp.reason == "AlreadyExists" =>
            {
                StoreError::AlreadyExists(resp.message.clone())
            }
            kube::Error::Api(ref resp) if resp.code == 409 => {
                StoreError::Conflict(resp.message.clone())
            }
            other => StoreError::Kube(other),
        }
    }
}
