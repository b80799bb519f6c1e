use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The closed error taxonomy returned by core operations. The HTTP layer
/// maps each variant to a wire code, a human-readable message and a status
/// via [`Error::code`], [`Error::message`] and [`Error::http_status`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing or invalid credentials")]
    InvalidLogin,
    #[error("Malformed request")]
    InvalidRequest,
    #[error("Request body exceeds 4096 bytes")]
    PayloadTooLarge,
    #[error("No account with uid {0:?}")]
    ServerNotFound(String),
    #[error("The source account does not exist")]
    SourceServerNotFound,
    #[error("The target account does not exist")]
    TargetServerNotFound,
    #[error("Invalid amount")]
    InvalidAmount,
    #[error("The converted amount rounds to nothing")]
    CannotPayNothing,
    #[error("Insufficient balance")]
    CannotAfford,
    #[error("Amount exceeds the transaction limit")]
    TransactionLimit,
    #[error("Source username too long")]
    SourceUsernameTooLong,
    #[error("Target username too long")]
    UsernameTooLong,
    #[error("An account with uid {0:?} already exists")]
    ServerExists(String),
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl Error {
    /// The wire error code. Variants outside the client-facing taxonomy
    /// collapse into `ERR_INTERNALERROR`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidLogin => "ERR_INVALIDLOGIN",
            Error::InvalidRequest => "ERR_INVALIDREQUEST",
            Error::PayloadTooLarge => "ERR_PAYLOADTOOLARGE",
            Error::ServerNotFound(_) => "ERR_SERVERNOTFOUND",
            Error::SourceServerNotFound => "ERR_SOURCESERVERNOTFOUND",
            Error::TargetServerNotFound => "ERR_TARGETSERVERNOTFOUND",
            Error::InvalidAmount => "ERR_INVALIDAMOUNT",
            Error::CannotPayNothing => "ERR_CANNOTPAYNOTHING",
            Error::CannotAfford => "ERR_CANNOTAFFORD",
            Error::TransactionLimit => "ERR_TRANSACTIONLIMIT",
            Error::SourceUsernameTooLong => "ERR_SOURCEUSERNAMETOOLONG",
            Error::UsernameTooLong => "ERR_USERNAMETOOLONG",
            Error::ServerExists(_)
            | Error::StorageFailure(_)
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Config(_) => "ERR_INTERNALERROR",
        }
    }

    /// The human-readable message sent to clients. Kept stable because some
    /// clients display these verbatim.
    pub fn message(&self) -> &'static str {
        match self {
            Error::InvalidLogin => "Invalid login!",
            Error::InvalidRequest => "Invalid request.",
            Error::PayloadTooLarge => {
                "Request body too large. You may send a maximum of 4096 bytes."
            }
            Error::ServerNotFound(_) => "Server not found!",
            Error::SourceServerNotFound => r#"The "from" server does not exist!"#,
            Error::TargetServerNotFound => r#"The "to" server does not exist!"#,
            Error::InvalidAmount => "Invalid number!",
            Error::CannotPayNothing => "You cannot pay someone \u{a4}0.00!",
            Error::CannotAfford => "You cannot afford to do that!",
            Error::TransactionLimit => "The amount you specified exceeds the max spend!",
            Error::SourceUsernameTooLong => "The source username is too long!",
            Error::UsernameTooLong => "The target username is too long!",
            _ => "Internal error!",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidLogin => 401,
            Error::PayloadTooLarge => 413,
            Error::ServerExists(_)
            | Error::StorageFailure(_)
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Config(_) => 500,
            _ => 400,
        }
    }
}
