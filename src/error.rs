use thiserror::Error;

use crate::common::UserId;

/// Failures of the physical socket underneath the transport channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket send failed: {0}")]
    Send(String),
    #[error("socket is closed")]
    Closed,
}

/// Coarse classification of a failed HTTP fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    Server,
    Transient,
    Decode,
}

impl FetchErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => FetchErrorKind::BadRequest,
            401 | 403 => FetchErrorKind::Unauthorized,
            404 => FetchErrorKind::NotFound,
            s if s >= 500 => FetchErrorKind::Server,
            _ => FetchErrorKind::Transient,
        }
    }
}

/// Where a fetch failure surfaced; decides between a full error view and an inline one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    Navigation,
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPresentation {
    FullPage { status: u16, message: String },
    Inline { message: String },
}

/// A failed history load as the view keeps it: classification plus what to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub kind: FetchErrorKind,
    pub context: ErrorContext,
    pub retryable: bool,
    pub presentation: ErrorPresentation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} ({status:?}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::from_status(status),
            status: Some(status),
            message: body.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message)
    }

    /// Whether retrying the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Server | FetchErrorKind::Transient)
    }

    pub fn load_failure(&self, context: ErrorContext) -> LoadFailure {
        LoadFailure {
            kind: self.kind,
            context,
            retryable: self.is_retryable(),
            presentation: self.presentation(context),
        }
    }

    pub fn presentation(&self, context: ErrorContext) -> ErrorPresentation {
        let status = self.status.unwrap_or(match self.kind {
            FetchErrorKind::BadRequest => 400,
            FetchErrorKind::Unauthorized => 401,
            FetchErrorKind::NotFound => 404,
            _ => 500,
        });

        if context == ErrorContext::Navigation {
            let message = match self.kind {
                FetchErrorKind::BadRequest if self.message.is_empty() => {
                    "Invalid request parameters".to_string()
                }
                FetchErrorKind::Server | FetchErrorKind::Transient | FetchErrorKind::Decode => {
                    "Server error occurred while loading the page".to_string()
                }
                _ => self.message.clone(),
            };
            return ErrorPresentation::FullPage { status, message };
        }

        let message = match self.kind {
            FetchErrorKind::Unauthorized => "You need to login to perform this action".to_string(),
            FetchErrorKind::NotFound => "The requested resource was not found".to_string(),
            FetchErrorKind::Server => "Server error occurred. Please try again later.".to_string(),
            _ if self.message.is_empty() => "An error occurred".to_string(),
            _ => self.message.clone(),
        };
        ErrorPresentation::Inline { message }
    }
}

/// Rejected peer selection; raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("peer id `{0}` is not numeric")]
    InvalidPeerId(String),
    #[error("peer {0} is not known")]
    UnknownPeer(UserId),
    #[error("history load failed: {0}")]
    History(#[from] FetchError),
}

/// Rejected outgoing message. Nothing reaches the transport for the first three.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no conversation is open")]
    NoActivePeer,
    #[error("input is disabled until the peer is online")]
    InputDisabled,
    #[error("message is empty")]
    EmptyContent,
    #[error("socket is not connected")]
    NotConnected,
    #[error("no pending message with id {0}")]
    UnknownPending(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup failures of a chat session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid api origin: {0}")]
    Api(#[source] FetchError),
    #[error("could not resolve the signed-in user: {0}")]
    Identity(#[source] FetchError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Returned by event handlers; the dispatcher logs it and moves on.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);
