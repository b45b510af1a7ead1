use crate::dns::WireError;
use crate::response::Response;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Socket, connect, read or write failure, including timeouts and a
    /// stream that closed before the framed reply was complete.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Bytes that could not be encoded or decoded. `Request::resolve`
    /// reports these as an "invalid response" [`ResponseError`].
    #[error("invalid DNS message: {0}")]
    Wire(#[from] WireError),
    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl Error {
    /// The rejected response, if one was received.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Response(e) => e.response(),
            _ => None,
        }
    }
}

/// A response was received but rejected, or no usable response exists.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ResponseError {
    message: String,
    response: Option<Box<Response>>,
    #[source]
    source: Option<WireError>,
}

impl ResponseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
            source: None,
        }
    }

    pub fn with_response(message: impl Into<String>, response: Response) -> Self {
        Self {
            message: message.into(),
            response: Some(Box::new(response)),
            source: None,
        }
    }

    pub(crate) fn invalid(source: WireError) -> Self {
        Self {
            message: "invalid response".into(),
            response: None,
            source: Some(source),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }

    pub fn into_response(self) -> Option<Response> {
        self.response.map(|r| *r)
    }
}
