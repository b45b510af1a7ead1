use crate::dns::{Message, Opcode, Question, ResponseCode, WireError};
use crate::error::{Error, ResponseError};
use crate::resolver::Resolver;
use crate::response::Response;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A query bound to a destination server and the resolver that will carry it.
///
/// A request can be resolved any number of times; every call is a separate
/// network exchange.
#[derive(Debug, Clone)]
pub struct Request {
    message: Message,
    server: SocketAddr,
    resolver: Arc<Resolver>,
    timeout: Option<Duration>,
}

impl Request {
    /// Empty query with a random identifier.
    pub fn new(server: SocketAddr, resolver: Arc<Resolver>) -> Self {
        let mut message = Message::default();
        message.header.id = rand::rng().random();
        Self::from_message(message, server, resolver)
    }

    pub fn from_message(message: Message, server: SocketAddr, resolver: Arc<Resolver>) -> Self {
        Self {
            message,
            server,
            resolver,
            timeout: None,
        }
    }

    pub fn id(&self) -> u16 {
        self.message.header.id
    }

    pub fn set_id(&mut self, id: u16) {
        self.message.header.id = id;
    }

    pub fn opcode(&self) -> Opcode {
        self.message.header.opcode()
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.message.header.set_opcode(opcode);
    }

    pub fn recursion_desired(&self) -> bool {
        self.message.header.recursion_desired()
    }

    pub fn set_recursion_desired(&mut self, on: bool) {
        self.message.header.set_recursion_desired(on);
    }

    pub fn questions(&self) -> &[Question] {
        &self.message.questions
    }

    pub fn questions_mut(&mut self) -> &mut Vec<Question> {
        &mut self.message.questions
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn set_server(&mut self, server: SocketAddr) {
        self.server = server;
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Upper bound for one `resolve` call, including any fallback exchange.
    /// `None` blocks until the server answers.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        self.message.encode()
    }

    /// Encoded length in bytes.
    pub fn size(&self) -> Result<usize, WireError> {
        self.to_bytes().map(|b| b.len())
    }

    /// Sends the query through the bound resolver and validates the answer.
    ///
    /// Malformed replies become an "invalid response" [`ResponseError`]
    /// carrying the decoder error as its source. I/O errors are returned
    /// unchanged. A reply with a different identifier or a response code
    /// other than NOERROR is rejected with the reply attached to the error.
    pub fn resolve(&self) -> Result<Response, Error> {
        // an unrepresentable deadline is as good as none
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));
        let response = match self.resolver.resolve(self, deadline) {
            Ok(response) => response,
            Err(Error::Wire(e)) => return Err(ResponseError::invalid(e).into()),
            Err(e) => return Err(e),
        };

        if response.id() != self.id() {
            log::warn!(
                "[resolve] id mismatch from {}: sent {:#06x}, got {:#06x}",
                self.server,
                self.id(),
                response.id()
            );
            return Err(ResponseError::with_response(
                "mismatching request/response identifiers",
                response,
            )
            .into());
        }

        let rcode = response.response_code();
        if rcode != ResponseCode::NoError {
            return Err(ResponseError::with_response(rcode.to_string(), response).into());
        }

        Ok(response)
    }
}
