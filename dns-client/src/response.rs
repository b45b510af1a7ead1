use crate::dns::{Message, Opcode, Question, ResourceRecord, ResponseCode, WireError};
use crate::request::Request;

/// A decoded answer together with the exact bytes it came from and the
/// request that produced it.
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    message: Message,
    bytes: Vec<u8>,
}

impl Response {
    /// Decodes `bytes` received for `request`.
    pub fn from_bytes(request: Request, bytes: Vec<u8>) -> Result<Self, WireError> {
        let message = Message::decode(&bytes)?;
        Ok(Self::new(request, message, bytes))
    }

    pub(crate) fn new(request: Request, message: Message, bytes: Vec<u8>) -> Self {
        Self {
            request,
            message,
            bytes,
        }
    }

    pub fn id(&self) -> u16 {
        self.message.header.id
    }

    pub fn answers(&self) -> &[ResourceRecord] {
        &self.message.answers
    }

    pub fn authorities(&self) -> &[ResourceRecord] {
        &self.message.authorities
    }

    pub fn additionals(&self) -> &[ResourceRecord] {
        &self.message.additionals
    }

    pub fn questions(&self) -> &[Question] {
        &self.message.questions
    }

    pub fn recursion_available(&self) -> bool {
        self.message.header.recursion_available()
    }

    pub fn authoritative(&self) -> bool {
        self.message.header.authoritative()
    }

    pub fn truncated(&self) -> bool {
        self.message.header.truncated()
    }

    pub fn opcode(&self) -> Opcode {
        self.message.header.opcode()
    }

    pub fn response_code(&self) -> ResponseCode {
        self.message.header.response_code()
    }

    /// Length of the raw payload.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{RecordClass, RecordData, RecordType};
    use crate::resolver::Resolver;
    use std::sync::Arc;

    #[test]
    fn projects_the_decoded_answer() {
        let request = Request::new("127.0.0.1:53".parse().unwrap(), Arc::new(Resolver::Null));
        let mut answer = Message::query(9, "example.com", RecordType::A);
        answer.header.set_response(true);
        answer.header.set_authoritative(true);
        answer.header.set_recursion_available(true);
        answer.authorities.push(ResourceRecord {
            name: "example.com".into(),
            record_type: RecordType::NS,
            class: RecordClass::IN,
            ttl: 3600,
            data: RecordData::NS("ns.example.com".into()),
        });
        let bytes = answer.encode().unwrap();

        let response = Response::from_bytes(request.clone(), bytes.clone()).unwrap();
        assert_eq!(response.id(), 9);
        assert!(response.authoritative());
        assert!(response.recursion_available());
        assert!(!response.truncated());
        assert_eq!(response.opcode(), Opcode::Query);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.answers().is_empty());
        assert_eq!(response.authorities().len(), 1);
        assert!(response.additionals().is_empty());
        assert_eq!(response.questions()[0].qtype, RecordType::A);
        assert_eq!(response.bytes(), bytes.as_slice());
        assert_eq!(response.size(), bytes.len());
        assert_eq!(response.request().id(), request.id());
    }
}
