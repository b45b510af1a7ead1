//! Blocking DNS client transport.
//!
//! Queries go out over UDP first. A truncated UDP answer is thrown away and
//! the same request is repeated over TCP with two-byte length framing. Every
//! answer is checked against its request (identifier, response code) before
//! it reaches the caller.

pub mod client;
pub mod dns;
pub mod error;
pub mod request;
pub mod resolver;
pub mod response;

pub use client::{reverse_name, Client, ClientConfig, DNS_PORT};
pub use dns::{Message, Question, RecordData, RecordType, ResourceRecord, ResponseCode};
pub use error::{Error, ResponseError};
pub use request::Request;
pub use resolver::{BackendFn, Resolver};
pub use response::Response;
