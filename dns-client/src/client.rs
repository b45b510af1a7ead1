use crate::dns::{Message, Question, RecordData, RecordType};
use crate::error::{Error, ResponseError};
use crate::request::Request;
use crate::resolver::Resolver;
use crate::response::Response;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Default DNS port (UDP and TCP).
pub const DNS_PORT: u16 = 53;

/// ------------------------------------------------------------
/// Configuration
/// ------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream server every request is sent to unless overridden.
    pub server: SocketAddr,
    /// Bound on each `resolve` call. `None` waits forever.
    pub timeout: Option<Duration>,
    pub resolver: Resolver,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), DNS_PORT),
            timeout: None,
            resolver: Resolver::default(),
        }
    }
}

/// ------------------------------------------------------------
/// Client
/// ------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct Client {
    server: SocketAddr,
    resolver: Arc<Resolver>,
    timeout: Option<Duration>,
}

impl Client {
    /// Client using UDP with TCP fallback.
    pub fn new(server: SocketAddr) -> Self {
        Self::with_resolver(server, Resolver::default())
    }

    /// Client for `ip` on the standard port.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self::new(SocketAddr::new(ip, DNS_PORT))
    }

    pub fn with_resolver(server: SocketAddr, resolver: Resolver) -> Self {
        Self {
            server,
            resolver: Arc::new(resolver),
            timeout: None,
        }
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            server: config.server,
            resolver: Arc::new(config.resolver),
            timeout: config.timeout,
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Empty request with a random id, bound to this client's server and resolver.
    pub fn create_request(&self) -> Request {
        self.bind(Request::new(self.server, Arc::clone(&self.resolver)))
    }

    pub fn create_request_from(&self, message: Message) -> Request {
        self.bind(Request::from_message(
            message,
            self.server,
            Arc::clone(&self.resolver),
        ))
    }

    pub fn create_request_from_bytes(&self, bytes: &[u8]) -> Result<Request, Error> {
        Ok(self.create_request_from(Message::decode(bytes)?))
    }

    fn bind(&self, mut request: Request) -> Request {
        request.set_timeout(self.timeout);
        request
    }

    /// Asks for `name`/`record_type` with recursion desired.
    pub fn resolve(&self, name: &str, record_type: RecordType) -> Result<Response, Error> {
        let mut request = self.create_request();
        request.set_recursion_desired(true);
        request
            .questions_mut()
            .push(Question::new(name, record_type));
        request.resolve()
    }

    /// Addresses of `name`. Only A and AAAA are accepted; anything else is
    /// rejected without sending a query.
    pub fn lookup(&self, name: &str, record_type: RecordType) -> Result<Vec<IpAddr>, Error> {
        if !matches!(record_type, RecordType::A | RecordType::AAAA) {
            return Err(ResponseError::new(format!("invalid record type {record_type}")).into());
        }

        let response = self.resolve(name, record_type)?;
        let ips: Vec<IpAddr> = response
            .answers()
            .iter()
            .filter(|rr| rr.record_type == record_type)
            .filter_map(|rr| match rr.data {
                RecordData::A(ip) => Some(IpAddr::V4(ip)),
                RecordData::AAAA(ip) => Some(IpAddr::V6(ip)),
                _ => None,
            })
            .collect();

        if ips.is_empty() {
            return Err(ResponseError::with_response("no matching records", response).into());
        }
        Ok(ips)
    }

    /// Name that `ip` points back to, from its PTR record.
    pub fn reverse(&self, ip: IpAddr) -> Result<String, Error> {
        let response = self.resolve(&reverse_name(ip), RecordType::PTR)?;
        let name = response.answers().iter().find_map(|rr| match &rr.data {
            RecordData::PTR(name) => Some(name.clone()),
            _ => None,
        });
        name.ok_or_else(|| ResponseError::with_response("no matching records", response).into())
    }
}

/// `in-addr.arpa` / `ip6.arpa` name for `ip`.
pub fn reverse_name(ip: IpAddr) -> String {
    let mut name = String::with_capacity(72);
    match ip {
        IpAddr::V4(v4) => {
            for octet in v4.octets().iter().rev() {
                let _ = write!(name, "{}.", octet);
            }
            name.push_str("in-addr.arpa");
        }
        IpAddr::V6(v6) => {
            for byte in v6.octets().iter().rev() {
                let _ = write!(name, "{:x}.{:x}.", byte & 0x0F, byte >> 4);
            }
            name.push_str("ip6.arpa");
        }
    }
    name
}
