//! Plain DNS A-record lookups against a fixed resolver.
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const PUBLIC_RESOLVER: &str = "8.8.8.8:53";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_UDP_RESPONSE: usize = 4096;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("invalid hostname `{host}`: {err}")]
    InvalidName { host: String, err: String },
    #[error("invalid resolver address `{0}`")]
    InvalidResolver(String),
    #[error("dns query failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("dns message error: {0}")]
    Proto(String),
}

/// Resolves A records.
#[cfg_attr(test, mockall::automock)]
pub trait DnsResolver: Send + Sync {
    /// Addresses in the answer section, empty when there are none.
    fn lookup_a(&self, host: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
}

/// Sends single-question queries over UDP, with recursion desired.
pub struct UdpDnsResolver {
    server: SocketAddr,
    timeout: Duration,
}

impl UdpDnsResolver {
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    pub fn public() -> Result<Self, DnsError> {
        let server = PUBLIC_RESOLVER
            .parse()
            .map_err(|_| DnsError::InvalidResolver(PUBLIC_RESOLVER.to_string()))?;
        Ok(Self::new(server, DEFAULT_QUERY_TIMEOUT))
    }

    fn query(host: &str, id: u16) -> Result<Vec<u8>, DnsError> {
        let name = Name::from_ascii(host).map_err(|err| DnsError::InvalidName {
            host: host.to_string(),
            err: err.to_string(),
        })?;
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(Query::query(name, RecordType::A));
        message
            .to_vec()
            .map_err(|err| DnsError::Proto(err.to_string()))
    }
}

impl DnsResolver for UdpDnsResolver {
    fn lookup_a(&self, host: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let id: u16 = rand::random();
        let request = Self::query(host, id)?;

        let bind_addr = if self.server.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.send_to(&request, self.server)?;

        let mut buf = [0u8; MAX_UDP_RESPONSE];
        let len = loop {
            let (len, from) = socket.recv_from(&mut buf)?;
            if from == self.server {
                break len;
            }
            debug!(%from, "Ignoring dns answer from unexpected peer");
        };

        let response =
            Message::from_vec(&buf[..len]).map_err(|err| DnsError::Proto(err.to_string()))?;
        if response.id() != id {
            return Err(DnsError::Proto(format!(
                "response id {} does not match query id {id}",
                response.id()
            )));
        }
        debug!(host, code = %response.response_code(), answers = response.answers().len(), "Got dns answer");

        Ok(response
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                RData::A(a) => Some(a.0),
                _ => None,
            })
            .collect())
    }
}
