//! Controller variables over UDP, one MessagePack datagram per request.

use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::HandoffError,
    handoff::{element_name, Value, VariableTable, VariableTransport},
};

/// Reals per array write, keeping each datagram well under the UDP limit.
pub const ARRAY_CHUNK: usize = 512;

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Write {
        name: String,
        value: Value,
    },
    WriteArray {
        name: String,
        first_index: u32,
        values: Vec<f64>,
    },
    Read {
        name: String,
    },
}

impl Request {
    pub fn name(&self) -> &str {
        match self {
            Request::Write { name, .. }
            | Request::WriteArray { name, .. }
            | Request::Read { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Value(Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u32,
    pub body: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u32,
    pub body: Response,
}

pub struct UdpTransport {
    socket: UdpSocket,
    response_timeout: Duration,
    next_id: u32,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Binds `local_port` on all interfaces and connects to `address`.
    pub fn connect(
        local_port: u16,
        address: impl ToSocketAddrs,
        response_timeout: Duration,
    ) -> io::Result<UdpTransport> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], local_port)))?;
        socket.connect(address)?;
        socket.set_read_timeout(Some(response_timeout))?;

        Ok(UdpTransport {
            socket,
            response_timeout,
            next_id: 0,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    /// Keeps retrying [`UdpTransport::connect`] until the address resolves.
    pub fn connect_blocking(
        local_port: u16,
        address: &str,
        response_timeout: Duration,
        retry: Duration,
    ) -> UdpTransport {
        loop {
            match Self::connect(local_port, address, response_timeout) {
                Ok(transport) => return transport,
                Err(err) => {
                    warn!(%err, address, "controller unreachable, retrying");
                    thread::sleep(retry);
                }
            }
        }
    }

    fn request(&mut self, body: Request) -> Result<Response, HandoffError> {
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        let name = body.name().to_string();

        let datagram = rmp_serde::to_vec(&Envelope { id, body })?;
        self.socket.send(&datagram)?;

        let result = self.await_reply(id, name);
        // Stale replies shrink the read timeout; the next request gets the full window.
        self.socket.set_read_timeout(Some(self.response_timeout))?;
        result
    }

    fn await_reply(&mut self, id: u32, name: String) -> Result<Response, HandoffError> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            let len = match self.socket.recv(&mut self.buf) {
                Ok(len) => len,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(self.timeout());
                }
                Err(err) => return Err(err.into()),
            };

            let reply: Reply = rmp_serde::from_slice(&self.buf[..len])?;
            if reply.id == id {
                return match reply.body {
                    Response::Error(message) => Err(HandoffError::Rejected { name, message }),
                    body => Ok(body),
                };
            }

            debug!(expected = id, got = reply.id, "discarding stale reply");
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout());
            }
            self.socket.set_read_timeout(Some(remaining))?;
        }
    }

    fn timeout(&self) -> HandoffError {
        HandoffError::Timeout {
            timeout_ms: self.response_timeout.as_millis() as u64,
        }
    }

    fn expect_ack(&mut self, body: Request) -> Result<(), HandoffError> {
        let name = body.name().to_string();

        match self.request(body)? {
            Response::Ack => Ok(()),
            other => Err(HandoffError::Rejected {
                name,
                message: format!("unexpected response {:?}", other),
            }),
        }
    }
}

impl VariableTransport for UdpTransport {
    fn write(&mut self, name: &str, value: Value) -> Result<(), HandoffError> {
        self.expect_ack(Request::Write {
            name: name.to_string(),
            value,
        })
    }

    fn write_reals(
        &mut self,
        name: &str,
        first_index: usize,
        values: &[f64],
    ) -> Result<(), HandoffError> {
        for (chunk_idx, chunk) in values.chunks(ARRAY_CHUNK).enumerate() {
            self.expect_ack(Request::WriteArray {
                name: name.to_string(),
                first_index: (first_index + chunk_idx * ARRAY_CHUNK) as u32,
                values: chunk.to_vec(),
            })?;
        }
        Ok(())
    }

    fn read(&mut self, name: &str) -> Result<Value, HandoffError> {
        match self.request(Request::Read {
            name: name.to_string(),
        })? {
            Response::Value(value) => Ok(value),
            other => Err(HandoffError::Rejected {
                name: name.to_string(),
                message: format!("unexpected response {:?}", other),
            }),
        }
    }
}

impl VariableTable {
    /// Serves one request against the table.
    pub fn apply(&mut self, request: Request) -> Response {
        let result = match request {
            Request::Write { name, value } => self.write(&name, value).map(|_| Response::Ack),
            Request::WriteArray {
                name,
                first_index,
                values,
            } => self
                .write_reals(&name, first_index as usize, &values)
                .map(|_| Response::Ack),
            Request::Read { name } => self.read(&name).map(Response::Value),
        };

        result.unwrap_or_else(|err| Response::Error(err.to_string()))
    }
}

/// Answers one datagram from `socket` against `table`. Returns the request served.
pub fn serve_one(
    socket: &UdpSocket,
    table: &mut VariableTable,
    buf: &mut [u8],
) -> Result<Request, HandoffError> {
    let (len, peer) = socket.recv_from(buf)?;
    let envelope: Envelope = rmp_serde::from_slice(&buf[..len])?;
    let request = envelope.body.clone();

    let reply = Reply {
        id: envelope.id,
        body: table.apply(envelope.body),
    };
    socket.send_to(&rmp_serde::to_vec(&reply)?, peer)?;

    if let Request::WriteArray { name, first_index, values } = &request {
        debug!(
            first = %element_name(name, *first_index as usize),
            count = values.len(),
            "array written"
        );
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_serves_reads_and_writes() {
        let mut table = VariableTable::new();

        assert_eq!(
            table.apply(Request::Write {
                name: "Main.restart".into(),
                value: Value::Bool(true),
            }),
            Response::Ack
        );
        assert_eq!(
            table.apply(Request::Read {
                name: "Main.restart".into()
            }),
            Response::Value(Value::Bool(true))
        );
        assert!(matches!(
            table.apply(Request::Read {
                name: "Main.nothing".into()
            }),
            Response::Error(_)
        ));
    }

    #[test]
    fn array_writes_land_at_their_offset() {
        let mut table = VariableTable::new();

        table.apply(Request::WriteArray {
            name: "Main.x_coords".into(),
            first_index: 513,
            values: vec![4., 5.],
        });

        assert_eq!(table.real("Main.x_coords[513]"), Some(4.));
        assert_eq!(table.real("Main.x_coords[514]"), Some(5.));
    }

    #[test]
    fn envelopes_survive_encoding() {
        let envelope = Envelope {
            id: 7,
            body: Request::Write {
                name: "Main.status_message".into(),
                value: Value::Text("Idle".into()),
            },
        };

        let bytes = rmp_serde::to_vec(&envelope).unwrap();
        assert_eq!(rmp_serde::from_slice::<Envelope>(&bytes).unwrap(), envelope);
    }
}
