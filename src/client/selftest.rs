//! Startup self-test probe
//!
//! With the `--test` flag the client, once running, sends itself one DNS `A`
//! query for a well-known hostname through the configured local endpoint and
//! reports the outcome. This exercises the full relay path: listener →
//! session → server → upstream resolver and back.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RecordType};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::info;

/// Hostname resolved by the probe.
const PROBE_HOSTNAME: &str = "example.com.";

/// Probe deadline; slightly above the relay's own per-query deadline so a
/// timeout here means the relay gave up, not us.
const PROBE_DEADLINE: Duration = Duration::from_secs(2);

/// Self-test outcome.
#[derive(Debug)]
pub struct ProbeReport {
    /// Round-trip time of the probe query.
    pub elapsed: Duration,
    /// Number of answer records in the reply.
    pub answers: usize,
    /// DNS response code of the reply.
    pub response_code: String,
}

/// Self-test failures.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build probe query: {0}")]
    Build(#[from] hickory_proto::error::ProtoError),

    #[error("probe I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reply within the probe deadline")]
    Timeout,
}

/// Send one `A` query for [`PROBE_HOSTNAME`] to `endpoint` and await the
/// reply.
///
/// # Errors
///
/// Returns [`ProbeError`] when the query cannot be built or sent, or when no
/// reply arrives within the probe deadline.
pub async fn run_probe(endpoint: SocketAddr) -> Result<ProbeReport, ProbeError> {
    let mut query = Message::new();
    query
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(Name::from_ascii(PROBE_HOSTNAME)?, RecordType::A));
    let query_bytes = query.to_vec()?;

    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let started = Instant::now();
    socket.send_to(&query_bytes, endpoint).await?;
    info!(%endpoint, hostname = PROBE_HOSTNAME, "self-test query sent");

    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(PROBE_DEADLINE, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ProbeError::Timeout)??;

    let reply = Message::from_vec(&buf[..len])?;
    let report = ProbeReport {
        elapsed: started.elapsed(),
        answers: reply.answers().len(),
        response_code: reply.response_code().to_string(),
    };
    info!(
        elapsed_ms = report.elapsed.as_millis() as u64,
        answers = report.answers,
        rcode = %report.response_code,
        "self-test reply received"
    );
    Ok(report)
}
