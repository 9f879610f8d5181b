//! Connection passthroughs
//!
//! Thin validity checks in front of the engine's connection primitives.

use std::path::Path;

use tasklane_core::{Engine, PreconditionError, SessionId, TaskResult, MAX_SESSION_ID};
use tracing::warn;

fn ensure_started(engine: &dyn Engine) -> TaskResult<()> {
    if engine.started() {
        Ok(())
    } else {
        warn!("Server is not running");
        Err(PreconditionError::NotStarted.into())
    }
}

fn ensure_payload(data: &[u8]) -> TaskResult<()> {
    if data.is_empty() {
        warn!("Refusing to send empty payload");
        return Err(PreconditionError::EmptyPayload.into());
    }
    Ok(())
}

/// Write bytes to a connection
pub fn send(engine: &dyn Engine, session: SessionId, data: &[u8]) -> TaskResult<()> {
    ensure_started(engine)?;
    ensure_payload(data)?;
    engine.send_to_connection(session, data)
}

/// Close a connection; `reset` discards whatever is still buffered
pub fn close(engine: &dyn Engine, session: SessionId, reset: bool) -> TaskResult<()> {
    ensure_started(engine)?;

    let role = engine.role();
    if role.is_master() {
        warn!("Cannot close connection {} from the master", session);
        return Err(PreconditionError::WrongContext {
            expected: "worker",
            actual: role,
        }
        .into());
    }

    engine.close_connection(session, reset)
}

/// Send a datagram through the UDP listener matching the address family
///
/// Addresses containing `':'` are treated as IPv6.
pub fn sendto(
    engine: &dyn Engine,
    address: &str,
    port: u16,
    data: &[u8],
    server_socket: Option<i32>,
) -> TaskResult<()> {
    ensure_started(engine)?;
    ensure_payload(data)?;

    let ipv6 = address.contains(':');
    if !engine.has_udp_listener(ipv6) {
        let family = if ipv6 { "IPv6" } else { "IPv4" };
        warn!("Cannot send datagram to {}: no {} UDP listener", address, family);
        return Err(PreconditionError::NoUdpListener { family }.into());
    }

    engine.send_datagram(address, port, data, server_socket)
}

/// Stream a file to a connection starting at `offset`
pub fn sendfile(
    engine: &dyn Engine,
    session: SessionId,
    path: &Path,
    offset: u64,
) -> TaskResult<()> {
    ensure_started(engine)?;

    if session == 0 || session > MAX_SESSION_ID {
        warn!("Invalid session id {}", session);
        return Err(PreconditionError::InvalidSession { session }.into());
    }

    let size = std::fs::metadata(path)
        .map_err(|e| {
            warn!("Cannot stat {:?}: {}", path, e);
            e
        })?
        .len();
    if size <= offset {
        warn!("File {:?} is {} bytes, nothing past offset {}", path, size, offset);
        return Err(PreconditionError::FileTooShort {
            path: path.to_path_buf(),
            offset,
        }
        .into());
    }

    engine.send_file(session, path, offset)
}
