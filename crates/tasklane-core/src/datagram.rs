//! Datagram and receive-buffer decoding
//!
//! The engine hands datagram events over as one raw buffer:
//!
//! | offset | size | field                                          |
//! |--------|------|------------------------------------------------|
//! | 0      | 16   | address (IPv4 in bytes 0..4, IPv6 in all 16,   |
//! |        |      | domain datagrams: path length as LE u16 @ 0)   |
//! | 16     | 2    | port (LE)                                      |
//! | 18     | 4    | data length (LE)                               |
//! | 22     | n    | data                                           |
//!
//! For domain datagrams the sender path sits at the front of the data, so the
//! path length has to be read before the payload can be located.

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Size of the fixed datagram header
pub const DATAGRAM_HEADER_SIZE: usize = 22;

/// Which address family a datagram event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatagramKind {
    Udp4,
    Udp6,
    UnixDgram,
}

/// Sender of a datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Textual address (dotted quad, IPv6 text form or socket path)
    pub address: String,
    /// Source port; 0 for domain datagrams
    pub port: u16,
    /// Server-side socket the datagram arrived on
    pub server_socket: i32,
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub client: ClientInfo,
    pub payload: Vec<u8>,
}

/// Decode a raw datagram event buffer
///
/// Returns `None` for short or malformed buffers instead of an error.
pub fn decode_datagram(kind: DatagramKind, server_socket: i32, raw: &[u8]) -> Option<Datagram> {
    if raw.len() < DATAGRAM_HEADER_SIZE {
        debug!("Datagram shorter than header: {} bytes", raw.len());
        return None;
    }

    let port = u16::from_le_bytes([raw[16], raw[17]]);
    let length = u32::from_le_bytes([raw[18], raw[19], raw[20], raw[21]]) as usize;
    let data = raw.get(DATAGRAM_HEADER_SIZE..DATAGRAM_HEADER_SIZE + length)?;

    let (address, port, payload) = match kind {
        DatagramKind::Udp4 => {
            let addr = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);
            (addr.to_string(), port, data.to_vec())
        }
        DatagramKind::Udp6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&raw[0..16]);
            (Ipv6Addr::from(octets).to_string(), port, data.to_vec())
        }
        DatagramKind::UnixDgram => {
            let path_length = u16::from_le_bytes([raw[0], raw[1]]) as usize;
            let (header, payload) = split_header(data, path_length)?;
            let address = String::from_utf8_lossy(&header).into_owned();
            (address, 0, payload)
        }
    };

    Some(Datagram {
        client: ClientInfo {
            address,
            port,
            server_socket,
        },
        payload,
    })
}

/// Split a fixed-length header off the front of a received frame
///
/// The header must be strictly shorter than the frame; otherwise the result
/// is empty.
pub fn split_header(data: &[u8], header_len: usize) -> Option<(Vec<u8>, Vec<u8>)> {
    if header_len >= data.len() {
        return None;
    }
    let (header, payload) = data.split_at(header_len);
    Some((header.to_vec(), payload.to_vec()))
}

/// Build a datagram event buffer (the inverse of [`decode_datagram`])
///
/// Engines and test harnesses use this to hand datagrams to the router.
pub fn encode_datagram(kind: DatagramKind, address: &str, port: u16, payload: &[u8]) -> Option<Vec<u8>> {
    let mut addr = [0u8; 16];
    let mut data = Vec::new();

    match kind {
        DatagramKind::Udp4 => {
            let ip: Ipv4Addr = address.parse().ok()?;
            addr[0..4].copy_from_slice(&ip.octets());
        }
        DatagramKind::Udp6 => {
            let ip: Ipv6Addr = address.parse().ok()?;
            addr.copy_from_slice(&ip.octets());
        }
        DatagramKind::UnixDgram => {
            let path_length = u16::try_from(address.len()).ok()?;
            addr[0..2].copy_from_slice(&path_length.to_le_bytes());
            data.extend_from_slice(address.as_bytes());
        }
    }
    data.extend_from_slice(payload);

    let length = u32::try_from(data.len()).ok()?;
    let mut raw = Vec::with_capacity(DATAGRAM_HEADER_SIZE + data.len());
    raw.extend_from_slice(&addr);
    raw.extend_from_slice(&port.to_le_bytes());
    raw.extend_from_slice(&length.to_le_bytes());
    raw.extend_from_slice(&data);
    Some(raw)
}
