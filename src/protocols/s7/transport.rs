//! ISO-on-TCP transport for the S7 fieldbus protocol.
//!
//! Implements the minimal wire surface the driver needs: COTP connection
//! setup with rack/slot TSAP addressing, S7 PDU-size negotiation, and
//! byte-granular Read Var / Write Var requests. Bit-level semantics are
//! handled above this layer; every request here moves whole bytes.
//!
//! The [`S7Transport`] trait is the seam the driver is tested through: the
//! production implementation talks TCP, tests substitute an in-memory
//! device image.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::core::error::{AgentError, Result};

use super::address::Area;

/// Fixed connect timeout. Read/write calls rely on the transport's
/// defaults.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// PDU length requested during negotiation.
const REQUESTED_PDU_LEN: u16 = 480;

/// Read Var / Write Var overhead within one PDU.
const PDU_OVERHEAD: usize = 18;

/// Byte-granular device access.
#[async_trait]
pub trait S7Transport: Send + Sync {
    /// Establish the connection and negotiate protocol parameters.
    async fn open(&mut self) -> Result<()>;

    /// Drop the connection. Safe to call when already closed.
    async fn close(&mut self);

    /// Read `buf.len()` bytes starting at `start` of the given area.
    async fn read_area(&mut self, area: Area, db: u16, start: usize, buf: &mut [u8])
        -> Result<()>;

    /// Write `data` starting at `start` of the given area.
    async fn write_area(&mut self, area: Area, db: u16, start: usize, data: &[u8]) -> Result<()>;
}

/// Production transport over ISO-on-TCP (RFC 1006, port 102).
pub struct IsoTcpTransport {
    endpoint: String,
    rack: u8,
    slot: u8,
    stream: Option<TcpStream>,
    pdu_len: u16,
    pdu_ref: u16,
}

impl IsoTcpTransport {
    /// Create a transport for `host:port` with the device's rack/slot.
    pub fn new(endpoint: impl Into<String>, rack: u8, slot: u8) -> Self {
        Self {
            endpoint: endpoint.into(),
            rack,
            slot,
            stream: None,
            pdu_len: 0,
            pdu_ref: 0,
        }
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    /// Send one TPKT frame and read the response frame.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(AgentError::NotConnected)?;

        stream
            .write_all(request)
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;

        let mut header = [0u8; 4];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;
        if header[0] != 0x03 {
            return Err(AgentError::Protocol("bad TPKT version".into()));
        }
        let total = u16::from_be_bytes([header[2], header[3]]) as usize;
        if total < 4 {
            return Err(AgentError::Protocol("bad TPKT length".into()));
        }

        let mut frame = vec![0u8; total];
        frame[..4].copy_from_slice(&header);
        stream
            .read_exact(&mut frame[4..])
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;
        Ok(frame)
    }

    /// Check an ack-data frame's S7 header error fields.
    fn check_ack(frame: &[u8]) -> Result<()> {
        if frame.len() < 19 {
            return Err(AgentError::Protocol("truncated response".into()));
        }
        let (class, code) = (frame[17], frame[18]);
        if class != 0 || code != 0 {
            return Err(AgentError::Protocol(format!(
                "device error class 0x{:02X} code 0x{:02X}",
                class, code
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl S7Transport for IsoTcpTransport {
    async fn open(&mut self) -> Result<()> {
        self.close().await;

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| AgentError::Connection(format!("connect {} timed out", self.endpoint)))?
            .map_err(|e| AgentError::Connection(format!("connect {}: {}", self.endpoint, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| AgentError::Connection(e.to_string()))?;
        self.stream = Some(stream);

        // COTP connection request with rack/slot encoded into the remote
        // TSAP, then the S7 communication-setup exchange.
        let cr = build_cotp_connect(self.rack, self.slot);
        let cc = self.exchange(&cr).await?;
        if cc.len() < 6 || cc[5] != 0xD0 {
            self.close().await;
            return Err(AgentError::Connection("COTP connection refused".into()));
        }

        let setup = build_setup_request(self.next_ref());
        let ack = self.exchange(&setup).await?;
        if let Err(e) = Self::check_ack(&ack) {
            self.close().await;
            return Err(e);
        }
        if ack.len() < 27 {
            self.close().await;
            return Err(AgentError::Protocol("truncated setup response".into()));
        }
        self.pdu_len = u16::from_be_bytes([ack[25], ack[26]]);
        if self.pdu_len == 0 {
            self.close().await;
            return Err(AgentError::Protocol("device negotiated zero PDU length".into()));
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.pdu_len = 0;
    }

    async fn read_area(
        &mut self,
        area: Area,
        db: u16,
        start: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if self.pdu_len != 0 && buf.len() + PDU_OVERHEAD > self.pdu_len as usize {
            return Err(AgentError::Protocol(format!(
                "read of {} bytes exceeds negotiated PDU",
                buf.len()
            )));
        }

        let request = build_read_request(self.next_ref(), area, db, start, buf.len());
        let frame = self.exchange(&request).await?;
        Self::check_ack(&frame)?;

        if frame.len() < 25 {
            return Err(AgentError::Protocol("truncated read response".into()));
        }
        let ret = frame[21];
        if ret != 0xFF {
            return Err(AgentError::Protocol(format!(
                "read rejected: {}",
                item_error(ret)
            )));
        }
        let payload = &frame[25..];
        if payload.len() < buf.len() {
            return Err(AgentError::Protocol(format!(
                "short read: wanted {} bytes, got {}",
                buf.len(),
                payload.len()
            )));
        }
        buf.copy_from_slice(&payload[..buf.len()]);
        Ok(())
    }

    async fn write_area(&mut self, area: Area, db: u16, start: usize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.pdu_len != 0 && data.len() + PDU_OVERHEAD > self.pdu_len as usize {
            return Err(AgentError::Protocol(format!(
                "write of {} bytes exceeds negotiated PDU",
                data.len()
            )));
        }

        let request = build_write_request(self.next_ref(), area, db, start, data);
        let frame = self.exchange(&request).await?;
        Self::check_ack(&frame)?;

        if frame.len() < 22 {
            return Err(AgentError::Protocol("truncated write response".into()));
        }
        let ret = frame[21];
        if ret != 0xFF {
            return Err(AgentError::Protocol(format!(
                "write rejected: {}",
                item_error(ret)
            )));
        }
        Ok(())
    }
}

/// COTP connection request. The remote TSAP carries the rack/slot pair.
fn build_cotp_connect(rack: u8, slot: u8) -> Vec<u8> {
    let remote_tsap = ((rack as u16) * 0x20 + slot as u16) | 0x0100;
    vec![
        0x03, 0x00, 0x00, 0x16, // TPKT, length 22
        0x11, 0xE0, // COTP: length 17, connection request
        0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // local TSAP 0x0100
        0xC2, 0x02, // remote TSAP parameter
        (remote_tsap >> 8) as u8,
        remote_tsap as u8,
    ]
}

/// S7 communication-setup request (PDU length negotiation).
fn build_setup_request(pdu_ref: u16) -> Vec<u8> {
    let mut frame = vec![
        0x03, 0x00, 0x00, 0x19, // TPKT, length 25
        0x02, 0xF0, 0x80, // COTP data header
        0x32, 0x01, // S7, job
        0x00, 0x00, // redundancy id
    ];
    frame.extend_from_slice(&pdu_ref.to_be_bytes());
    frame.extend_from_slice(&[
        0x00, 0x08, // parameter length
        0x00, 0x00, // data length
        0xF0, 0x00, // setup communication
        0x00, 0x01, // max AMQ caller
        0x00, 0x01, // max AMQ callee
    ]);
    frame.extend_from_slice(&REQUESTED_PDU_LEN.to_be_bytes());
    frame
}

/// Read Var request for a byte run.
fn build_read_request(pdu_ref: u16, area: Area, db: u16, start: usize, len: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(31);
    frame.extend_from_slice(&[0x03, 0x00, 0x00, 0x1F]); // TPKT, length 31
    frame.extend_from_slice(&[0x02, 0xF0, 0x80]); // COTP
    frame.extend_from_slice(&[0x32, 0x01, 0x00, 0x00]); // S7 job
    frame.extend_from_slice(&pdu_ref.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x0E, 0x00, 0x00]); // param len 14, data len 0
    frame.extend_from_slice(&[0x04, 0x01]); // read var, 1 item
    push_item(&mut frame, area, db, start, len);
    frame
}

/// Write Var request for a byte run.
fn build_write_request(pdu_ref: u16, area: Area, db: u16, start: usize, data: &[u8]) -> Vec<u8> {
    let total = 35 + data.len();
    let data_len = 4 + data.len();

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&[0x03, 0x00]);
    frame.extend_from_slice(&(total as u16).to_be_bytes());
    frame.extend_from_slice(&[0x02, 0xF0, 0x80]); // COTP
    frame.extend_from_slice(&[0x32, 0x01, 0x00, 0x00]); // S7 job
    frame.extend_from_slice(&pdu_ref.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x0E]); // param len 14
    frame.extend_from_slice(&(data_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0x05, 0x01]); // write var, 1 item
    push_item(&mut frame, area, db, start, data.len());
    // data part: byte-granular transport, length in bits
    frame.extend_from_slice(&[0x00, 0x04]);
    frame.extend_from_slice(&((data.len() as u16) * 8).to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Variable-specification item addressing `len` bytes at `start`.
fn push_item(frame: &mut Vec<u8>, area: Area, db: u16, start: usize, len: usize) {
    frame.extend_from_slice(&[0x12, 0x0A, 0x10, 0x02]); // any-type pointer, byte transport
    frame.extend_from_slice(&(len as u16).to_be_bytes());
    frame.extend_from_slice(&db.to_be_bytes());
    frame.push(area.code());
    let bit_addr = (start as u32) * 8;
    frame.extend_from_slice(&[
        (bit_addr >> 16) as u8,
        (bit_addr >> 8) as u8,
        bit_addr as u8,
    ]);
}

/// Human-readable meaning of an item return code.
fn item_error(code: u8) -> &'static str {
    match code {
        0x01 => "hardware fault",
        0x03 => "accessing the object not allowed",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        0x0A => "object does not exist",
        _ => "unknown item error",
    }
}
