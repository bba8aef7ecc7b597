//! Register client used by devices that reach a controller they do not own.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration as StdDuration;

use crate::error::RuntimeError;
use crate::value::TagValue;

use super::{
    decode_value, encode_value, register_address, FC_READ_HOLDING, FC_WRITE_MULTIPLE,
    MBAP_HEADER_LEN, REGISTERS_PER_TAG,
};

const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_millis(500);

/// One connection to one controller's register server.
///
/// Connects lazily and drops the stream after any failure so the next call
/// reconnects. Every call is bounded by the configured timeout.
#[derive(Debug)]
pub struct RegisterClient {
    address: SocketAddr,
    unit_id: u8,
    timeout: StdDuration,
    transaction_id: u16,
    stream: Option<TcpStream>,
}

impl RegisterClient {
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            unit_id: 1,
            timeout: DEFAULT_TIMEOUT,
            transaction_id: 1,
            stream: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Read the value of tag `id`.
    pub fn receive(&mut self, id: u16) -> Result<TagValue, RuntimeError> {
        let start = register_address(id)?;
        let words = self.read_holding(start, REGISTERS_PER_TAG)?;
        Ok(decode_value([words[0], words[1]]))
    }

    /// Write `value` to tag `id`.
    pub fn send(&mut self, id: u16, value: &TagValue) -> Result<(), RuntimeError> {
        let start = register_address(id)?;
        let words = encode_value(value)?;
        self.write_multiple(start, &words)
    }

    pub fn read_holding(&mut self, start: u16, qty: u16) -> Result<Vec<u16>, RuntimeError> {
        let pdu = [
            FC_READ_HOLDING,
            (start >> 8) as u8,
            start as u8,
            (qty >> 8) as u8,
            qty as u8,
        ];
        let response = self.request(&pdu)?;
        check_exception(&response)?;
        if response.len() < 2 {
            return Err(RuntimeError::register("modbus response too short"));
        }
        let byte_count = response[1] as usize;
        if byte_count != usize::from(qty) * 2 || response.len() < 2 + byte_count {
            return Err(RuntimeError::register("modbus response truncated"));
        }
        Ok(response[2..2 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    pub fn write_multiple(&mut self, start: u16, words: &[u16]) -> Result<(), RuntimeError> {
        let qty = u16::try_from(words.len())
            .map_err(|_| RuntimeError::register("too many registers in one write"))?;
        let byte_count = u8::try_from(words.len() * 2)
            .map_err(|_| RuntimeError::register("too many registers in one write"))?;
        let mut pdu = Vec::with_capacity(6 + usize::from(byte_count));
        pdu.push(FC_WRITE_MULTIPLE);
        pdu.extend_from_slice(&start.to_be_bytes());
        pdu.extend_from_slice(&qty.to_be_bytes());
        pdu.push(byte_count);
        for word in words {
            pdu.extend_from_slice(&word.to_be_bytes());
        }
        let response = self.request(&pdu)?;
        check_exception(&response)?;
        if response.len() < 5 {
            return Err(RuntimeError::register("modbus response too short"));
        }
        Ok(())
    }

    fn request(&mut self, pdu: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        let result = self.exchange(pdu);
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    fn ensure_connected(&mut self) -> Result<&mut TcpStream, RuntimeError> {
        if self.stream.is_none() {
            let stream = TcpStream::connect_timeout(&self.address, self.timeout).map_err(|err| {
                RuntimeError::register(format!("modbus tcp connect {}: {err}", self.address))
            })?;
            let _ = stream.set_nodelay(true);
            let _ = stream.set_read_timeout(Some(self.timeout));
            let _ = stream.set_write_timeout(Some(self.timeout));
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| RuntimeError::register("modbus tcp not connected"))
    }

    fn next_transaction(&mut self) -> u16 {
        let current = self.transaction_id;
        self.transaction_id = self.transaction_id.wrapping_add(1);
        current
    }

    fn exchange(&mut self, pdu: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        let tx = self.next_transaction();
        let unit_id = self.unit_id;
        let length = u16::try_from(pdu.len() + 1)
            .map_err(|_| RuntimeError::register("modbus pdu too large"))?;
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
        frame.extend_from_slice(&tx.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu);

        let stream = self.ensure_connected()?;
        stream
            .write_all(&frame)
            .map_err(|err| RuntimeError::register(format!("modbus write request: {err}")))?;
        stream.flush().ok();

        let mut header = [0u8; MBAP_HEADER_LEN];
        stream
            .read_exact(&mut header)
            .map_err(|err| RuntimeError::register(format!("modbus read header: {err}")))?;
        let resp_tx = u16::from_be_bytes([header[0], header[1]]);
        if resp_tx != tx {
            return Err(RuntimeError::register(format!(
                "modbus transaction mismatch {resp_tx} != {tx}"
            )));
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length == 0 {
            return Err(RuntimeError::register("modbus response empty"));
        }
        let mut body = vec![0u8; length];
        stream
            .read_exact(&mut body)
            .map_err(|err| RuntimeError::register(format!("modbus read body: {err}")))?;
        Ok(body[1..].to_vec())
    }
}

fn check_exception(response: &[u8]) -> Result<(), RuntimeError> {
    match response.first() {
        None => Err(RuntimeError::register("modbus response empty")),
        Some(function) if function & 0x80 != 0 => {
            let code = response.get(1).copied().unwrap_or(0);
            Err(RuntimeError::register(format!("modbus exception code {code}")))
        }
        Some(_) => Ok(()),
    }
}
