//! Register protocol: a Modbus TCP subset over holding registers.
//!
//! Every tag occupies [`REGISTERS_PER_TAG`] consecutive holding registers
//! starting at `id * REGISTERS_PER_TAG`. Values are signed 32-bit fixed-point
//! numbers with four decimal digits, low word first.

#![allow(missing_docs)]

use std::net::{SocketAddr, ToSocketAddrs};

mod client;
mod server;

pub use client::RegisterClient;
pub use server::RegisterServer;

use crate::error::RuntimeError;
use crate::value::TagValue;

pub const REGISTERS_PER_TAG: u16 = 2;
pub const FIXED_POINT_SCALE: f64 = 10_000.0;

pub(crate) const FC_READ_HOLDING: u8 = 0x03;
pub(crate) const FC_WRITE_MULTIPLE: u8 = 0x10;
pub(crate) const EX_ILLEGAL_FUNCTION: u8 = 0x01;
pub(crate) const EX_ILLEGAL_ADDRESS: u8 = 0x02;
pub(crate) const EX_ILLEGAL_VALUE: u8 = 0x03;
pub(crate) const MBAP_HEADER_LEN: usize = 6;

/// Wire protocol spoken by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterProtocol {
    #[default]
    ModbusTcp,
}

impl RegisterProtocol {
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "modbus-tcp" | "modbus_tcp" | "modbustcp" | "modbuswriterequest-tcp" => {
                Ok(Self::ModbusTcp)
            }
            _ => Err(RuntimeError::InvalidConfig(
                format!("unsupported controller protocol '{text}'").into(),
            )),
        }
    }
}

/// First holding register of a tag.
pub fn register_address(id: u16) -> Result<u16, RuntimeError> {
    id.checked_mul(REGISTERS_PER_TAG)
        .ok_or(RuntimeError::RegisterAddress(id))
}

/// Encode a numeric tag value into its register pair.
pub fn encode_value(value: &TagValue) -> Result<[u16; 2], RuntimeError> {
    let number = value
        .as_f64()
        .ok_or_else(|| RuntimeError::NonNumericRegister(value.to_string().into()))?;
    let scaled = (number * FIXED_POINT_SCALE).round();
    if !scaled.is_finite() || scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
        return Err(RuntimeError::NonNumericRegister(
            format!("{number} is outside the register range").into(),
        ));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let raw = scaled as i32 as u32;
    #[allow(clippy::cast_possible_truncation)]
    Ok([raw as u16, (raw >> 16) as u16])
}

/// Decode a register pair back into a tag value.
#[must_use]
pub fn decode_value(words: [u16; 2]) -> TagValue {
    let raw = (u32::from(words[1]) << 16) | u32::from(words[0]);
    #[allow(clippy::cast_possible_wrap)]
    let signed = raw as i32;
    TagValue::Number(f64::from(signed) / FIXED_POINT_SCALE)
}

/// Resolve a `host:port` controller address.
pub fn resolve_address(text: &str) -> Result<SocketAddr, RuntimeError> {
    text.to_socket_addrs()
        .map_err(|err| RuntimeError::InvalidConfig(format!("address '{text}': {err}").into()))?
        .next()
        .ok_or_else(|| {
            RuntimeError::InvalidConfig(format!("address '{text}' did not resolve").into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_keeps_four_decimals_and_sign() {
        let words = encode_value(&TagValue::Number(-3.25)).unwrap();
        assert_eq!(decode_value(words), TagValue::Number(-3.25));
        let words = encode_value(&TagValue::Number(1.0)).unwrap();
        assert_eq!(words, [10_000, 0]);
    }

    #[test]
    fn text_and_out_of_range_values_are_rejected() {
        assert!(matches!(
            encode_value(&TagValue::from("running")),
            Err(RuntimeError::NonNumericRegister(_))
        ));
        assert!(encode_value(&TagValue::Number(1e12)).is_err());
    }

    #[test]
    fn protocol_names_accept_legacy_spelling() {
        assert_eq!(
            RegisterProtocol::parse("ModbusWriteRequest-TCP").unwrap(),
            RegisterProtocol::ModbusTcp
        );
        assert!(RegisterProtocol::parse("dnp3").is_err());
    }
}
