//! PDU ↔ wire-frame codec: the only place that knows the RTU byte layout.

use crate::crc;
use crate::primitive::{Primitive, ReadHoldingRegistersResponse};

/// Function codes this stack knows how to encode/decode.
///
/// Kept as an enum, not a bare `u8` match scattered through the codec, so a
/// future function code is one new variant plus one new arm rather than a
/// rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
}

impl FunctionCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            _ => None,
        }
    }
}

/// Header length (address + function code) common to every RTU frame.
const RTU_HDR_LEN: usize = 2;
/// CRC trailer length.
const RTU_CRC_LEN: usize = 2;
/// Hard ceiling on a frame's length on the wire.
#[cfg(not(feature = "unlimited_packet_size"))]
pub const MAX_FRAME_LEN: usize = 256;

/// Why a byte buffer could not be decoded into a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer may still be a valid frame in progress; wait for more bytes.
    NeedMoreData,
    /// The buffer's length was enough to judge it, but it is not well-formed:
    /// CRC mismatch or unsupported function code.
    Invalid,
}

/// Encodes `primitive` into the bytes that go on the wire, or `None` if the
/// primitive's shape cannot be represented in this codec (e.g. the producing
/// side submitted an indication, which never travels on the wire).
pub fn encode(primitive: &Primitive) -> Option<Vec<u8>> {
    match primitive {
        Primitive::ResponseTimeout { .. } => None,
        Primitive::ReadHoldingRegistersRequest { address, body } => {
            let mut out = Vec::with_capacity(8);
            out.push(*address as u8);
            out.push(FunctionCode::ReadHoldingRegisters as u8);
            out.extend_from_slice(&body.first_reg.to_be_bytes());
            out.extend_from_slice(&body.num_reg.to_be_bytes());
            crc::append(&mut out);
            Some(out)
        }
        Primitive::ReadHoldingRegistersResponse { address, body } => {
            let byte_count = body.registers.len() * 2;
            let mut out = Vec::with_capacity(RTU_HDR_LEN + 1 + byte_count + RTU_CRC_LEN);
            out.push(*address as u8);
            out.push(FunctionCode::ReadHoldingRegisters as u8);
            out.push(byte_count as u8);
            for reg in &body.registers {
                out.extend_from_slice(&reg.to_be_bytes());
            }
            crc::append(&mut out);
            Some(out)
        }
    }
}

/// Decodes a complete candidate frame into a primitive.
///
/// The caller (the RTU transmission FSM) is responsible for deciding when a
/// buffer represents one complete candidate frame — this function never
/// asks for "more data" because of inter-frame silence, only because the
/// buffer is too short for either known shape of the addressed function code.
///
/// With function code `0x03` a response is tried first (it is the shape with
/// a length field, so it can be told apart from a too-short request), then a
/// fixed-length request.
pub fn decode(buffer: &[u8]) -> Result<Primitive, DecodeError> {
    if buffer.len() < RTU_HDR_LEN {
        return Err(DecodeError::NeedMoreData);
    }
    let address = buffer[0] as u16;
    let function_code = match FunctionCode::from_u8(buffer[1]) {
        Some(fc) => fc,
        None => return Err(DecodeError::Invalid),
    };

    match function_code {
        FunctionCode::ReadHoldingRegisters => decode_read_holding_registers(buffer, address),
    }
}

fn decode_read_holding_registers(buffer: &[u8], address: u16) -> Result<Primitive, DecodeError> {
    // Try the response shape first: byte-count field right after the header.
    if buffer.len() > RTU_HDR_LEN {
        let byte_count = buffer[RTU_HDR_LEN] as usize;
        let expected_len = RTU_HDR_LEN + 1 + byte_count + RTU_CRC_LEN;
        if buffer.len() >= expected_len {
            if crc::validate(&buffer[..expected_len]) && byte_count % 2 == 0 {
                let registers = buffer[RTU_HDR_LEN + 1..RTU_HDR_LEN + 1 + byte_count]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect::<Vec<u16>>();
                if registers.len() <= ReadHoldingRegistersResponse::MAX_REGISTERS {
                    return Ok(Primitive::read_holding_registers_response(
                        address, registers,
                    ));
                }
            }
        }
    }

    // Fall back to the fixed-length request shape.
    const REQUEST_LEN: usize = RTU_HDR_LEN + 4 + RTU_CRC_LEN;
    if buffer.len() < REQUEST_LEN {
        return Err(DecodeError::NeedMoreData);
    }
    if !crc::validate(&buffer[..REQUEST_LEN]) {
        return Err(DecodeError::Invalid);
    }
    let first_reg = u16::from_be_bytes([buffer[2], buffer[3]]);
    let num_reg = u16::from_be_bytes([buffer[4], buffer[5]]);
    Ok(Primitive::read_holding_registers_request(
        address, first_reg, num_reg,
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encodes_request_scenario_2() {
        let prim = Primitive::read_holding_registers_request(1, 0x000C, 1);
        assert_eq!(
            encode(&prim).unwrap(),
            vec![0x01, 0x03, 0x00, 0x0C, 0x00, 0x01, 0x05, 0x44]
        );
    }

    #[test]
    fn encodes_response_scenario_2() {
        let prim = Primitive::read_holding_registers_response(1, vec![0x007B]);
        let bytes = encode(&prim).unwrap();
        assert_eq!(bytes, vec![0x01, 0x03, 0x02, 0x00, 0x7B, 0x78, 0x51]);
    }

    #[test]
    fn decodes_request_scenario_2() {
        let bytes = [0x01u8, 0x03, 0x00, 0x0C, 0x00, 0x01, 0x05, 0x44];
        let prim = decode(&bytes).unwrap();
        assert_eq!(prim, Primitive::read_holding_registers_request(1, 0x000C, 1));
    }

    #[test]
    fn decodes_response_scenario_2() {
        let bytes = [0x01u8, 0x03, 0x02, 0x00, 0x7B, 0x78, 0x51];
        let prim = decode(&bytes).unwrap();
        assert_eq!(
            prim,
            Primitive::read_holding_registers_response(1, vec![0x007B])
        );
    }

    #[test]
    fn short_buffer_needs_more_data() {
        assert_eq!(decode(&[0x01]), Err(DecodeError::NeedMoreData));
        assert_eq!(decode(&[0x01, 0x03, 0x00]), Err(DecodeError::NeedMoreData));
    }

    #[test]
    fn crc_mismatch_is_invalid() {
        let mut bytes = vec![0x01, 0x03, 0x00, 0x0C, 0x00, 0x01, 0x05, 0x44];
        *bytes.last_mut().unwrap() ^= 0xFF;
        assert_eq!(decode(&bytes), Err(DecodeError::Invalid));
    }

    #[test]
    fn unknown_function_code_is_invalid() {
        let bytes = [0x01u8, 0x99, 0x00, 0x00];
        assert_eq!(decode(&bytes), Err(DecodeError::Invalid));
    }

    #[test]
    fn round_trips_request_and_response() {
        for num_reg in 1u16..=5 {
            let req = Primitive::read_holding_registers_request(7, 10, num_reg);
            let bytes = encode(&req).unwrap();
            assert_eq!(decode(&bytes).unwrap(), req);
        }
        let resp = Primitive::read_holding_registers_response(7, vec![1, 2, 3, 4]);
        let bytes = encode(&resp).unwrap();
        assert_eq!(decode(&bytes).unwrap(), resp);
    }
}
