//! Service primitives exchanged between the application and a
//! [`MasterConnection`](crate::conn::MasterConnection) or
//! [`SlaveConnection`](crate::conn::SlaveConnection).

/// Service-access-point value for Modbus. There is only one SAP in this stack,
/// so it is a constant rather than a field threaded through every primitive.
pub const MODBUS_SAP: u8 = 0;

/// Tags whether a primitive is a request, a response, or a locally-synthesized indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Request,
    Response,
    Indication,
}

/// Body of a `Read Multiple Holding Registers` request (function code `0x03`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHoldingRegistersRequest {
    pub first_reg: u16,
    pub num_reg: u16,
}

/// Body of a `Read Multiple Holding Registers` response (function code `0x03`).
///
/// `registers` holds at most 125 entries, the protocol maximum for this
/// function code (250 bytes of register data, plus header and CRC, fits
/// the 256-byte frame ceiling).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadHoldingRegistersResponse {
    pub registers: Vec<u16>,
}

impl ReadHoldingRegistersResponse {
    pub const MAX_REGISTERS: usize = 125;
}

/// A service-level message: request, response, or indication.
///
/// Distinct from the on-wire [`Frame`](crate::frame::Frame) — this is what
/// the application submits and receives, not what goes on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    /// Synthesized locally when a master's outstanding request goes unanswered.
    ResponseTimeout { address: u16 },
    ReadHoldingRegistersRequest {
        address: u16,
        body: ReadHoldingRegistersRequest,
    },
    ReadHoldingRegistersResponse {
        address: u16,
        body: ReadHoldingRegistersResponse,
    },
}

impl Primitive {
    /// The target/source address this primitive is tagged with.
    pub fn address(&self) -> u16 {
        match self {
            Primitive::ResponseTimeout { address } => *address,
            Primitive::ReadHoldingRegistersRequest { address, .. } => *address,
            Primitive::ReadHoldingRegistersResponse { address, .. } => *address,
        }
    }

    /// The primitive's operation tag.
    pub fn operation(&self) -> Operation {
        match self {
            Primitive::ResponseTimeout { .. } => Operation::Indication,
            Primitive::ReadHoldingRegistersRequest { .. } => Operation::Request,
            Primitive::ReadHoldingRegistersResponse { .. } => Operation::Response,
        }
    }

    /// Builds a `Response_Timeout.indication` primitive for `address`.
    pub fn timeout(address: u16) -> Self {
        Primitive::ResponseTimeout { address }
    }

    /// Builds a `Read_Holding_Registers.request` primitive.
    pub fn read_holding_registers_request(address: u16, first_reg: u16, num_reg: u16) -> Self {
        Primitive::ReadHoldingRegistersRequest {
            address,
            body: ReadHoldingRegistersRequest { first_reg, num_reg },
        }
    }

    /// Builds a `Read_Holding_Registers.response` primitive.
    pub fn read_holding_registers_response(address: u16, registers: Vec<u16>) -> Self {
        Primitive::ReadHoldingRegistersResponse {
            address,
            body: ReadHoldingRegistersResponse { registers },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn operation_tags_match_role() {
        assert_eq!(Primitive::timeout(1).operation(), Operation::Indication);
        assert_eq!(
            Primitive::read_holding_registers_request(1, 0x0C, 1).operation(),
            Operation::Request
        );
        assert_eq!(
            Primitive::read_holding_registers_response(1, vec![0x007B]).operation(),
            Operation::Response
        );
    }
}
