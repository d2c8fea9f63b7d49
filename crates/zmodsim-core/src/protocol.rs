//! Protocol engine: validation, function-code dispatch, exception mapping
//! (spec.md §4.3).

use crate::frame::{encode_frame, parse_mbap, MbapHeader, MBAP_HEADER_SIZE};
use crate::store::RegisterStore;
use std::sync::Arc;
use tracing::{debug, trace};

/// Modbus exception codes this engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
}

const READ_BITS_MAX_QTY: u16 = 2000;
const READ_WORDS_MAX_QTY: u16 = 125;
const WRITE_COILS_MAX_QTY: u16 = 1968;
const WRITE_REGS_MAX_QTY: u16 = 123;

/// Validates requests, dispatches on function code, and produces framed
/// responses (or a silent drop) against a shared [`RegisterStore`].
pub struct Engine {
    unit_id: u8,
    store: Arc<RegisterStore>,
}

impl Engine {
    /// Build an engine bound to `unit_id` and backed by `store`.
    #[must_use]
    pub fn new(unit_id: u8, store: Arc<RegisterStore>) -> Self {
        Self { unit_id, store }
    }

    /// Process one received frame, returning bytes to send back or `None`
    /// for a silent drop (spec.md §4.3 steps 1-5).
    #[must_use]
    pub fn handle(&self, request: &[u8]) -> Option<Vec<u8>> {
        if request.len() < MBAP_HEADER_SIZE + 1 {
            return None;
        }
        let header = parse_mbap(request)?;
        if header.protocol_id != 0 {
            debug!(protocol_id = header.protocol_id, "dropping frame with non-zero protocol id");
            return None;
        }
        if header.unit_id != 0 && header.unit_id != self.unit_id {
            debug!(unit_id = header.unit_id, "dropping frame addressed to another unit");
            return None;
        }

        let pdu = &request[MBAP_HEADER_SIZE..];
        let fc = pdu[0];
        let body = &pdu[1..];
        trace!(fc, transaction_id = header.transaction_id, "dispatching request");

        let result = self.dispatch(fc, body);
        let response_pdu = match result {
            Ok(body) => {
                let mut pdu = Vec::with_capacity(1 + body.len());
                pdu.push(fc);
                pdu.extend(body);
                pdu
            }
            Err(exception) => vec![fc | 0x80, exception as u8],
        };

        let response_header =
            MbapHeader::for_response(header.transaction_id, header.unit_id, response_pdu.len());
        Some(encode_frame(&response_header, &response_pdu))
    }

    fn dispatch(&self, fc: u8, body: &[u8]) -> Result<Vec<u8>, u8> {
        match fc {
            0x01 => self.read_bits(body, READ_BITS_MAX_QTY, |s, c| self.store.read_coils(s, c)),
            0x02 => self.read_bits(body, READ_BITS_MAX_QTY, |s, c| self.store.read_discrete(s, c)),
            0x03 => self.read_words(body, READ_WORDS_MAX_QTY, |s, c| self.store.read_holding(s, c)),
            0x04 => self.read_words(body, READ_WORDS_MAX_QTY, |s, c| self.store.read_input(s, c)),
            0x05 => self.write_single_coil(body),
            0x06 => self.write_single_register(body),
            0x0F => self.write_multiple_coils(body),
            0x10 => self.write_multiple_registers(body),
            _ => Err(Exception::IllegalFunction),
        }
        .map_err(|e| e as u8)
    }

    fn read_bits(
        &self,
        body: &[u8],
        max_qty: u16,
        read: impl FnOnce(u16, u16) -> Result<Vec<u8>, zmodsim_common::error::OutOfRange>,
    ) -> Result<Vec<u8>, Exception> {
        if body.len() < 4 {
            return Err(Exception::IllegalDataValue);
        }
        let start = u16::from_be_bytes([body[0], body[1]]);
        let qty = u16::from_be_bytes([body[2], body[3]]);
        if qty == 0 || qty > max_qty {
            return Err(Exception::IllegalDataValue);
        }
        let bits = read(start, qty).map_err(|_| Exception::IllegalDataAddress)?;
        #[allow(clippy::cast_possible_truncation)]
        let mut response = vec![bits.len() as u8];
        response.extend(bits);
        Ok(response)
    }

    fn read_words(
        &self,
        body: &[u8],
        max_qty: u16,
        read: impl FnOnce(u16, u16) -> Result<Vec<u8>, zmodsim_common::error::OutOfRange>,
    ) -> Result<Vec<u8>, Exception> {
        // Same wire shape as read_bits; kept separate so the two families'
        // quantity limits (and call sites) stay independently readable.
        self.read_bits(body, max_qty, read)
    }

    fn write_single_coil(&self, body: &[u8]) -> Result<Vec<u8>, Exception> {
        if body.len() < 4 {
            return Err(Exception::IllegalDataValue);
        }
        let addr = u16::from_be_bytes([body[0], body[1]]);
        let value = u16::from_be_bytes([body[2], body[3]]);
        if value != 0x0000 && value != 0xFF00 {
            return Err(Exception::IllegalDataValue);
        }
        self.store
            .write_coil(addr, value == 0xFF00)
            .map_err(|_| Exception::IllegalDataAddress)?;
        Ok(body[0..4].to_vec())
    }

    fn write_single_register(&self, body: &[u8]) -> Result<Vec<u8>, Exception> {
        if body.len() < 4 {
            return Err(Exception::IllegalDataValue);
        }
        let addr = u16::from_be_bytes([body[0], body[1]]);
        let value = u16::from_be_bytes([body[2], body[3]]);
        self.store
            .write_register(addr, value)
            .map_err(|_| Exception::IllegalDataAddress)?;
        Ok(body[0..4].to_vec())
    }

    fn write_multiple_coils(&self, body: &[u8]) -> Result<Vec<u8>, Exception> {
        if body.len() < 5 {
            return Err(Exception::IllegalDataValue);
        }
        let start = u16::from_be_bytes([body[0], body[1]]);
        let qty = u16::from_be_bytes([body[2], body[3]]);
        let byte_count = body[4] as usize;
        if qty == 0 || qty > WRITE_COILS_MAX_QTY {
            return Err(Exception::IllegalDataValue);
        }
        let expected_bytes = usize::from(qty).div_ceil(8);
        if byte_count != expected_bytes || body.len() < 5 + expected_bytes {
            return Err(Exception::IllegalDataValue);
        }
        self.store
            .write_coils(start, qty, &body[5..5 + expected_bytes])
            .map_err(|_| Exception::IllegalDataAddress)?;
        Ok(echo_start_qty(start, qty))
    }

    fn write_multiple_registers(&self, body: &[u8]) -> Result<Vec<u8>, Exception> {
        if body.len() < 5 {
            return Err(Exception::IllegalDataValue);
        }
        let start = u16::from_be_bytes([body[0], body[1]]);
        let qty = u16::from_be_bytes([body[2], body[3]]);
        let byte_count = body[4] as usize;
        if qty == 0 || qty > WRITE_REGS_MAX_QTY {
            return Err(Exception::IllegalDataValue);
        }
        let expected_bytes = usize::from(qty) * 2;
        if byte_count != expected_bytes || body.len() < 5 + expected_bytes {
            return Err(Exception::IllegalDataValue);
        }
        self.store
            .write_registers(start, qty, &body[5..5 + expected_bytes])
            .map_err(|_| Exception::IllegalDataAddress)?;
        Ok(echo_start_qty(start, qty))
    }
}

fn echo_start_qty(start: u16, qty: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&start.to_be_bytes());
    out.extend_from_slice(&qty.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(unit_id: u8, holding: u16) -> Engine {
        Engine::new(unit_id, Arc::new(RegisterStore::new(100, 100, holding, 100)))
    }

    #[test]
    fn s1_read_holding_all_zero() {
        let engine = engine(1, 100);
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let resp = engine.handle(&req).unwrap();
        let mut expected = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x17, 0x01, 0x03, 0x14];
        expected.extend(vec![0u8; 20]);
        assert_eq!(resp, expected);
    }

    #[test]
    fn s2_write_then_read_single_holding() {
        let engine = engine(1, 100);
        let write_req = [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x05, 0x01, 0x23];
        let write_resp = engine.handle(&write_req).unwrap();
        assert_eq!(
            write_resp,
            vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x05, 0x01, 0x23]
        );

        let read_req = [0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x05, 0x00, 0x01];
        let read_resp = engine.handle(&read_req).unwrap();
        assert_eq!(
            read_resp,
            vec![0x00, 0x03, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x01, 0x23]
        );
    }

    #[test]
    fn s3_illegal_data_address() {
        let engine = engine(1, 100);
        let req = [0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x5F, 0x00, 0x0A];
        let resp = engine.handle(&req).unwrap();
        assert_eq!(resp, vec![0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
    }

    #[test]
    fn s4_illegal_data_value() {
        let engine = engine(1, 100);
        let req = [0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0xC8];
        let resp = engine.handle(&req).unwrap();
        assert_eq!(resp, vec![0x00, 0x05, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x03]);
    }

    #[test]
    fn s5_write_single_coil_roundtrip() {
        let engine = engine(1, 100);
        let set_req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x00, 0xFF, 0x00];
        engine.handle(&set_req).unwrap();
        let read_req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(
            engine.handle(&read_req).unwrap(),
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x01]
        );

        let clear_req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x00, 0x00, 0x00];
        engine.handle(&clear_req).unwrap();
        assert_eq!(
            engine.handle(&read_req).unwrap(),
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x00]
        );
    }

    #[test]
    fn s6_wrong_unit_id_silently_dropped() {
        let engine = engine(1, 100);
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert!(engine.handle(&req).is_none());
    }

    #[test]
    fn broadcast_unit_id_zero_is_accepted() {
        let engine = engine(1, 100);
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert!(engine.handle(&req).is_some());
    }

    #[test]
    fn non_zero_protocol_id_is_silently_dropped() {
        let engine = engine(1, 100);
        let req = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert!(engine.handle(&req).is_none());
    }

    #[test]
    fn short_frame_is_silently_dropped() {
        let engine = engine(1, 100);
        assert!(engine.handle(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01]).is_none());
    }

    #[test]
    fn unknown_function_code_is_illegal_function() {
        let engine = engine(1, 100);
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x63];
        let resp = engine.handle(&req).unwrap();
        assert_eq!(resp[7], 0x63 | 0x80);
        assert_eq!(resp[8], 0x01);
    }

    #[test]
    fn write_multiple_coils_reports_start_and_quantity() {
        let engine = engine(1, 100);
        let req = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x08, 0x01, 0x0F, 0x00, 0x00, 0x00, 0x03, 0x01, 0b0000_0101,
        ];
        let resp = engine.handle(&req).unwrap();
        assert_eq!(resp, vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x0F, 0x00, 0x00, 0x00, 0x03]);
        let read_req = [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x03];
        let read_resp = engine.handle(&read_req).unwrap();
        assert_eq!(read_resp[9], 0b0000_0101);
    }

    #[test]
    fn write_multiple_registers_bad_byte_count_is_illegal_value() {
        let engine = engine(1, 100);
        let req = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x01,
            0x00,
        ];
        let resp = engine.handle(&req).unwrap();
        assert_eq!(resp[7], 0x10 | 0x80);
        assert_eq!(resp[8], 0x03);
    }
}
