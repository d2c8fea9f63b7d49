//! MBAP/PDU frame codec (spec.md §4.1).
//!
//! Modbus TCP carries a 7-byte MBAP header followed by a PDU whose first
//! byte is the function code. All multi-byte MBAP fields are big-endian.

/// Size of the MBAP header in bytes.
pub const MBAP_HEADER_SIZE: usize = 7;

/// Maximum legal Modbus TCP frame size (7-byte MBAP + 253-byte PDU).
pub const MAX_FRAME_SIZE: usize = MBAP_HEADER_SIZE + 253;

/// The 7-byte Modbus Application Protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Echoed verbatim in the response.
    pub transaction_id: u16,
    /// Must be `0x0000`; any other value causes the frame to be dropped.
    pub protocol_id: u16,
    /// Number of bytes following this field: 1 (unit id) + PDU length.
    pub length: u16,
    /// Slave address. `0` is broadcast.
    pub unit_id: u8,
}

impl MbapHeader {
    /// Build a response header for a PDU of `pdu_len` bytes, echoing
    /// `transaction_id` and `unit_id` from the originating request.
    #[must_use]
    pub fn for_response(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            #[allow(clippy::cast_possible_truncation)]
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Serialize this header into `buf[0..7]`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`MBAP_HEADER_SIZE`].
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6] = self.unit_id;
    }
}

/// Parse an MBAP header from the front of `buf`.
///
/// Returns `None` if fewer than [`MBAP_HEADER_SIZE`] bytes are available.
#[must_use]
pub fn parse_mbap(buf: &[u8]) -> Option<MbapHeader> {
    if buf.len() < MBAP_HEADER_SIZE {
        return None;
    }
    Some(MbapHeader {
        transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
        protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
        length: u16::from_be_bytes([buf[4], buf[5]]),
        unit_id: buf[6],
    })
}

/// Serialize `header` followed by `pdu` into a freshly allocated frame.
#[must_use]
pub fn encode_frame(header: &MbapHeader, pdu: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; MBAP_HEADER_SIZE + pdu.len()];
    header.write_to(&mut frame[..MBAP_HEADER_SIZE]);
    frame[MBAP_HEADER_SIZE..].copy_from_slice(pdu);
    frame
}

/// Given bytes received so far, return the total frame length (header + PDU)
/// once the header is parseable, so a handler can buffer until a complete
/// frame has arrived before dispatching it (spec.md §4.5's framing note).
///
/// Returns `None` if the header itself hasn't arrived yet.
#[must_use]
pub fn required_frame_len(buf: &[u8]) -> Option<usize> {
    let header = parse_mbap(buf)?;
    Some(MBAP_HEADER_SIZE + header.length.saturating_sub(1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_needs_seven_bytes() {
        assert!(parse_mbap(&[0u8; 6]).is_none());
        assert!(parse_mbap(&[0u8; 7]).is_some());
    }

    #[test]
    fn parse_roundtrips_fields() {
        let header = MbapHeader {
            transaction_id: 0x0102,
            protocol_id: 0,
            length: 6,
            unit_id: 1,
        };
        let mut buf = [0u8; MBAP_HEADER_SIZE];
        header.write_to(&mut buf);
        assert_eq!(buf, [0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01]);
        assert_eq!(parse_mbap(&buf), Some(header));
    }

    #[test]
    fn for_response_sets_length_to_pdu_plus_unit_id() {
        let header = MbapHeader::for_response(7, 1, 0x14 + 2);
        assert_eq!(header.length, 0x14 + 2 + 1);
        assert_eq!(header.protocol_id, 0);
    }

    #[test]
    fn encode_frame_concatenates_header_and_pdu() {
        let header = MbapHeader::for_response(1, 1, 2);
        let frame = encode_frame(&header, &[0x03, 0x00]);
        assert_eq!(frame.len(), MBAP_HEADER_SIZE + 2);
        assert_eq!(&frame[MBAP_HEADER_SIZE..], &[0x03, 0x00]);
    }

    #[test]
    fn required_frame_len_accounts_for_unit_id_byte() {
        // S1 scenario request: unit_id + fc + start + qty = 6 bytes of PDU-ish data
        let buf = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(required_frame_len(&buf), Some(13));
    }

    #[test]
    fn required_frame_len_none_until_header_complete() {
        assert_eq!(required_frame_len(&[0x00, 0x01, 0x00]), None);
    }
}
