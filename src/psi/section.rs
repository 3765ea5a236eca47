//! Generic long-section PSI reader/writer with CRC-32/MPEG-2 validation
//! (spec §3 "PSI Section", §4.2 "Binary Section Model").
//!
//! Grounded on the teacher's `psi/section.rs` (`SectionReader`), generalized
//! from read-only single-CRC-check parsing into a full parse/serialize pair:
//! the teacher only ever reads sections off the wire, this core also builds
//! them back (needed by `PmtSection::serialize`). Unlike the teacher, this
//! model does not consume a leading `pointer_field` byte — that belongs to
//! the TS-packet demultiplexer that hands a table codec its section bytes,
//! not to the section codec itself.

use crate::error::{CoreError, Result};
use crc::{Crc, CRC_32_MPEG_2};

const CRC_MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Largest payload (header through the byte before the CRC) a single long
/// section may carry, per spec §4.3.
pub const MAX_PSI_LONG_SECTION_PAYLOAD_SIZE: usize = 1021;

const FIXED_HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;

/// A parsed (or about-to-be-serialized) long PSI section, header and CRC
/// stripped out into fields, payload left as opaque bytes for the owning
/// table codec (e.g. `PmtSection`) to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTable {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub tid_extension: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub payload: Vec<u8>,
}

impl BinaryTable {
    /// Parses one long section: validates length framing and the
    /// CRC-32/MPEG-2 trailer before trusting any field.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_HEADER_LEN + CRC_LEN {
            return Err(CoreError::Format(format!(
                "section is only {} bytes, need at least {}",
                bytes.len(),
                FIXED_HEADER_LEN + CRC_LEN
            )));
        }

        let table_id = bytes[0];
        let section_syntax_indicator = bytes[1] & 0x80 != 0;
        let section_length = (((bytes[1] & 0x0F) as usize) << 8) | bytes[2] as usize;
        if section_length < FIXED_HEADER_LEN - 3 + CRC_LEN {
            return Err(CoreError::Format(format!(
                "section_length {section_length} too small for header tail + CRC"
            )));
        }

        let total_len = 3 + section_length;
        if total_len > bytes.len() {
            return Err(CoreError::Format(format!(
                "section declares {total_len} bytes, only {} available",
                bytes.len()
            )));
        }

        let tid_extension = u16::from_be_bytes([bytes[3], bytes[4]]);
        let version = (bytes[5] & 0x3E) >> 1;
        let current_next = bytes[5] & 0x01 != 0;
        let section_number = bytes[6];
        let last_section_number = bytes[7];

        let crc_offset = total_len - CRC_LEN;
        let computed = CRC_MPEG2.checksum(&bytes[0..crc_offset]);
        let stored = u32::from_be_bytes(bytes[crc_offset..total_len].try_into().expect("4-byte slice"));
        if computed != stored {
            return Err(CoreError::Format(format!(
                "CRC-32/MPEG-2 mismatch: computed 0x{computed:08X}, stored 0x{stored:08X}"
            )));
        }

        Ok(Self {
            table_id,
            section_syntax_indicator,
            tid_extension,
            version,
            current_next,
            section_number,
            last_section_number,
            payload: bytes[FIXED_HEADER_LEN..crc_offset].to_vec(),
        })
    }

    /// Serializes this section, computing and appending the CRC-32/MPEG-2
    /// trailer. Fails with `InvariantError` if the payload is too large for
    /// a single long section (the spec's 1021-byte cap on PMT's
    /// single-section payload, also the most the 12-bit `section_length`
    /// field could ever need to address).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PSI_LONG_SECTION_PAYLOAD_SIZE {
            return Err(CoreError::Invariant(format!(
                "section payload of {} bytes exceeds the {}-byte single-section cap",
                self.payload.len(),
                MAX_PSI_LONG_SECTION_PAYLOAD_SIZE
            )));
        }

        let section_length = 5 + self.payload.len() + CRC_LEN;

        let mut out = Vec::with_capacity(3 + section_length);
        out.push(self.table_id);
        out.push(((self.section_syntax_indicator as u8) << 7) | 0x30 | ((section_length >> 8) as u8 & 0x0F));
        out.push((section_length & 0xFF) as u8);
        out.extend_from_slice(&self.tid_extension.to_be_bytes());
        out.push(0xC0 | (self.version << 1) | (self.current_next as u8));
        out.push(self.section_number);
        out.push(self.last_section_number);
        out.extend_from_slice(&self.payload);

        let crc = CRC_MPEG2.checksum(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BinaryTable {
        BinaryTable {
            table_id: 0x02,
            section_syntax_indicator: true,
            tid_extension: 0x1234,
            version: 3,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let table = sample();
        let bytes = table.serialize().unwrap();
        let parsed = BinaryTable::parse(&bytes).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn parse_rejects_crc_mismatch() {
        let mut bytes = sample().serialize().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(BinaryTable::parse(&bytes).is_err());
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(BinaryTable::parse(&[0x02, 0x00]).is_err());
    }

    #[test]
    fn parse_rejects_truncated_section() {
        let bytes = sample().serialize().unwrap();
        assert!(BinaryTable::parse(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn serialize_rejects_oversized_payload() {
        let mut table = sample();
        table.payload = vec![0u8; MAX_PSI_LONG_SECTION_PAYLOAD_SIZE + 1];
        assert!(table.serialize().is_err());
    }
}
