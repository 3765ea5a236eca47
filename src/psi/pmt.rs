//! Program Map Table codec (spec §4.3) — the table type this crate
//! exemplifies the binary section model with.
//!
//! Grounded on the teacher's `psi/pmt.rs` (`parse_pmt`/`PmtSection`/
//! `StreamInfo`), generalized to: own descriptor lists instead of discarding
//! them, carry `is_current`, support serialization, and expose the
//! audio/video/subtitle predicates from spec §4.3/§6 the teacher never
//! computed (it only ever stored `stream_type` for bitrate bookkeeping).

use crate::error::{CoreError, Result};
use crate::psi::descriptor::DescriptorList;
use crate::psi::section::BinaryTable;
use std::collections::BTreeMap;

pub const TID_PMT: u8 = 0x02;

/// Descriptor tags the audio/subtitle predicates key off, per ETSI EN 300
/// 468 (spec §6).
pub const TAG_AC3: u8 = 0x6A;
pub const TAG_SUBTITLING: u8 = 0x59;
pub const TAG_TELETEXT: u8 = 0x56;
pub const TAG_ENHANCED_AC3: u8 = 0x7A;
pub const TAG_AAC: u8 = 0x7C;
/// Registered DVB extension tag for the DTS audio descriptor.
pub const TAG_DTS: u8 = 0x7B;

const AUDIO_TAGS: [u8; 4] = [TAG_DTS, TAG_AC3, TAG_ENHANCED_AC3, TAG_AAC];

/// `stream_type` values classified as video elementary streams.
const VIDEO_STREAM_TYPES: [u8; 6] = [0x01, 0x02, 0x10, 0x1B, 0x24, 0x42];
/// `stream_type` values classified as audio elementary streams outright
/// (without needing a corroborating descriptor).
const AUDIO_STREAM_TYPES: [u8; 5] = [0x03, 0x04, 0x0F, 0x11, 0x81];

/// Teletext type codes (top 5 bits of the per-language control byte) that
/// indicate a subtitle page rather than an information page.
const TELETEXT_SUBTITLE_TYPES: [u8; 2] = [2, 5];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub stream_type: u8,
    pub descriptors: DescriptorList,
}

impl Stream {
    pub fn is_video(&self) -> bool {
        VIDEO_STREAM_TYPES.contains(&self.stream_type)
    }

    pub fn is_audio(&self) -> bool {
        AUDIO_STREAM_TYPES.contains(&self.stream_type) || self.descriptors.contains_any(&AUDIO_TAGS)
    }

    pub fn is_subtitles(&self) -> bool {
        if self.descriptors.contains_tag(TAG_SUBTITLING) {
            return true;
        }
        self.descriptors
            .iter()
            .filter(|d| d.tag == TAG_TELETEXT)
            .any(|d| {
                d.payload.chunks_exact(5).any(|entry| {
                    let teletext_type = entry[3] >> 3;
                    TELETEXT_SUBTITLE_TYPES.contains(&teletext_type)
                })
            })
    }
}

/// A parsed Program Map Table. PMT is constrained to a single section
/// (spec §3), so there is no multi-section assembly here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub version: u8,
    pub is_current: bool,
    pub service_id: u16,
    pub pcr_pid: u16,
    pub program_descriptors: DescriptorList,
    /// PID → stream. A `BTreeMap` gives ascending-PID iteration for free,
    /// which is exactly the order spec §3/§9 requires on serialize.
    pub streams: BTreeMap<u16, Stream>,
}

impl Pmt {
    /// Parses a PMT out of an already CRC-validated `BinaryTable`.
    pub fn deserialize(table: &BinaryTable) -> Result<Self> {
        if table.table_id != TID_PMT {
            return Err(CoreError::Format(format!(
                "table_id 0x{:02X} is not PMT (expected 0x{TID_PMT:02X})",
                table.table_id
            )));
        }

        let b = &table.payload;
        if b.len() < 4 {
            return Err(CoreError::Format(
                "PMT payload missing its 4-byte fixed header".to_string(),
            ));
        }

        let pcr_pid = u16::from_be_bytes([b[0], b[1]]) & 0x1FFF;
        let program_info_length =
            ((((b[2] & 0x0F) as usize) << 8) | b[3] as usize).min(b.len() - 4);

        let mut program_descriptors = DescriptorList::new();
        program_descriptors.add(&b[4..4 + program_info_length]);

        let mut streams = BTreeMap::new();
        let mut idx = 4 + program_info_length;
        while idx + 5 <= b.len() {
            let stream_type = b[idx];
            let pid = u16::from_be_bytes([b[idx + 1], b[idx + 2]]) & 0x1FFF;
            let es_info_length =
                ((((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize).min(b.len() - idx - 5);

            let mut descriptors = DescriptorList::new();
            descriptors.add(&b[idx + 5..idx + 5 + es_info_length]);

            // Duplicate PID: last occurrence wins (spec §9 open question).
            streams.insert(pid, Stream { stream_type, descriptors });
            idx += 5 + es_info_length;
        }

        Ok(Pmt {
            version: table.version,
            is_current: table.current_next,
            service_id: table.tid_extension,
            pcr_pid,
            program_descriptors,
            streams,
        })
    }

    /// Builds the single long section this PMT serializes to, then emits
    /// its bytes (header, payload, CRC-32/MPEG-2). Never drops a descriptor
    /// to make the section fit — if the payload is too large, the
    /// underlying `BinaryTable::serialize` returns `InvariantError` and the
    /// caller must restructure the program (spec §4.3).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        payload.push(0xE0 | ((self.pcr_pid >> 8) as u8 & 0x1F));
        payload.push((self.pcr_pid & 0xFF) as u8);

        let program_desc_budget = self.program_descriptors.encoded_len() + 2;
        self.program_descriptors.length_serialize(&mut payload, program_desc_budget);

        for (&pid, stream) in &self.streams {
            payload.push(stream.stream_type);
            payload.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
            payload.push((pid & 0xFF) as u8);
            let es_desc_budget = stream.descriptors.encoded_len() + 2;
            stream.descriptors.length_serialize(&mut payload, es_desc_budget);
        }

        BinaryTable {
            table_id: TID_PMT,
            section_syntax_indicator: true,
            tid_extension: self.service_id,
            version: self.version,
            current_next: self.is_current,
            section_number: 0,
            last_section_number: 0,
            payload,
        }
        .serialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::descriptor::Descriptor;

    fn table_with_payload(payload: Vec<u8>) -> BinaryTable {
        BinaryTable {
            table_id: TID_PMT,
            section_syntax_indicator: true,
            tid_extension: 0x0001,
            version: 0,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
            payload,
        }
    }

    /// S1: PMT parse.
    #[test]
    fn s1_pmt_parse() {
        let payload = vec![0xE1, 0x00, 0xF0, 0x00, 0x1B, 0x01, 0x00, 0x00, 0x00];
        let pmt = Pmt::deserialize(&table_with_payload(payload)).unwrap();
        assert_eq!(pmt.pcr_pid, 0x0100);
        assert_eq!(pmt.streams.len(), 1);
        let stream = &pmt.streams[&0x0100];
        assert_eq!(stream.stream_type, 0x1B);
        assert!(stream.is_video());
    }

    /// S2: PMT with AC-3.
    #[test]
    fn s2_pmt_with_ac3() {
        let payload = vec![0xE1, 0x00, 0xF0, 0x00, 0x06, 0x01, 0x01, 0x00, 0x02, TAG_AC3, 0x00];
        let pmt = Pmt::deserialize(&table_with_payload(payload)).unwrap();
        let stream = &pmt.streams[&0x0101];
        assert!(stream.is_audio());
    }

    /// S5: Teletext subtitle classification flips with the type nibble.
    #[test]
    fn s5_teletext_subtitle_type() {
        let mut non_subtitle = DescriptorList::new();
        non_subtitle.push(Descriptor::new(TAG_TELETEXT, vec![b'e', b'n', b'g', 0x18, 0x01]));
        let stream = Stream { stream_type: 0x06, descriptors: non_subtitle };
        assert!(!stream.is_subtitles());

        let mut subtitle = DescriptorList::new();
        subtitle.push(Descriptor::new(TAG_TELETEXT, vec![b'e', b'n', b'g', 0x10, 0x01]));
        let stream = Stream { stream_type: 0x06, descriptors: subtitle };
        assert!(stream.is_subtitles());
    }

    #[test]
    fn subtitling_descriptor_alone_is_enough() {
        let mut descriptors = DescriptorList::new();
        descriptors.push(Descriptor::new(TAG_SUBTITLING, vec![b'e', b'n', b'g']));
        let stream = Stream { stream_type: 0x06, descriptors };
        assert!(stream.is_subtitles());
    }

    fn sample_pmt() -> Pmt {
        let mut program_descriptors = DescriptorList::new();
        program_descriptors.push(Descriptor::new(0x09, vec![0x01, 0x02]));

        let mut video_descriptors = DescriptorList::new();
        video_descriptors.push(Descriptor::new(0x28, vec![]));

        let mut audio_descriptors = DescriptorList::new();
        audio_descriptors.push(Descriptor::new(TAG_AC3, vec![]));

        let mut streams = BTreeMap::new();
        streams.insert(0x0101, Stream { stream_type: 0x1B, descriptors: video_descriptors });
        streams.insert(0x0102, Stream { stream_type: 0x81, descriptors: audio_descriptors });

        Pmt {
            version: 5,
            is_current: true,
            service_id: 0x4242,
            pcr_pid: 0x0101,
            program_descriptors,
            streams,
        }
    }

    /// Property 4: PMT round-trip.
    #[test]
    fn round_trip_preserves_descriptor_order_and_pid_ordering() {
        let pmt = sample_pmt();
        let bytes = pmt.serialize().unwrap();
        let table = BinaryTable::parse(&bytes).unwrap();
        let parsed = Pmt::deserialize(&table).unwrap();
        assert_eq!(parsed, pmt);
    }

    #[test]
    fn duplicate_pid_last_occurrence_wins() {
        // Same PID (0x0100) declared twice with different stream types;
        // the second (type 0x81) must win.
        let payload = vec![
            0xE1, 0x00, 0xF0, 0x00, 0x1B, 0x01, 0x00, 0x00, 0x00, 0x81, 0x01, 0x00, 0x00, 0x00,
        ];
        let pmt = Pmt::deserialize(&table_with_payload(payload)).unwrap();
        assert_eq!(pmt.streams.len(), 1);
        assert_eq!(pmt.streams[&0x0100].stream_type, 0x81);
    }

    #[test]
    fn serialize_ascending_pid_order() {
        let pmt = sample_pmt();
        let bytes = pmt.serialize().unwrap();
        let table = BinaryTable::parse(&bytes).unwrap();
        // Walk the stream loop in wire order and confirm PIDs are ascending.
        let b = &table.payload;
        let prog_info_len = (((b[2] & 0x0F) as usize) << 8) | b[3] as usize;
        let mut idx = 4 + prog_info_len;
        let mut seen_pids = Vec::new();
        while idx + 5 <= b.len() {
            let pid = u16::from_be_bytes([b[idx + 1], b[idx + 2]]) & 0x1FFF;
            seen_pids.push(pid);
            let es_len = (((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize;
            idx += 5 + es_len;
        }
        let mut sorted = seen_pids.clone();
        sorted.sort_unstable();
        assert_eq!(seen_pids, sorted);
    }

    #[test]
    fn deserialize_rejects_wrong_table_id() {
        let mut table = table_with_payload(vec![0xE1, 0x00, 0xF0, 0x00]);
        table.table_id = 0x00; // PAT, not PMT
        assert!(Pmt::deserialize(&table).is_err());
    }

    #[test]
    fn deserialize_rejects_missing_fixed_header() {
        let table = table_with_payload(vec![0xE1, 0x00]);
        assert!(Pmt::deserialize(&table).is_err());
    }

    #[test]
    fn serialize_overflow_is_invariant_error() {
        let mut pmt = sample_pmt();
        let mut huge = DescriptorList::new();
        huge.push(Descriptor::new(0x00, vec![0u8; 253]));
        for _ in 0..5 {
            pmt.program_descriptors.push(Descriptor::new(0x00, vec![0u8; 253]));
        }
        let _ = huge; // only `pmt.program_descriptors` needs to be oversized
        let result = pmt.serialize();
        assert!(result.is_err());
    }
}
