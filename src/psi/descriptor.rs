//! Descriptor TLV lists (spec §3 "Descriptor List", §4.2).
//!
//! Grounded on the TLV walk in `toshipp-tstools`'s `Descriptor::parse`
//! (other_examples pack) and generalized from the teacher's inline
//! descriptor-loop scanning in `psi/sdt.rs` into a standalone, reusable,
//! owning container every table (PMT included) can share.

/// One descriptor: a tag byte followed by up to 255 bytes of payload. The
/// on-wire length byte is implied by `payload.len()` and is never stored
/// separately, so it can never drift out of sync with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub payload: Vec<u8>,
}

impl Descriptor {
    pub fn new(tag: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self { tag, payload: payload.into() }
    }

    /// Total on-wire size: tag + length + payload.
    pub fn encoded_len(&self) -> usize {
        2 + self.payload.len()
    }
}

/// Ordered sequence of descriptors. Insertion order is preserved through
/// parse → serialize round trips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorList {
    descriptors: Vec<Descriptor>,
}

impl DescriptorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: Descriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    /// Parses consecutive `(tag, length, payload)` TLVs out of `bytes`.
    /// A trailing descriptor whose declared length runs past the end of
    /// `bytes` is malformed and is silently discarded, per spec.
    pub fn add(&mut self, bytes: &[u8]) {
        let mut i = 0;
        while i + 2 <= bytes.len() {
            let tag = bytes[i];
            let len = bytes[i + 1] as usize;
            if i + 2 + len > bytes.len() {
                break;
            }
            self.descriptors.push(Descriptor::new(tag, &bytes[i + 2..i + 2 + len]));
            i += 2 + len;
        }
    }

    /// Finds the index of the first descriptor with the given `tag`, at or
    /// after `start`.
    pub fn find(&self, tag: u8, start: usize) -> Option<usize> {
        self.descriptors
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, d)| d.tag == tag)
            .map(|(i, _)| i)
    }

    pub fn contains_tag(&self, tag: u8) -> bool {
        self.find(tag, 0).is_some()
    }

    pub fn contains_any(&self, tags: &[u8]) -> bool {
        tags.iter().any(|&t| self.contains_tag(t))
    }

    /// Total encoded size of every descriptor, not counting the 2-byte
    /// length prefix that precedes the list on the wire.
    pub fn encoded_len(&self) -> usize {
        self.descriptors.iter().map(Descriptor::encoded_len).sum()
    }

    /// Writes a 12-bit length prefix followed by as many descriptors as fit
    /// within `remain` bytes (the prefix itself counts against `remain`).
    /// Returns the index of the first descriptor that did not fit — equal
    /// to `len()` when every descriptor fit.
    pub fn length_serialize(&self, buf: &mut Vec<u8>, remain: usize) -> usize {
        let length_field_at = buf.len();
        buf.push(0);
        buf.push(0);
        let mut used = 2usize;
        let mut fit = 0usize;
        for d in &self.descriptors {
            let size = d.encoded_len();
            if used + size > remain {
                break;
            }
            buf.push(d.tag);
            buf.push(d.payload.len() as u8);
            buf.extend_from_slice(&d.payload);
            used += size;
            fit += 1;
        }
        let desc_len = used - 2;
        buf[length_field_at] = 0xF0 | ((desc_len >> 8) as u8 & 0x0F);
        buf[length_field_at + 1] = (desc_len & 0xFF) as u8;
        fit
    }
}

impl FromIterator<Descriptor> for DescriptorList {
    fn from_iter<T: IntoIterator<Item = Descriptor>>(iter: T) -> Self {
        Self { descriptors: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_parses_consecutive_tlvs() {
        let mut list = DescriptorList::new();
        list.add(&[0x6A, 0x00, 0x59, 0x02, 0xAB, 0xCD]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().next().unwrap().tag, 0x6A);
        assert_eq!(list.iter().nth(1).unwrap().payload, vec![0xAB, 0xCD]);
    }

    #[test]
    fn add_discards_malformed_trailing_bytes() {
        let mut list = DescriptorList::new();
        // Second descriptor claims length 5 but only 2 bytes remain.
        list.add(&[0x59, 0x00, 0x56, 0x05, 0x01, 0x02]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn find_respects_start_index() {
        let mut list = DescriptorList::new();
        list.push(Descriptor::new(0x56, vec![]));
        list.push(Descriptor::new(0x59, vec![]));
        list.push(Descriptor::new(0x56, vec![1]));
        assert_eq!(list.find(0x56, 0), Some(0));
        assert_eq!(list.find(0x56, 1), Some(2));
        assert_eq!(list.find(0x56, 3), None);
    }

    #[test]
    fn length_serialize_preserves_order_and_bytes() {
        let mut list = DescriptorList::new();
        list.push(Descriptor::new(0x6A, vec![0xAA]));
        list.push(Descriptor::new(0x59, vec![0x01, 0x02, 0x03]));

        let mut buf = Vec::new();
        let fit = list.length_serialize(&mut buf, 64);
        assert_eq!(fit, 2);

        let mut round_tripped = DescriptorList::new();
        let len = (((buf[0] & 0x0F) as usize) << 8) | buf[1] as usize;
        round_tripped.add(&buf[2..2 + len]);
        assert_eq!(round_tripped, list);
    }

    #[test]
    fn length_serialize_stops_when_budget_exhausted() {
        let mut list = DescriptorList::new();
        list.push(Descriptor::new(0x01, vec![0; 10]));
        list.push(Descriptor::new(0x02, vec![0; 10]));

        let mut buf = Vec::new();
        // Budget only fits the length prefix + first descriptor (2 + 12 = 14).
        let fit = list.length_serialize(&mut buf, 14);
        assert_eq!(fit, 1);
    }
}
