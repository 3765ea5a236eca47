//! Constants for MPEG-TS packet framing (spec §3, §6).

/// Exact size of one MPEG-TS packet.
pub const TS_PACKET_SIZE: usize = 188;

/// Sync byte every TS packet starts with.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Mask over the 13-bit PID field in the packet header's second and third
/// bytes.
pub const PID_MASK: u16 = 0x1FFF;

/// PID reserved for null/stuffing packets.
pub const NULL_PID: u16 = 0x1FFF;
