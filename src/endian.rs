//! Little-endian scalar readers.
//!
//! Every multi-byte field on the wire is little-endian; this is the single
//! place that knows that, so no decoder can forget to normalise a field
//! (spec.md §9's "Endianness normalisation" design note).

pub(crate) fn u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub(crate) fn u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub(crate) fn u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
