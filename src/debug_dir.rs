//! Debug directory (`IMAGE_DEBUG_DIRECTORY`).

use crate::endian;
use crate::error::{PexpError, Result};
use crate::offset::NativeOffset;
use crate::store::ByteStore;

pub(crate) const DEBUG_DIRECTORY_SIZE: usize = 28;

/// One entry of the debug directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub kind: u32,
    pub size_of_data: u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

pub(crate) fn read_debug_directory<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<DebugDirectory> {
    let mut buf = [0u8; DEBUG_DIRECTORY_SIZE];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    Ok(DebugDirectory {
        characteristics: endian::u32(&buf[0..]),
        time_date_stamp: endian::u32(&buf[4..]),
        major_version: endian::u16(&buf[8..]),
        minor_version: endian::u16(&buf[10..]),
        kind: endian::u32(&buf[12..]),
        size_of_data: endian::u32(&buf[16..]),
        address_of_raw_data: endian::u32(&buf[20..]),
        pointer_to_raw_data: endian::u32(&buf[24..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::FileOffset;
    use crate::store::SliceStore;

    #[test]
    fn reads_debug_directory_fields() {
        let mut buf = vec![0u8; DEBUG_DIRECTORY_SIZE];
        buf[12..16].copy_from_slice(&2u32.to_le_bytes()); // IMAGE_DEBUG_TYPE_CODEVIEW
        buf[16..20].copy_from_slice(&0x50u32.to_le_bytes());
        let store = SliceStore::new(&buf);
        let dir = read_debug_directory(&store, FileOffset::new(0)).unwrap();
        assert_eq!(dir.kind, 2);
        assert_eq!(dir.size_of_data, 0x50);
    }
}
