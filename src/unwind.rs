//! x64 exception handling: runtime functions and unwind info
//! (`RUNTIME_FUNCTION` / `UNWIND_INFO`).

use crate::endian;
use crate::error::{PexpError, Result};
use crate::offset::NativeOffset;
use crate::store::ByteStore;

pub(crate) const RUNTIME_FUNCTION_SIZE: usize = 12;
pub(crate) const UNWIND_INFO_HEADER_SIZE: usize = 4;
pub(crate) const UNWIND_CODE_SIZE: usize = 2;

pub const UNW_FLAG_NHANDLER: u8 = 0;
pub const UNW_FLAG_EHANDLER: u8 = 1;
pub const UNW_FLAG_UHANDLER: u8 = 2;
pub const UNW_FLAG_CHAININFO: u8 = 4;

/// One entry of the exception directory: the function's extent, and where
/// to find its unwind data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFunction {
    pub begin_address: u32,
    pub end_address: u32,
    pub unwind_data: u32,
}

pub(crate) fn read_runtime_function<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<RuntimeFunction> {
    let mut buf = [0u8; RUNTIME_FUNCTION_SIZE];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    Ok(RuntimeFunction {
        begin_address: endian::u32(&buf[0..]),
        end_address: endian::u32(&buf[4..]),
        unwind_data: endian::u32(&buf[8..]),
    })
}

/// The fixed header of an `UNWIND_INFO` record. `unwind_code` is read
/// separately as a cursor (see [`crate::image::Image::unwind_codes`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindInfo {
    pub version: u8,
    pub flags: u8,
    pub size_of_prolog: u8,
    pub count_of_codes: u8,
    pub frame_register: u8,
    pub frame_offset: u8,
}

pub(crate) fn read_unwind_info<S: ByteStore, O: NativeOffset>(store: &S, offset: O) -> Result<UnwindInfo> {
    let mut buf = [0u8; UNWIND_INFO_HEADER_SIZE];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    let version_flags = buf[0];
    let frame = buf[3];
    Ok(UnwindInfo {
        version: version_flags & 0b0000_0111,
        flags: version_flags >> 3,
        size_of_prolog: buf[1],
        count_of_codes: buf[2],
        frame_register: frame & 0b0000_1111,
        frame_offset: frame >> 4,
    })
}

impl UnwindInfo {
    /// Whether this record chains to another (`UNW_FLAG_CHAININFO`) rather
    /// than naming its own exception/termination handler.
    pub fn chains_to_next(&self) -> bool {
        self.flags & UNW_FLAG_CHAININFO != 0
    }

    /// Whether a handler RVA follows the unwind code array at all.
    pub fn has_handler(&self) -> bool {
        !self.chains_to_next() && self.flags & (UNW_FLAG_EHANDLER | UNW_FLAG_UHANDLER) != 0
    }
}

/// One unwind operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindCode {
    pub code_offset: u8,
    pub unwind_op: u8,
    pub op_info: u8,
}

pub(crate) fn read_unwind_code<S: ByteStore, O: NativeOffset>(store: &S, offset: O) -> Result<UnwindCode> {
    let mut buf = [0u8; UNWIND_CODE_SIZE];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    Ok(UnwindCode {
        code_offset: buf[0],
        unwind_op: buf[1] & 0b0000_1111,
        op_info: buf[1] >> 4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::FileOffset;
    use crate::store::SliceStore;

    #[test]
    fn reads_version_and_flags_from_the_packed_byte() {
        let mut buf = vec![0u8; UNWIND_INFO_HEADER_SIZE];
        // version 1, flags UNW_FLAG_EHANDLER (0b00001_001 = flags<<3 | version)
        buf[0] = (UNW_FLAG_EHANDLER << 3) | 1;
        buf[2] = 3; // count_of_codes
        let store = SliceStore::new(&buf);
        let info = read_unwind_info(&store, FileOffset::new(0)).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.flags, UNW_FLAG_EHANDLER);
        assert_eq!(info.count_of_codes, 3);
        assert!(info.has_handler());
        assert!(!info.chains_to_next());
    }

    #[test]
    fn chaininfo_suppresses_the_handler() {
        let mut buf = vec![0u8; UNWIND_INFO_HEADER_SIZE];
        buf[0] = UNW_FLAG_CHAININFO << 3;
        let store = SliceStore::new(&buf);
        let info = read_unwind_info(&store, FileOffset::new(0)).unwrap();
        assert!(info.chains_to_next());
        assert!(!info.has_handler());
    }
}
