//! Export directory (`IMAGE_EXPORT_DIRECTORY`).

use crate::endian;
use crate::error::{PexpError, Result};
use crate::offset::VirtualOffset;
use crate::offset::{NativeOffset, Pointed};
use crate::store::ByteStore;

pub(crate) const EXPORT_DIRECTORY_SIZE: usize = 40;

/// The export directory header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub name: u32,
    pub base: u32,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    pub address_of_functions: u32,
    pub address_of_names: u32,
    pub address_of_name_ordinals: u32,
}

pub(crate) fn read_export_directory<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<ExportDirectory> {
    let mut buf = [0u8; EXPORT_DIRECTORY_SIZE];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    Ok(ExportDirectory {
        characteristics: endian::u32(&buf[0..]),
        time_date_stamp: endian::u32(&buf[4..]),
        major_version: endian::u16(&buf[8..]),
        minor_version: endian::u16(&buf[10..]),
        name: endian::u32(&buf[12..]),
        base: endian::u32(&buf[16..]),
        number_of_functions: endian::u32(&buf[20..]),
        number_of_names: endian::u32(&buf[24..]),
        address_of_functions: endian::u32(&buf[28..]),
        address_of_names: endian::u32(&buf[32..]),
        address_of_name_ordinals: endian::u32(&buf[36..]),
    })
}

/// The result of resolving one export, by ordinal or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    pub name: Option<Pointed<VirtualOffset, String>>,
    pub ordinal: u32,
    pub address: VirtualOffset,
    pub name_ordinal: Option<u16>,
    pub is_forwarded: bool,
    pub forwarder_string: Option<Pointed<VirtualOffset, String>>,
}

/// Whether `fn_address` falls inside the export directory's own data
/// directory range — the only reliable way to tell an export entry apart
/// from a forwarder string RVA (`is_export_forwarded` in
/// `export_directory_facade.hpp`).
pub(crate) fn is_forwarded(fn_address: VirtualOffset, dir_begin: VirtualOffset, dir_size: u32) -> bool {
    let dir_end = dir_begin + dir_size as i64;
    dir_begin <= fn_address && fn_address < dir_end
}
