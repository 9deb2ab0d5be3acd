//! Import directory (`IMAGE_IMPORT_DESCRIPTOR`) and thunk tables.

use crate::endian;
use crate::error::{PexpError, Result};
use crate::image::Bitness;
use crate::offset::{NativeOffset, Pointed, VirtualOffset};
use crate::store::ByteStore;

pub(crate) const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// One entry of the import directory, one per imported DLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportDescriptor {
    /// Aliased with `characteristics` on the first descriptor, as in the
    /// original; this crate always reads it as the thunk RVA.
    pub original_first_thunk: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name: u32,
    pub first_thunk: u32,
}

impl ImportDescriptor {
    fn is_zero(&self) -> bool {
        *self == ImportDescriptor::default()
    }
}

pub(crate) fn read_import_descriptor<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<ImportDescriptor> {
    let mut buf = [0u8; IMPORT_DESCRIPTOR_SIZE];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    Ok(ImportDescriptor {
        original_first_thunk: endian::u32(&buf[0..]),
        time_date_stamp: endian::u32(&buf[4..]),
        forwarder_chain: endian::u32(&buf[8..]),
        name: endian::u32(&buf[12..]),
        first_thunk: endian::u32(&buf[16..]),
    })
}

pub(crate) fn is_zero_descriptor(d: &ImportDescriptor) -> bool {
    d.is_zero()
}

/// One import-address-table / import-lookup-table slot.
///
/// The original unions `forwarder_string`/`function`/`ordinal`/
/// `address_of_data` over a single platform-word; this crate only needs the
/// raw word to classify and read through it, so it keeps just that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThunkData {
    pub raw: u64,
}

pub(crate) fn read_thunk_data<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
    bitness: Bitness,
) -> Result<ThunkData> {
    let width = bitness.word_size();
    let mut buf = [0u8; 8];
    let got = store.read(offset.value() as u64, &mut buf[..width]);
    if got < width {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: width,
            got,
        });
    }
    let raw = if width == 4 { endian::u32(&buf) as u64 } else { endian::u64(&buf) };
    Ok(ThunkData { raw })
}

pub(crate) fn thunk_is_zero(t: &ThunkData) -> bool {
    t.raw == 0
}

/// One resolved entry of an import descriptor's thunk table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEntry {
    Named(Pointed<VirtualOffset, String>),
    Unnamed(u32),
}

/// Classifies a raw thunk as named or ordinal-only.
///
/// Grounded on `thunk_data_to_import_entry_transformer` in
/// `import_descriptor_facade.hpp`: the high bit of the platform word (bit 31
/// for PE32, bit 63 for PE32+) flags an ordinal import; everything else is
/// an RVA to an `ImportByName` record (a `WORD` hint followed by the name).
pub(crate) fn ordinal_flag(bitness: Bitness) -> u64 {
    1u64 << (bitness.bits() - 1)
}
