//! Section table (`IMAGE_SECTION_HEADER`).

use bitflags::bitflags;

use crate::endian;
use crate::error::{PexpError, Result};
use crate::offset::NativeOffset;
use crate::store::ByteStore;

pub(crate) const SIZEOF_SHORT_NAME: usize = 8;
pub(crate) const SECTION_HEADER_SIZE: usize = 40;

bitflags! {
    /// Grounded on `peplus::SectionCharacteristics` (`headers.hpp`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const TYPE_NO_PAD            = 0x0000_0008;
        const CNT_CODE               = 0x0000_0020;
        const CNT_INITIALIZED_DATA   = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_OTHER              = 0x0000_0100;
        const LNK_INFO                = 0x0000_0200;
        const LNK_REMOVE              = 0x0000_0800;
        const LNK_COMDAT              = 0x0000_1000;
        const NO_DEFER_SPEC_EXC       = 0x0000_4000;
        const GPREL                   = 0x0000_8000;
        const MEM_PURGEABLE           = 0x0002_0000;
        const MEM_LOCKED              = 0x0004_0000;
        const MEM_PRELOAD             = 0x0008_0000;
        const LNK_NRELOC_OVFL         = 0x0100_0000;
        const MEM_DISCARDABLE         = 0x0200_0000;
        const MEM_NOT_CACHED          = 0x0400_0000;
        const MEM_NOT_PAGED           = 0x0800_0000;
        const MEM_SHARED              = 0x1000_0000;
        const MEM_EXECUTE             = 0x2000_0000;
        const MEM_READ                = 0x4000_0000;
        const MEM_WRITE               = 0x8000_0000;
    }
}

/// One entry of the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; SIZEOF_SHORT_NAME],
    /// `VirtualSize` in the object-file sense; `PhysicalAddress` for
    /// executable images. The original unions the two — they share a slot.
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    /// The section name, trimmed at the first NUL (or all 8 bytes if the
    /// name fills the field exactly, per the short-name convention).
    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end])
    }

    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.characteristics)
    }
}

pub(crate) fn read_section_header<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<SectionHeader> {
    let mut buf = [0u8; SECTION_HEADER_SIZE];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }

    let mut name = [0u8; SIZEOF_SHORT_NAME];
    name.copy_from_slice(&buf[0..8]);

    Ok(SectionHeader {
        name,
        virtual_size: endian::u32(&buf[8..]),
        virtual_address: endian::u32(&buf[12..]),
        size_of_raw_data: endian::u32(&buf[16..]),
        pointer_to_raw_data: endian::u32(&buf[20..]),
        pointer_to_relocations: endian::u32(&buf[24..]),
        pointer_to_line_numbers: endian::u32(&buf[28..]),
        number_of_relocations: endian::u16(&buf[32..]),
        number_of_line_numbers: endian::u16(&buf[34..]),
        characteristics: endian::u32(&buf[36..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::FileOffset;
    use crate::store::SliceStore;

    fn encode(name: &[u8], virtual_address: u32, size_of_raw_data: u32, pointer_to_raw_data: u32) -> Vec<u8> {
        let mut buf = vec![0u8; SECTION_HEADER_SIZE];
        buf[0..name.len()].copy_from_slice(name);
        buf[12..16].copy_from_slice(&virtual_address.to_le_bytes());
        buf[16..20].copy_from_slice(&size_of_raw_data.to_le_bytes());
        buf[20..24].copy_from_slice(&pointer_to_raw_data.to_le_bytes());
        buf
    }

    #[test]
    fn name_str_trims_at_first_nul() {
        let buf = encode(b".text\0\0\0", 0x1000, 0x200, 0x400);
        let store = SliceStore::new(&buf);
        let header = read_section_header(&store, FileOffset::new(0)).unwrap();
        assert_eq!(header.name_str(), ".text");
    }

    #[test]
    fn name_str_handles_a_full_eight_byte_name() {
        let buf = encode(b".rodata1", 0, 0, 0);
        let store = SliceStore::new(&buf);
        let header = read_section_header(&store, FileOffset::new(0)).unwrap();
        assert_eq!(header.name_str(), ".rodata1");
    }

    #[test]
    fn decodes_section_flags() {
        let mut buf = encode(b".text\0\0\0", 0, 0, 0);
        buf[36..40].copy_from_slice(&(0x2000_0000u32 | 0x4000_0000).to_le_bytes());
        let store = SliceStore::new(&buf);
        let header = read_section_header(&store, FileOffset::new(0)).unwrap();
        assert!(header.flags().contains(SectionFlags::MEM_EXECUTE));
        assert!(header.flags().contains(SectionFlags::MEM_READ));
        assert!(!header.flags().contains(SectionFlags::MEM_WRITE));
    }
}
