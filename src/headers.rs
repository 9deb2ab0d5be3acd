//! Fixed-layout header records: DOS header, NT headers, file header, and the
//! two optional-header shapes.
//!
//! Every `read_*_from_image` function here mirrors the original's
//! `read_*_from_image` free functions: read the raw bytes, then normalise
//! every multi-byte field from little-endian.

use crate::consts::{NUMBEROF_DIRECTORY_ENTRIES, OPTIONAL_HDR32_MAGIC, OPTIONAL_HDR64_MAGIC};
use crate::endian;
use crate::error::{PexpError, Result};
use crate::offset::NativeOffset;
use crate::store::ByteStore;

fn read_exact<S: ByteStore, O: NativeOffset>(store: &S, offset: O, dest: &mut [u8]) -> Result<()> {
    let got = store.read(offset.value() as u64, dest);
    if got < dest.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: dest.len(),
            got,
        });
    }
    Ok(())
}

/// The MS-DOS stub header every PE image begins with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
    pub e_res: [u16; 4],
    pub e_oemid: u16,
    pub e_oeminfo: u16,
    pub e_res2: [u16; 10],
    /// File offset of the NT headers.
    pub e_lfanew: u32,
}

pub(crate) const DOS_HEADER_SIZE: usize = 64;

pub(crate) fn read_dos_header<S: ByteStore, O: NativeOffset>(store: &S, offset: O) -> Result<DosHeader> {
    let mut buf = [0u8; DOS_HEADER_SIZE];
    read_exact(store, offset, &mut buf)?;

    let mut e_res = [0u16; 4];
    for (i, slot) in e_res.iter_mut().enumerate() {
        *slot = endian::u16(&buf[28 + i * 2..]);
    }
    let mut e_res2 = [0u16; 10];
    for (i, slot) in e_res2.iter_mut().enumerate() {
        *slot = endian::u16(&buf[44 + i * 2..]);
    }

    Ok(DosHeader {
        e_magic: endian::u16(&buf[0..]),
        e_cblp: endian::u16(&buf[2..]),
        e_cp: endian::u16(&buf[4..]),
        e_crlc: endian::u16(&buf[6..]),
        e_cparhdr: endian::u16(&buf[8..]),
        e_minalloc: endian::u16(&buf[10..]),
        e_maxalloc: endian::u16(&buf[12..]),
        e_ss: endian::u16(&buf[14..]),
        e_sp: endian::u16(&buf[16..]),
        e_csum: endian::u16(&buf[18..]),
        e_ip: endian::u16(&buf[20..]),
        e_cs: endian::u16(&buf[22..]),
        e_lfarlc: endian::u16(&buf[24..]),
        e_ovno: endian::u16(&buf[26..]),
        e_res,
        e_oemid: endian::u16(&buf[36..]),
        e_oeminfo: endian::u16(&buf[38..]),
        e_res2,
        e_lfanew: endian::u32(&buf[60..]),
    })
}

/// COFF file header (`IMAGE_FILE_HEADER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

pub(crate) const FILE_HEADER_SIZE: usize = 20;

impl FileHeader {
    /// `time_date_stamp` as a calendar timestamp (seconds since the Unix
    /// epoch, same convention as a C `time_t`). `None` if the raw value
    /// doesn't correspond to a representable date.
    pub fn timestamp(&self) -> Option<chrono::NaiveDateTime> {
        chrono::NaiveDateTime::from_timestamp_opt(self.time_date_stamp as i64, 0)
    }
}

pub(crate) fn read_file_header<S: ByteStore, O: NativeOffset>(store: &S, offset: O) -> Result<FileHeader> {
    let mut buf = [0u8; FILE_HEADER_SIZE];
    read_exact(store, offset, &mut buf)?;
    Ok(FileHeader {
        machine: endian::u16(&buf[0..]),
        number_of_sections: endian::u16(&buf[2..]),
        time_date_stamp: endian::u32(&buf[4..]),
        pointer_to_symbol_table: endian::u32(&buf[8..]),
        number_of_symbols: endian::u32(&buf[12..]),
        size_of_optional_header: endian::u16(&buf[16..]),
        characteristics: endian::u16(&buf[18..]),
    })
}

/// One `IMAGE_DATA_DIRECTORY` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

/// The optional header, in either its PE32 or PE32+ shape.
///
/// The original expresses this as `OptionalHeader<32>`/`OptionalHeader<64>`
/// template specialisations; here the bitness is a runtime fact (see
/// [`crate::image::Bitness`]) so the two shapes live side by side as enum
/// variants instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionalHeader {
    Pe32(OptionalHeaderFields<u32>),
    PePlus(OptionalHeaderFields<u64>),
}

/// Fields shared by both optional-header shapes, generic over the
/// platform-word type (`u32` for PE32, `u64` for PE32+).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeaderFields<W> {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    /// Absent (zero) in PE32+, where there is no separate data base.
    pub base_of_data: u32,
    pub image_base: W,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: W,
    pub size_of_stack_commit: W,
    pub size_of_heap_reserve: W,
    pub size_of_heap_commit: W,
    pub loader_flags: u32,
    pub number_of_rvas_and_sizes: u32,
    pub data_directory: [DataDirectory; NUMBEROF_DIRECTORY_ENTRIES],
}

impl OptionalHeader {
    pub fn magic(&self) -> u16 {
        match self {
            OptionalHeader::Pe32(f) => f.magic,
            OptionalHeader::PePlus(f) => f.magic,
        }
    }

    pub fn address_of_entry_point(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(f) => f.address_of_entry_point,
            OptionalHeader::PePlus(f) => f.address_of_entry_point,
        }
    }

    pub fn size_of_headers(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(f) => f.size_of_headers,
            OptionalHeader::PePlus(f) => f.size_of_headers,
        }
    }

    pub fn subsystem(&self) -> u16 {
        match self {
            OptionalHeader::Pe32(f) => f.subsystem,
            OptionalHeader::PePlus(f) => f.subsystem,
        }
    }

    pub fn dll_characteristics(&self) -> u16 {
        match self {
            OptionalHeader::Pe32(f) => f.dll_characteristics,
            OptionalHeader::PePlus(f) => f.dll_characteristics,
        }
    }

    pub fn data_directory(&self, index: usize) -> Option<DataDirectory> {
        let table = match self {
            OptionalHeader::Pe32(f) => &f.data_directory,
            OptionalHeader::PePlus(f) => &f.data_directory,
        };
        table.get(index).copied()
    }
}

pub(crate) fn optional_header_size(magic: u16) -> Option<usize> {
    match magic {
        OPTIONAL_HDR32_MAGIC => Some(96 + NUMBEROF_DIRECTORY_ENTRIES * 8),
        OPTIONAL_HDR64_MAGIC => Some(112 + NUMBEROF_DIRECTORY_ENTRIES * 8),
        _ => None,
    }
}

fn read_data_directories(buf: &[u8], base: usize) -> [DataDirectory; NUMBEROF_DIRECTORY_ENTRIES] {
    let mut dirs = [DataDirectory::default(); NUMBEROF_DIRECTORY_ENTRIES];
    for (i, dir) in dirs.iter_mut().enumerate() {
        let entry = base + i * 8;
        dir.virtual_address = endian::u32(&buf[entry..]);
        dir.size = endian::u32(&buf[entry + 4..]);
    }
    dirs
}

pub(crate) fn read_optional_header<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<OptionalHeader> {
    let mut magic_buf = [0u8; 2];
    read_exact(store, offset, &mut magic_buf)?;
    let magic = endian::u16(&magic_buf);

    let size = optional_header_size(magic).ok_or_else(|| {
        PexpError::InvalidFormat(format!("unrecognised optional header magic {magic:#x}"))
    })?;
    let mut buf = vec![0u8; size];
    read_exact(store, offset, &mut buf)?;

    match magic {
        OPTIONAL_HDR32_MAGIC => Ok(OptionalHeader::Pe32(OptionalHeaderFields {
            magic,
            major_linker_version: buf[2],
            minor_linker_version: buf[3],
            size_of_code: endian::u32(&buf[4..]),
            size_of_initialized_data: endian::u32(&buf[8..]),
            size_of_uninitialized_data: endian::u32(&buf[12..]),
            address_of_entry_point: endian::u32(&buf[16..]),
            base_of_code: endian::u32(&buf[20..]),
            base_of_data: endian::u32(&buf[24..]),
            image_base: endian::u32(&buf[28..]),
            section_alignment: endian::u32(&buf[32..]),
            file_alignment: endian::u32(&buf[36..]),
            major_operating_system_version: endian::u16(&buf[40..]),
            minor_operating_system_version: endian::u16(&buf[42..]),
            major_image_version: endian::u16(&buf[44..]),
            minor_image_version: endian::u16(&buf[46..]),
            major_subsystem_version: endian::u16(&buf[48..]),
            minor_subsystem_version: endian::u16(&buf[50..]),
            win32_version_value: endian::u32(&buf[52..]),
            size_of_image: endian::u32(&buf[56..]),
            size_of_headers: endian::u32(&buf[60..]),
            check_sum: endian::u32(&buf[64..]),
            subsystem: endian::u16(&buf[68..]),
            dll_characteristics: endian::u16(&buf[70..]),
            size_of_stack_reserve: endian::u32(&buf[72..]),
            size_of_stack_commit: endian::u32(&buf[76..]),
            size_of_heap_reserve: endian::u32(&buf[80..]),
            size_of_heap_commit: endian::u32(&buf[84..]),
            loader_flags: endian::u32(&buf[88..]),
            number_of_rvas_and_sizes: endian::u32(&buf[92..]),
            data_directory: read_data_directories(&buf, 96),
        })),
        OPTIONAL_HDR64_MAGIC => Ok(OptionalHeader::PePlus(OptionalHeaderFields {
            magic,
            major_linker_version: buf[2],
            minor_linker_version: buf[3],
            size_of_code: endian::u32(&buf[4..]),
            size_of_initialized_data: endian::u32(&buf[8..]),
            size_of_uninitialized_data: endian::u32(&buf[12..]),
            address_of_entry_point: endian::u32(&buf[16..]),
            base_of_code: endian::u32(&buf[20..]),
            base_of_data: 0,
            image_base: endian::u64(&buf[24..]),
            section_alignment: endian::u32(&buf[32..]),
            file_alignment: endian::u32(&buf[36..]),
            major_operating_system_version: endian::u16(&buf[40..]),
            minor_operating_system_version: endian::u16(&buf[42..]),
            major_image_version: endian::u16(&buf[44..]),
            minor_image_version: endian::u16(&buf[46..]),
            major_subsystem_version: endian::u16(&buf[48..]),
            minor_subsystem_version: endian::u16(&buf[50..]),
            win32_version_value: endian::u32(&buf[52..]),
            size_of_image: endian::u32(&buf[56..]),
            size_of_headers: endian::u32(&buf[60..]),
            check_sum: endian::u32(&buf[64..]),
            subsystem: endian::u16(&buf[68..]),
            dll_characteristics: endian::u16(&buf[70..]),
            size_of_stack_reserve: endian::u64(&buf[72..]),
            size_of_stack_commit: endian::u64(&buf[80..]),
            size_of_heap_reserve: endian::u64(&buf[88..]),
            size_of_heap_commit: endian::u64(&buf[96..]),
            loader_flags: endian::u32(&buf[104..]),
            number_of_rvas_and_sizes: endian::u32(&buf[108..]),
            data_directory: read_data_directories(&buf, 112),
        })),
        _ => unreachable!("checked above"),
    }
}

/// `signature + FileHeader + OptionalHeader`, read together as the NT headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtHeaders {
    pub signature: u32,
    pub file_header: FileHeader,
    pub optional_header: OptionalHeader,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::FileOffset;
    use crate::store::SliceStore;

    fn minimal_dos_header(e_lfanew: u32) -> Vec<u8> {
        let mut buf = vec![0u8; DOS_HEADER_SIZE];
        buf[0..2].copy_from_slice(&0x5a4du16.to_le_bytes());
        buf[60..64].copy_from_slice(&e_lfanew.to_le_bytes());
        buf
    }

    #[test]
    fn reads_dos_header_signature_and_lfanew() {
        let buf = minimal_dos_header(0x80);
        let store = SliceStore::new(&buf);
        let header = read_dos_header(&store, FileOffset::new(0)).unwrap();
        assert_eq!(header.e_magic, 0x5a4d);
        assert_eq!(header.e_lfanew, 0x80);
    }

    #[test]
    fn reads_pe32_optional_header_fields() {
        let mut buf = vec![0u8; 96 + NUMBEROF_DIRECTORY_ENTRIES * 8];
        buf[0..2].copy_from_slice(&OPTIONAL_HDR32_MAGIC.to_le_bytes());
        buf[16..20].copy_from_slice(&0x1000u32.to_le_bytes()); // entry point
        buf[28..32].copy_from_slice(&0x0040_0000u32.to_le_bytes()); // image base
        let store = SliceStore::new(&buf);
        let header = read_optional_header(&store, FileOffset::new(0)).unwrap();
        assert_eq!(header.address_of_entry_point(), 0x1000);
        match header {
            OptionalHeader::Pe32(fields) => assert_eq!(fields.image_base, 0x0040_0000),
            OptionalHeader::PePlus(_) => panic!("expected PE32"),
        }
    }

    #[test]
    fn file_header_timestamp_reads_a_unix_time() {
        let header = FileHeader {
            machine: 0,
            number_of_sections: 0,
            time_date_stamp: 1_000_000_000,
            pointer_to_symbol_table: 0,
            number_of_symbols: 0,
            size_of_optional_header: 0,
            characteristics: 0,
        };
        assert_eq!(
            header.timestamp().unwrap().and_utc().timestamp(),
            1_000_000_000
        );
    }
}
