//! End-to-end scenarios driven by small hand-assembled PE32 images, one per
//! facade: section translation, import classification, base relocations,
//! export forwarding, and the resource tree.

use pexp::{
    DirectoryEntry, FileImage, FileOffset, Image, ImageKind, ImportEntry, Machine, SliceStore, VirtualImage,
    VirtualOffset,
};

const OPT_HEADER_SIZE: usize = 224; // PE32: 96 + 16 * 8
const FILE_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;

struct SectionSpec {
    name: &'static [u8],
    virtual_address: u32,
    size_of_raw_data: u32,
    pointer_to_raw_data: u32,
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn empty_directories() -> [(u32, u32); 16] {
    [(0, 0); 16]
}

fn set_dir(dirs: &mut [(u32, u32); 16], entry: DirectoryEntry, virtual_address: u32, size: u32) {
    dirs[entry.index()] = (virtual_address, size);
}

/// Assembles a minimal PE32 image: DOS header, NT headers, a section table,
/// and a buffer long enough to hold `min_len` bytes of section payload.
fn build_pe32(
    machine: u16,
    characteristics: u16,
    sections: &[SectionSpec],
    data_directories: [(u32, u32); 16],
    min_len: usize,
) -> Vec<u8> {
    let e_lfanew: usize = 64;
    let file_header_offset = e_lfanew + 4;
    let opt_header_offset = file_header_offset + FILE_HEADER_SIZE;
    let section_table_offset = opt_header_offset + OPT_HEADER_SIZE;
    let size_of_headers = section_table_offset + SECTION_HEADER_SIZE * sections.len();

    let mut buf = vec![0u8; size_of_headers.max(min_len)];

    put_u16(&mut buf, 0, 0x5a4d); // e_magic
    put_u32(&mut buf, 60, e_lfanew as u32);

    put_u32(&mut buf, e_lfanew, 0x0000_4550); // "PE\0\0"

    put_u16(&mut buf, file_header_offset, machine);
    put_u16(&mut buf, file_header_offset + 2, sections.len() as u16);
    put_u16(&mut buf, file_header_offset + 16, OPT_HEADER_SIZE as u16);
    put_u16(&mut buf, file_header_offset + 18, characteristics);

    put_u16(&mut buf, opt_header_offset, 0x10b); // PE32 magic
    put_u32(&mut buf, opt_header_offset + 60, size_of_headers as u32);
    for (i, (virtual_address, size)) in data_directories.iter().enumerate() {
        let at = opt_header_offset + 96 + i * 8;
        put_u32(&mut buf, at, *virtual_address);
        put_u32(&mut buf, at + 4, *size);
    }

    for (i, section) in sections.iter().enumerate() {
        let at = section_table_offset + i * SECTION_HEADER_SIZE;
        buf[at..at + section.name.len()].copy_from_slice(section.name);
        put_u32(&mut buf, at + 12, section.virtual_address);
        put_u32(&mut buf, at + 16, section.size_of_raw_data);
        put_u32(&mut buf, at + 20, section.pointer_to_raw_data);
    }

    buf
}

fn text_section() -> SectionSpec {
    SectionSpec {
        name: b".text\0\0\0",
        virtual_address: 0x1000,
        size_of_raw_data: 0x100,
        pointer_to_raw_data: 0x200,
    }
}

#[test]
fn s1_minimal_pe32_is_valid_with_one_section() {
    let sections = [text_section()];
    let buf = build_pe32(0x014c, 0x0002, &sections, empty_directories(), 0x300);
    let store = SliceStore::new(&buf);

    assert!(Image::is_valid(&store));
    let image = Image::new(store).unwrap();

    assert_eq!(image.machine().unwrap(), Machine::I386);
    assert_eq!(image.kind().unwrap(), ImageKind::Executable);
    assert_eq!(image.section_headers().count(), 1);
}

#[test]
fn s2_rva_translation_round_trips_through_the_section_table() {
    let sections = [text_section()];
    let buf = build_pe32(0x014c, 0x0002, &sections, empty_directories(), 0x300);
    let store = SliceStore::new(&buf);
    let image = Image::new(store).unwrap();

    let file_offset = image.to_file_offset(VirtualOffset::new(0x1050)).unwrap();
    assert_eq!(file_offset, FileOffset::new(0x250));

    let rva = image.to_virtual_offset(FileOffset::new(0x250)).unwrap();
    assert_eq!(rva, VirtualOffset::new(0x1050));

    assert!(image.to_file_offset(VirtualOffset::new(0x2000)).is_none());
}

#[test]
fn s3_import_descriptor_entries_are_classified_ordinal_then_named() {
    let sections = [SectionSpec {
        name: b".idata\0\0",
        virtual_address: 0x3000,
        size_of_raw_data: 0x40,
        pointer_to_raw_data: 0x300,
    }];
    let mut dirs = empty_directories();
    set_dir(&mut dirs, DirectoryEntry::Import, 0x3000, 40); // two 20-byte descriptors

    let mut buf = build_pe32(0x014c, 0x0002, &sections, dirs, 0x400);

    // descriptor 0 at file offset 0x300; descriptor 1 (the zero terminator)
    // follows immediately and is left all-zero.
    put_u32(&mut buf, 0x300, 0x3028); // original_first_thunk

    // thunk table at file offset 0x328 (rva 0x3028): ordinal 42, then a named
    // thunk, then the zero terminator.
    put_u32(&mut buf, 0x328, 0x8000_002A);
    put_u32(&mut buf, 0x328 + 4, 0x3034); // rva of the hint+name record

    // hint (2 zero bytes, left as-is) + name at file offset 0x334/0x336.
    buf[0x336..0x336 + 4].copy_from_slice(b"Foo\0");

    let store = SliceStore::new(&buf);
    let image = Image::new(store).unwrap();

    let descriptor = image.import_descriptors().unwrap().next().unwrap().unwrap();
    let entries: Vec<ImportEntry> = image.import_entries(&descriptor).map(Result::unwrap).collect();

    assert_eq!(entries.len(), 2);
    match &entries[0] {
        ImportEntry::Unnamed(ordinal) => assert_eq!(*ordinal, 42),
        ImportEntry::Named(_) => panic!("expected an ordinal import first"),
    }
    match &entries[1] {
        ImportEntry::Named(name) => assert_eq!(name.as_str(), "Foo"),
        ImportEntry::Unnamed(_) => panic!("expected a named import second"),
    }
}

#[test]
fn s4_base_relocation_entries_decode_type_and_address_then_stop() {
    let sections = [SectionSpec {
        name: b".reloc\0\0",
        virtual_address: 0x4000,
        size_of_raw_data: 0x10,
        pointer_to_raw_data: 0x400,
    }];
    let mut dirs = empty_directories();
    set_dir(&mut dirs, DirectoryEntry::BaseReloc, 0x4000, 12); // one 12-byte block

    let mut buf = build_pe32(0x014c, 0x0002, &sections, dirs, 0x420);

    put_u32(&mut buf, 0x400, 0x2000); // block's page rva
    put_u32(&mut buf, 0x404, 12); // size_of_block: header + two WORD entries
    put_u16(&mut buf, 0x408, 0x3005);
    put_u16(&mut buf, 0x40a, 0xA008);

    let store = SliceStore::new(&buf);
    let image = Image::new(store).unwrap();

    assert_eq!(image.base_relocations().count(), 1);
    let block = image.base_relocations().next().unwrap().unwrap();

    let decoded: Vec<_> = image.relocation_entries(&block).map(Result::unwrap).collect();

    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].kind, 3);
    assert_eq!(decoded[0].address, VirtualOffset::new(0x2005));
    assert_eq!(decoded[1].kind, 0xA);
    assert_eq!(decoded[1].address, VirtualOffset::new(0x2008));
}

#[test]
fn s5_forwarded_export_resolves_the_forwarder_string() {
    let sections = [SectionSpec {
        name: b".rdata\0\0",
        virtual_address: 0x5000,
        size_of_raw_data: 0x100,
        pointer_to_raw_data: 0x500,
    }];
    let mut dirs = empty_directories();
    set_dir(&mut dirs, DirectoryEntry::Export, 0x5000, 0x40);

    let mut buf = build_pe32(0x014c, 0x0002, &sections, dirs, 0x600);

    // export directory header at file offset 0x500
    put_u32(&mut buf, 0x500 + 16, 1); // base
    put_u32(&mut buf, 0x500 + 20, 1); // number_of_functions
    put_u32(&mut buf, 0x500 + 28, 0x5028); // address_of_functions

    // function table: slot 0's rva points inside the export directory's own
    // range, which is what marks it as forwarded rather than a real export.
    put_u32(&mut buf, 0x528, 0x502C);

    buf[0x52C..0x52C + 14].copy_from_slice(b"Other.dll.Bar\0");

    let store = SliceStore::new(&buf);
    let image = Image::new(store).unwrap();

    let exports = image.export_directory().unwrap().unwrap();
    let info = exports.find_by_ordinal(0).unwrap().unwrap();

    assert!(info.is_forwarded);
    assert_eq!(info.forwarder_string.as_ref().unwrap().as_str(), "Other.dll.Bar");
}

#[test]
fn s6_resource_tree_walks_two_levels_to_a_data_leaf() {
    let sections = [SectionSpec {
        name: b".rsrc\0\0\0",
        virtual_address: 0x6000,
        size_of_raw_data: 0x200,
        pointer_to_raw_data: 0x600,
    }];
    let mut dirs = empty_directories();
    set_dir(&mut dirs, DirectoryEntry::Resource, 0x6000, 0x100);

    let mut buf = build_pe32(0x014c, 0x0002, &sections, dirs, 0x720);

    // root directory header at rdata_begin (file offset 0x600)
    put_u16(&mut buf, 0x600 + 12, 1); // number_of_named_entries
    put_u16(&mut buf, 0x600 + 14, 0); // number_of_id_entries

    // root's one named entry at rdata_begin+0x10 (0x610)
    put_u32(&mut buf, 0x610, 0x8000_0020); // named, string at rdata_begin+0x20
    put_u32(&mut buf, 0x614, 0x8000_0040); // directory, subdir at rdata_begin+0x40

    // "MENU" as a Pascal UTF-16 string at rdata_begin+0x20 (0x620)
    put_u16(&mut buf, 0x620, 4);
    for (i, unit) in "MENU".encode_utf16().enumerate() {
        put_u16(&mut buf, 0x622 + i * 2, unit);
    }

    // subdirectory header at rdata_begin+0x40 (0x640)
    put_u16(&mut buf, 0x640 + 12, 0); // number_of_named_entries
    put_u16(&mut buf, 0x640 + 14, 1); // number_of_id_entries

    // subdirectory's one id-entry at rdata_begin+0x50 (0x650)
    put_u32(&mut buf, 0x650, 5); // id 5, not named
    put_u32(&mut buf, 0x654, 0x700); // data entry at the flat file offset 0x700

    // ResourceDataEntry, read at the flat offset above (not rdata_begin-relative)
    put_u32(&mut buf, 0x700, 0x90); // offset_to_data, relative to rdata_begin
    put_u32(&mut buf, 0x700 + 4, 8); // size

    // the resource bytes themselves, at rdata_begin+0x90 (0x690)
    buf[0x690..0x690 + 8].copy_from_slice(b"RESOURCE");

    let store = SliceStore::new(&buf);
    let image = Image::new(store).unwrap();

    let root = image.resource_directory().unwrap().unwrap();
    let entry = root.entries().next().unwrap().unwrap();
    assert_eq!(entry.name_str().unwrap().as_deref(), Some("MENU"));

    let subdir = entry.as_directory().unwrap().unwrap();
    let leaf = subdir.entries().next().unwrap().unwrap();
    assert!(leaf.as_directory().unwrap().is_none());

    let (offset, size) = leaf.data().unwrap().unwrap();
    assert_eq!(offset, FileOffset::new(0x690));
    assert_eq!(size, 8);
}

#[test]
fn s7_virtual_image_reads_tables_by_rva_with_no_section_translation() {
    // pointer_to_raw_data deliberately points somewhere the descriptor bytes
    // were never written; a loaded image has no on-disk layout to honor.
    let sections = [SectionSpec {
        name: b".idata\0\0",
        virtual_address: 0x3000,
        size_of_raw_data: 0x40,
        pointer_to_raw_data: 0x9000,
    }];
    let mut dirs = empty_directories();
    set_dir(&mut dirs, DirectoryEntry::Import, 0x3000, 40);

    let mut buf = build_pe32(0x014c, 0x0002, &sections, dirs, 0x9040);

    // descriptor written directly at its RVA (0x3000), as it would sit in a
    // process's loaded address space, not at pointer_to_raw_data (0x9000).
    put_u32(&mut buf, 0x3000, 0x3028); // original_first_thunk

    put_u32(&mut buf, 0x3028, 0x8000_002A); // ordinal 42
    put_u32(&mut buf, 0x302C, 0x3034); // rva of the hint+name record
    buf[0x3036..0x3036 + 4].copy_from_slice(b"Foo\0");

    let store = SliceStore::new(&buf);
    let virtual_image: VirtualImage<_> = VirtualImage::with_store(store).unwrap();

    let descriptor = virtual_image.import_descriptors().unwrap().next().unwrap().unwrap();
    let entries: Vec<ImportEntry> = virtual_image.import_entries(&descriptor).map(Result::unwrap).collect();

    assert_eq!(entries.len(), 2);
    match &entries[0] {
        ImportEntry::Unnamed(ordinal) => assert_eq!(*ordinal, 42),
        ImportEntry::Named(_) => panic!("expected an ordinal import first"),
    }
    match &entries[1] {
        ImportEntry::Named(name) => assert_eq!(name.as_str(), "Foo"),
        ImportEntry::Unnamed(_) => panic!("expected a named import second"),
    }

    // the same bytes read as a file image translate the RVA through the
    // section table to pointer_to_raw_data (0x9000), which was never
    // written — the descriptor there is all zero, i.e. an immediate
    // terminator.
    let store = SliceStore::new(&buf);
    let file_image: FileImage<_> = FileImage::with_store(store).unwrap();
    assert_eq!(file_image.import_descriptors().unwrap().count(), 0);
}
