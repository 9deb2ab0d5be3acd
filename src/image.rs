//! The image facade (C7): the single entry point tying headers, section
//! translation, and every lazy table together over a [`ByteStore`].
//!
//! An image is parameterized over its *native offset flavour*: a
//! [`FileImage`] (native = [`FileOffset`]) reads a store holding on-disk
//! layout, while a [`VirtualImage`] (native = [`VirtualOffset`]) reads a
//! store that already presents bytes as loaded at their RVAs (e.g. a
//! [`crate::store::RawPointerStore`] over mapped process memory). Every
//! table accessor resolves whatever offset flavour it's given — file or
//! virtual — down to the image's own native flavour before touching the
//! store, translating through the section table only when the two differ.

use std::marker::PhantomData;

use log::{debug, warn};

use crate::consts::{DirectoryEntry, DOS_SIGNATURE, NT_SIGNATURE, OPTIONAL_HDR32_MAGIC, OPTIONAL_HDR64_MAGIC};
use crate::cursor::{EntryCursor, TransformCursor};
use crate::debug_dir::{self, DebugDirectory};
use crate::endian;
use crate::error::{PexpError, Result};
use crate::export::{self, ExportDirectory, ExportInfo};
use crate::headers::{
    self, DataDirectory, DosHeader, FileHeader, NtHeaders, OptionalHeader, DOS_HEADER_SIZE,
};
use crate::import::{self, ImportDescriptor, ImportEntry, ThunkData};
use crate::machine::Machine;
use crate::offset::{FileOffset, NativeOffset, Pointed, VirtualOffset};
use crate::relocation::{self, BaseRelocation, RelocationEntry};
use crate::resource::{self, ResourceDataEntry, ResourceDirectory, ResourceDirectoryEntry};
use crate::section::{self, SectionHeader};
use crate::store::ByteStore;
use crate::tls::{self, AnyTlsDirectory};
use crate::unwind::{self, RuntimeFunction, UnwindCode, UnwindInfo};

/// Whether an image is PE32 (32-bit) or PE32+ (64-bit).
///
/// The original templates every image type on an `XX` non-type parameter;
/// there's no ergonomic equivalent in Rust without duplicating every facade
/// per bitness, so this crate picks the alternative its own design notes
/// call out: a runtime enum fixed once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitness {
    P32,
    P64,
}

impl Bitness {
    pub(crate) fn word_size(self) -> usize {
        match self {
            Bitness::P32 => 4,
            Bitness::P64 => 8,
        }
    }

    pub(crate) fn bits(self) -> u32 {
        match self {
            Bitness::P32 => 32,
            Bitness::P64 => 64,
        }
    }

    fn from_magic(magic: u16) -> Option<Self> {
        match magic {
            OPTIONAL_HDR32_MAGIC => Some(Bitness::P32),
            OPTIONAL_HDR64_MAGIC => Some(Bitness::P64),
            _ => None,
        }
    }
}

/// What a `FileHeader::characteristics` combination says the image is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Unknown,
    Executable,
    Dynamic,
}

/// A read-only, lazily-decoded view over a PE/COFF image, keyed on its
/// native offset flavour `N` (see [`FileImage`]/[`VirtualImage`]).
pub struct Image<S, N = FileOffset> {
    store: S,
    _native: PhantomData<fn() -> N>,
}

/// A PE image backed by on-disk (or otherwise file-shaped) layout: reads
/// against the store are keyed by plain file offset.
pub type FileImage<S> = Image<S, FileOffset>;

/// A PE image backed by a store that already presents bytes as loaded at
/// their RVAs (e.g. a [`crate::store::RawPointerStore`] over a module
/// mapped into the current process): reads against the store are keyed by
/// RVA directly, with no section-table translation needed for in-flavour
/// accesses.
pub type VirtualImage<S> = Image<S, VirtualOffset>;

fn read_exact<S: ByteStore, N: NativeOffset>(store: &S, offset: N, dest: &mut [u8]) -> Result<()> {
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

/// An offset flavour this crate's accessors can resolve against an image
/// with native flavour `N`: identity if the argument's own flavour already
/// matches `N`, otherwise translated through the section table (spec §4.1 —
/// "if the image's native flavour equals the argument's flavour, return the
/// argument; otherwise translate").
pub trait ResolvesOffset<N>: Copy {
    fn resolve<S: ByteStore>(self, image: &Image<S, N>) -> Result<N>;
}

impl ResolvesOffset<FileOffset> for FileOffset {
    fn resolve<S: ByteStore>(self, _image: &Image<S, FileOffset>) -> Result<FileOffset> {
        Ok(self)
    }
}

impl ResolvesOffset<VirtualOffset> for VirtualOffset {
    fn resolve<S: ByteStore>(self, _image: &Image<S, VirtualOffset>) -> Result<VirtualOffset> {
        Ok(self)
    }
}

impl ResolvesOffset<FileOffset> for VirtualOffset {
    fn resolve<S: ByteStore>(self, image: &Image<S, FileOffset>) -> Result<FileOffset> {
        image
            .to_file_offset(self)
            .ok_or(PexpError::InvalidOffset(self.value()))
    }
}

impl ResolvesOffset<VirtualOffset> for FileOffset {
    fn resolve<S: ByteStore>(self, image: &Image<S, VirtualOffset>) -> Result<VirtualOffset> {
        image
            .to_virtual_offset(self)
            .ok_or(PexpError::InvalidOffset(self.value()))
    }
}

/// Resolves `offset` to `image`'s native offset flavour, crossing through
/// the section table only when `offset`'s own flavour doesn't already match
/// (spec §4.1's `to_image_offset`, exposed here as a free function since the
/// crossing/identity dispatch it names lives in [`ResolvesOffset`] impls,
/// not as a method on `Image` itself).
pub fn to_image_offset<S: ByteStore, N, O: ResolvesOffset<N>>(image: &Image<S, N>, offset: O) -> Result<N> {
    offset.resolve(image)
}

fn validate_signature<S: ByteStore>(store: &S) -> bool {
    let mut dos_buf = [0u8; DOS_HEADER_SIZE];
    if store.read(0, &mut dos_buf) < dos_buf.len() {
        return false;
    }
    if endian::u16(&dos_buf[0..]) != DOS_SIGNATURE {
        return false;
    }
    let e_lfanew = endian::u32(&dos_buf[60..]) as u64;

    let mut sig_buf = [0u8; 4];
    if store.read(e_lfanew, &mut sig_buf) < sig_buf.len() {
        return false;
    }
    if endian::u32(&sig_buf) != NT_SIGNATURE {
        return false;
    }

    let mut magic_buf = [0u8; 2];
    let magic_offset = e_lfanew + 4 + headers::FILE_HEADER_SIZE as u64;
    if store.read(magic_offset, &mut magic_buf) < magic_buf.len() {
        return false;
    }
    Bitness::from_magic(endian::u16(&magic_buf)).is_some()
}

fn construct<S: ByteStore, N: NativeOffset>(store: S) -> Result<Image<S, N>> {
    if !validate_signature(&store) {
        warn!("rejected image: invalid DOS/NT signature or optional header magic");
        return Err(PexpError::InvalidFormat(
            "DOS/NT signature or optional header magic mismatch".into(),
        ));
    }
    debug!("validated PE image signatures");
    Ok(Image { store, _native: PhantomData })
}

impl<S: ByteStore> Image<S, FileOffset> {
    /// Checks the DOS/NT signatures and optional-header magic without
    /// building a full [`FileImage`].
    pub fn is_valid(store: &S) -> bool {
        validate_signature(store)
    }

    /// Wraps `store` as a file-shaped PE image, validating the DOS/NT
    /// signatures and optional-header magic up front.
    pub fn new(store: S) -> Result<Self> {
        construct(store)
    }
}

impl<S: ByteStore, N: NativeOffset> Image<S, N> {
    /// Wraps `store` as an image natively keyed on `N`, validating the
    /// DOS/NT signatures and optional-header magic up front. Reached
    /// unambiguously through the [`FileImage`]/[`VirtualImage`] aliases,
    /// e.g. `VirtualImage::with_store(store)` builds a loaded-in-memory
    /// image whose RVA-keyed reads are identity rather than translated
    /// through the section table.
    pub fn with_store(store: S) -> Result<Self> {
        construct(store)
    }
}

impl<S: ByteStore, N: NativeOffset> Image<S, N>
where
    VirtualOffset: ResolvesOffset<N>,
{
    /// Resolves a data-directory RVA to this image's native flavour,
    /// returning `None` if it doesn't translate (a file image where the RVA
    /// falls outside every section).
    fn resolve_rva(&self, rva: u32) -> Option<N> {
        VirtualOffset::new(rva as i64).resolve(self).ok()
    }

    pub fn dos_header(&self) -> Result<Pointed<N, DosHeader>> {
        let offset = N::from_raw(0);
        let header = headers::read_dos_header(&self.store, offset)?;
        Ok(Pointed::new(offset, header))
    }

    pub fn file_header(&self) -> Result<Pointed<N, FileHeader>> {
        let e_lfanew = self.dos_header()?.e_lfanew;
        let offset = N::from_raw(e_lfanew as i64) + 4i64;
        let header = headers::read_file_header(&self.store, offset)?;
        Ok(Pointed::new(offset, header))
    }

    pub fn optional_header(&self) -> Result<Pointed<N, OptionalHeader>> {
        let e_lfanew = self.dos_header()?.e_lfanew;
        let offset = N::from_raw(e_lfanew as i64) + 4i64 + headers::FILE_HEADER_SIZE as u64;
        let header = headers::read_optional_header(&self.store, offset)?;
        Ok(Pointed::new(offset, header))
    }

    pub fn nt_headers(&self) -> Result<Pointed<N, NtHeaders>> {
        let e_lfanew = self.dos_header()?.e_lfanew;
        let offset = N::from_raw(e_lfanew as i64);
        let signature = {
            let mut buf = [0u8; 4];
            read_exact(&self.store, offset, &mut buf)?;
            endian::u32(&buf)
        };
        Ok(Pointed::new(
            offset,
            NtHeaders {
                signature,
                file_header: self.file_header()?.into_inner(),
                optional_header: self.optional_header()?.into_inner(),
            },
        ))
    }

    pub fn bitness(&self) -> Result<Bitness> {
        let magic = self.optional_header()?.magic();
        Bitness::from_magic(magic)
            .ok_or_else(|| PexpError::InvalidFormat(format!("unrecognised magic {magic:#x}")))
    }

    pub fn kind(&self) -> Result<ImageKind> {
        use crate::characteristics::FileCharacteristics as FC;
        let file_header = self.file_header()?;
        let flags = FC::from_bits_truncate(file_header.characteristics);
        if flags.contains(FC::EXECUTABLE_IMAGE) {
            if flags.contains(FC::DLL) {
                return Ok(ImageKind::Dynamic);
            }
            return Ok(ImageKind::Executable);
        }
        Ok(ImageKind::Unknown)
    }

    pub fn machine(&self) -> Result<Machine> {
        Ok(Machine::from_raw(self.file_header()?.machine))
    }

    pub fn entry_point(&self) -> Result<VirtualOffset> {
        Ok(VirtualOffset::new(
            self.optional_header()?.address_of_entry_point() as i64,
        ))
    }

    pub fn subsystem(&self) -> Result<crate::subsystem::Subsystem> {
        Ok(crate::subsystem::Subsystem::from_raw(self.optional_header()?.subsystem()))
    }

    pub fn dll_characteristics(&self) -> Result<crate::dll_characteristics::DllCharacteristics> {
        Ok(crate::dll_characteristics::DllCharacteristics::from_bits_truncate(
            self.optional_header()?.dll_characteristics(),
        ))
    }

    pub fn data_directory(&self, entry: DirectoryEntry) -> Result<Option<DataDirectory>> {
        let opt_header = self.optional_header()?;
        let dir = opt_header.data_directory(entry.index());
        Ok(dir.filter(|d| d.virtual_address != 0 && d.size != 0))
    }

    /// Translates an RVA to a file offset: verbatim inside the header region
    /// (below `size_of_headers`), or through the containing section's raw
    /// data pointer otherwise. A pure function of the section table —
    /// correct regardless of this image's own native flavour.
    pub fn to_file_offset(&self, rva: VirtualOffset) -> Option<FileOffset> {
        let size_of_headers = self.optional_header().ok()?.size_of_headers();
        if rva.value() >= 0 && (rva.value() as u64) < size_of_headers as u64 {
            return Some(FileOffset::new(rva.value()));
        }
        for section in self.section_headers() {
            let section = section.ok()?.into_inner();
            let section_start = FileOffset::new(section.pointer_to_raw_data as i64);
            let section_vstart = VirtualOffset::new(section.virtual_address as i64);
            let section_end = section_vstart + section.size_of_raw_data;
            if section_vstart <= rva && rva < section_end {
                return Some(section_start + (rva - section_vstart));
            }
        }
        warn!("RVA {rva} does not translate within this image");
        None
    }

    /// Translates a file offset to an RVA (the inverse of
    /// [`Self::to_file_offset`]); likewise independent of this image's own
    /// native flavour.
    pub fn to_virtual_offset(&self, offset: FileOffset) -> Option<VirtualOffset> {
        let size_of_headers = self.optional_header().ok()?.size_of_headers();
        if offset.value() >= 0 && (offset.value() as u64) < size_of_headers as u64 {
            return Some(VirtualOffset::new(offset.value()));
        }
        for section in self.section_headers() {
            let section = section.ok()?.into_inner();
            let section_start = FileOffset::new(section.pointer_to_raw_data as i64);
            let section_vstart = VirtualOffset::new(section.virtual_address as i64);
            let section_end = section_start + section.size_of_raw_data;
            if section_start <= offset && offset < section_end {
                return Some(section_vstart + (offset - section_start));
            }
        }
        None
    }

    /// Copies up to `dest.len()` bytes starting at `offset` (in either
    /// offset flavour, resolved to this image's native one), returning the
    /// bytes actually copied and the native offset they were read from.
    pub fn read<O: ResolvesOffset<N>>(&self, offset: O, dest: &mut [u8]) -> Result<(usize, N)> {
        let native = offset.resolve(self)?;
        let got = self.store.read(native.value() as u64, dest);
        Ok((got, native))
    }

    /// Reads a NUL-terminated string, growing the read buffer by 1.5x
    /// (starting at 10 code units) until a terminator is found or storage
    /// is exhausted.
    pub fn read_string<O: ResolvesOffset<N>>(&self, from: O) -> Result<Pointed<N, String>> {
        let data_offset = from.resolve(self)?;
        let mut buf_len = 10usize;
        let mut read_offset = data_offset;
        let mut out = Vec::new();
        loop {
            let mut buf = vec![0u8; buf_len];
            let (bytes_read, _) = self.read(read_offset, &mut buf)?;
            let read_slice = &buf[..bytes_read];
            match read_slice.iter().position(|&b| b == 0) {
                Some(nul_pos) => {
                    out.extend_from_slice(&read_slice[..nul_pos]);
                    break;
                }
                None => {
                    out.extend_from_slice(read_slice);
                    if bytes_read < buf_len {
                        break; // ran off the end of storage with no NUL
                    }
                    read_offset += bytes_read as i64;
                    buf_len = (buf_len as f64 * 1.5) as usize;
                }
            }
        }
        Ok(Pointed::new(data_offset, String::from_utf8_lossy(&out).into_owned()))
    }

    /// Reads exactly `length` bytes as a string with no NUL handling — used
    /// for fixed-size fields like the copyright directory.
    pub fn read_string_sized<O: ResolvesOffset<N>>(
        &self,
        from: O,
        length: usize,
    ) -> Result<Pointed<N, String>> {
        let mut buf = vec![0u8; length];
        let (bytes_read, offset) = self.read(from, &mut buf)?;
        buf.truncate(bytes_read);
        Ok(Pointed::new(offset, String::from_utf8_lossy(&buf).into_owned()))
    }

    pub fn copyright_str(&self) -> Result<Option<Pointed<N, String>>> {
        match self.data_directory(DirectoryEntry::ARCHITECTURE)? {
            Some(dir) => Ok(Some(self.read_string_sized(
                VirtualOffset::new(dir.virtual_address as i64),
                dir.size as usize,
            )?)),
            None => Ok(None),
        }
    }

    pub fn section_headers(&self) -> EntryCursor<'_, N, Pointed<N, SectionHeader>> {
        let (begin, distance) = match self.section_headers_range() {
            Ok(v) => v,
            Err(_) => (N::from_raw(0), 0),
        };
        EntryCursor::new(
            begin,
            move |offset: N| {
                let header = section::read_section_header(&self.store, offset)?;
                Ok(Pointed::new(offset, header))
            },
            |_, offset| offset + section::SECTION_HEADER_SIZE as i64,
            move |_, consumed| consumed >= distance,
        )
    }

    fn section_headers_range(&self) -> Result<(N, i64)> {
        let nt_headers = self.nt_headers()?;
        let opt_header_offset = nt_headers.offset() + 4i64 + headers::FILE_HEADER_SIZE as i64;
        let section_headers_offset =
            opt_header_offset + nt_headers.file_header.size_of_optional_header as i64;
        let distance =
            nt_headers.file_header.number_of_sections as i64 * section::SECTION_HEADER_SIZE as i64;
        Ok((section_headers_offset, distance))
    }

    pub fn base_relocations(&self) -> EntryCursor<'_, N, Pointed<N, BaseRelocation>> {
        let (begin, distance) = self.directory_range(DirectoryEntry::BaseReloc).unwrap_or((N::from_raw(0), 0));
        EntryCursor::new(
            begin,
            move |offset: N| {
                let block = relocation::read_base_relocation(&self.store, offset)?;
                Ok(Pointed::new(offset, block))
            },
            |block, offset| offset + block.size_of_block as i64,
            move |_, consumed| consumed >= distance,
        )
    }

    /// The type/address entries of one relocation block, resolved against
    /// its own base RVA.
    pub fn relocation_entries(
        &self,
        block: &Pointed<N, BaseRelocation>,
    ) -> TransformCursor<EntryCursor<'_, N, u16>, impl FnMut(u16) -> Result<RelocationEntry>> {
        const HEADER_SIZE: i64 = 8;
        let entries_offset = block.offset() + HEADER_SIZE;
        let entries_size = block.size_of_block as i64 - HEADER_SIZE;
        let block_base = VirtualOffset::new(block.virtual_address as i64);
        let cursor = EntryCursor::new(
            entries_offset,
            move |offset: N| {
                let mut buf = [0u8; 2];
                let (got, _) = self.read(offset, &mut buf)?;
                if got < 2 {
                    return Err(PexpError::MalformedImage {
                        offset: offset.value(),
                        expected: 2,
                        got,
                    });
                }
                Ok(endian::u16(&buf))
            },
            |_, offset| offset + 2i64,
            move |_, consumed| consumed >= entries_size.max(0),
        );
        TransformCursor::new(cursor, move |raw| {
            Ok(relocation::decode_relocation_entry(raw, block_base))
        })
    }

    pub fn debug_directories(&self) -> EntryCursor<'_, N, Pointed<N, DebugDirectory>> {
        let (begin, distance) = self.directory_range(DirectoryEntry::Debug).unwrap_or((N::from_raw(0), 0));
        EntryCursor::new(
            begin,
            move |offset: N| {
                let dir = debug_dir::read_debug_directory(&self.store, offset)?;
                Ok(Pointed::new(offset, dir))
            },
            |_, offset| offset + debug_dir::DEBUG_DIRECTORY_SIZE as i64,
            move |_, consumed| consumed >= distance,
        )
    }

    pub fn exception_entries(&self) -> EntryCursor<'_, N, Pointed<N, RuntimeFunction>> {
        let (begin, distance) = self.directory_range(DirectoryEntry::Exception).unwrap_or((N::from_raw(0), 0));
        EntryCursor::new(
            begin,
            move |offset: N| {
                let entry = unwind::read_runtime_function(&self.store, offset)?;
                Ok(Pointed::new(offset, entry))
            },
            |_, offset| offset + unwind::RUNTIME_FUNCTION_SIZE as i64,
            move |_, consumed| consumed >= distance,
        )
    }

    /// Resolves a runtime function's unwind-data RVA and reads the fixed
    /// `UNWIND_INFO` header at it.
    pub fn unwind_info(&self, runtime_function: &RuntimeFunction) -> Result<Pointed<N, UnwindInfo>> {
        let offset = self
            .resolve_rva(runtime_function.unwind_data)
            .ok_or(PexpError::InvalidUnwindOffset(VirtualOffset::new(runtime_function.unwind_data as i64)))?;
        let info = unwind::read_unwind_info(&self.store, offset)?;
        Ok(Pointed::new(offset, info))
    }

    pub fn unwind_codes(&self, unwind_info: &Pointed<N, UnwindInfo>) -> EntryCursor<'_, N, UnwindCode> {
        let begin = unwind_info.offset() + unwind::UNWIND_INFO_HEADER_SIZE as i64;
        let count = unwind_info.count_of_codes as i64;
        EntryCursor::new(
            begin,
            move |offset: N| unwind::read_unwind_code(&self.store, offset),
            |_, offset| offset + unwind::UNWIND_CODE_SIZE as i64,
            move |_, consumed| consumed >= count * unwind::UNWIND_CODE_SIZE as i64,
        )
    }

    /// The exception/termination handler RVA that follows an unwind info's
    /// code array, if `UNW_FLAG_EHANDLER`/`UNW_FLAG_UHANDLER` is set and the
    /// record doesn't instead chain to another function.
    pub fn unwind_handler(
        &self,
        unwind_info: &Pointed<N, UnwindInfo>,
    ) -> Result<Option<Pointed<N, VirtualOffset>>> {
        if !unwind_info.has_handler() {
            return Ok(None);
        }
        let codes_offset = unwind_info.offset() + unwind::UNWIND_INFO_HEADER_SIZE as i64;
        let data_offset =
            codes_offset + unwind_info.count_of_codes as i64 * unwind::UNWIND_CODE_SIZE as i64;
        let mut buf = [0u8; 4];
        read_exact(&self.store, data_offset, &mut buf)?;
        let handler = VirtualOffset::new(endian::u32(&buf) as i64);
        Ok(Some(Pointed::new(data_offset, handler)))
    }

    fn directory_range(&self, entry: DirectoryEntry) -> Result<(N, i64)> {
        let dir = match self.data_directory(entry)? {
            Some(d) if d.size > 0 => d,
            _ => return Ok((N::from_raw(0), 0)),
        };
        let offset = match self.resolve_rva(dir.virtual_address) {
            Some(o) => o,
            None => return Ok((N::from_raw(0), 0)),
        };
        Ok((offset, dir.size as i64))
    }

    pub fn import_descriptors(&self) -> Result<EntryCursor<'_, N, Pointed<N, ImportDescriptor>>> {
        let dir = self
            .data_directory(DirectoryEntry::Import)?
            .filter(|d| d.size as usize >= import::IMPORT_DESCRIPTOR_SIZE)
            .ok_or_else(|| PexpError::InvalidImportDirectory("absent or undersized".into()))?;
        let begin = self
            .resolve_rva(dir.virtual_address)
            .ok_or_else(|| PexpError::InvalidImportDirectory("RVA does not translate".into()))?;

        Ok(EntryCursor::new(
            begin,
            move |offset: N| {
                let descriptor = import::read_import_descriptor(&self.store, offset)?;
                Ok(Pointed::new(offset, descriptor))
            },
            |_, offset| offset + import::IMPORT_DESCRIPTOR_SIZE as i64,
            |value, _| matches!(value, Some(d) if import::is_zero_descriptor(d)),
        ))
    }

    fn thunk_cursor(&self, rva: u32) -> EntryCursor<'_, N, ThunkData> {
        let bitness = self.bitness().unwrap_or(Bitness::P32);
        let width = bitness.word_size() as i64;
        if rva == 0 {
            return EntryCursor::empty(N::from_raw(0));
        }
        match self.resolve_rva(rva) {
            Some(begin) => EntryCursor::new(
                begin,
                move |offset: N| import::read_thunk_data(&self.store, offset, bitness),
                move |_, offset| offset + width,
                move |value: Option<&ThunkData>, _| matches!(value, Some(t) if import::thunk_is_zero(t)),
            ),
            None => EntryCursor::empty(N::from_raw(0)),
        }
    }

    pub fn thunks(&self, descriptor: &ImportDescriptor) -> EntryCursor<'_, N, ThunkData> {
        self.thunk_cursor(descriptor.first_thunk)
    }

    pub fn original_thunks(&self, descriptor: &ImportDescriptor) -> EntryCursor<'_, N, ThunkData> {
        self.thunk_cursor(descriptor.original_first_thunk)
    }

    /// Classified import entries, read from the original (lookup) thunk
    /// table rather than the IAT — the original fixes this up at load time,
    /// so the lookup table is the one that still carries names/ordinals.
    pub fn import_entries(
        &self,
        descriptor: &ImportDescriptor,
    ) -> TransformCursor<EntryCursor<'_, N, ThunkData>, impl FnMut(ThunkData) -> Result<ImportEntry> + '_> {
        let bitness = self.bitness().unwrap_or(Bitness::P32);
        let flag = import::ordinal_flag(bitness);
        TransformCursor::new(self.original_thunks(descriptor), move |thunk: ThunkData| {
            if thunk.raw & flag != 0 {
                Ok(ImportEntry::Unnamed((thunk.raw & !flag) as u32))
            } else {
                let hint_name_rva = VirtualOffset::new(thunk.raw as i64);
                let name_rva = hint_name_rva + 2i64; // skip the WORD hint field
                let decoded = self.read_string(name_rva)?.into_inner();
                Ok(ImportEntry::Named(Pointed::new(name_rva, decoded)))
            }
        })
    }

    pub fn resource_directory(&self) -> Result<Option<ResourceDirectoryFacade<'_, S, N>>> {
        let dir = match self.data_directory(DirectoryEntry::Resource)? {
            Some(d) if d.size as usize >= resource::RESOURCE_DIRECTORY_HEADER_SIZE => d,
            _ => return Ok(None),
        };
        let begin = match self.resolve_rva(dir.virtual_address) {
            Some(o) => o,
            None => return Ok(None),
        };
        Ok(Some(ResourceDirectoryFacade::new(self, begin, begin)?))
    }

    pub fn tls_directory(&self) -> Result<Option<Pointed<N, AnyTlsDirectory>>> {
        let bitness = self.bitness()?;
        let size_needed = tls::size_of_tls_directory(bitness);
        let dir = match self.data_directory(DirectoryEntry::Tls)? {
            Some(d) if d.size as usize >= size_needed => d,
            _ => return Ok(None),
        };
        let offset = match self.resolve_rva(dir.virtual_address) {
            Some(o) => o,
            None => return Ok(None),
        };
        let value = match bitness {
            Bitness::P32 => AnyTlsDirectory::P32(tls::read_tls_directory32(&self.store, offset)?),
            Bitness::P64 => AnyTlsDirectory::P64(tls::read_tls_directory64(&self.store, offset)?),
        };
        Ok(Some(Pointed::new(offset, value)))
    }

    pub fn tls_callbacks(&self, tls_directory: &AnyTlsDirectory) -> EntryCursor<'_, N, VirtualOffset> {
        let callbacks_rva = tls_directory.address_of_callbacks();
        if callbacks_rva == 0 {
            return EntryCursor::empty(N::from_raw(0));
        }
        let begin = match self.resolve_rva(callbacks_rva as u32) {
            Some(o) => o,
            None => return EntryCursor::empty(N::from_raw(0)),
        };
        let width = self.bitness().map(Bitness::word_size).unwrap_or(4) as i64;
        EntryCursor::new(
            begin,
            move |offset: N| {
                let mut buf = [0u8; 8];
                let (got, _) = self.read(offset, &mut buf[..width as usize])?;
                if got < width as usize {
                    return Err(PexpError::MalformedImage {
                        offset: offset.value(),
                        expected: width as usize,
                        got,
                    });
                }
                let raw = if width == 4 { endian::u32(&buf) as u64 } else { endian::u64(&buf) };
                Ok(VirtualOffset::new(raw as i64))
            },
            move |_, offset| offset + width,
            |value: Option<&VirtualOffset>, _| matches!(value, Some(v) if v.value() == 0),
        )
    }

    pub fn export_directory(&self) -> Result<Option<ExportDirectoryFacade<'_, S, N>>> {
        let dir = match self.data_directory(DirectoryEntry::Export)? {
            Some(d) if d.size as usize >= export::EXPORT_DIRECTORY_SIZE => d,
            _ => return Ok(None),
        };
        let offset = match self.resolve_rva(dir.virtual_address) {
            Some(o) => o,
            None => return Ok(None),
        };
        Ok(Some(ExportDirectoryFacade::new(self, offset)?))
    }
}

/// The export directory, plus the lookups built on top of it
/// (`ExportDirectoryFacade` in the grounding source).
pub struct ExportDirectoryFacade<'img, S, N = FileOffset> {
    image: &'img Image<S, N>,
    offset: N,
    directory: ExportDirectory,
}

impl<'img, S: ByteStore, N: NativeOffset> ExportDirectoryFacade<'img, S, N>
where
    VirtualOffset: ResolvesOffset<N>,
{
    fn new(image: &'img Image<S, N>, offset: N) -> Result<Self> {
        let directory = export::read_export_directory(&image.store, offset)?;
        Ok(Self { image, offset, directory })
    }

    pub fn offset(&self) -> N {
        self.offset
    }

    pub fn directory(&self) -> &ExportDirectory {
        &self.directory
    }

    pub fn name_str(&self) -> Result<Pointed<N, String>> {
        self.image.read_string(VirtualOffset::new(self.directory.name as i64))
    }

    fn function_rvas(&self) -> EntryCursor<'img, N, VirtualOffset> {
        self.dword_range(self.directory.address_of_functions, self.directory.number_of_functions)
    }

    fn name_rvas(&self) -> EntryCursor<'img, N, Pointed<VirtualOffset, String>> {
        let image = self.image;
        let (begin, distance) = match self.word_table_range(self.directory.address_of_names, self.directory.number_of_names) {
            Some(v) => v,
            None => return EntryCursor::empty(N::from_raw(0)),
        };
        // names() in the original reads each entry through read_rva_string,
        // i.e. a DWORD pointing at a NUL-terminated string, not the RVA itself.
        EntryCursor::new(
            begin,
            move |offset: N| {
                let mut buf = [0u8; 4];
                let (got, _) = image.read(offset, &mut buf)?;
                if got < 4 {
                    return Err(PexpError::MalformedImage { offset: offset.value(), expected: 4, got });
                }
                let name_rva = VirtualOffset::new(endian::u32(&buf) as i64);
                let decoded = image.read_string(name_rva)?.into_inner();
                Ok(Pointed::new(name_rva, decoded))
            },
            |_, offset| offset + 4i64,
            move |_, consumed| consumed >= distance,
        )
    }

    fn name_ordinals(&self) -> EntryCursor<'img, N, u16> {
        let image = self.image;
        let begin = match self.word_table_offset(self.directory.address_of_name_ordinals) {
            Some(o) => o,
            None => return EntryCursor::empty(N::from_raw(0)),
        };
        let distance = self.directory.number_of_names as i64 * 2;
        EntryCursor::new(
            begin,
            move |offset: N| {
                let mut buf = [0u8; 2];
                let (got, _) = image.read(offset, &mut buf)?;
                if got < 2 {
                    return Err(PexpError::MalformedImage { offset: offset.value(), expected: 2, got });
                }
                Ok(endian::u16(&buf))
            },
            |_, offset| offset + 2i64,
            move |_, consumed| consumed >= distance,
        )
    }

    fn word_table_offset(&self, rva: u32) -> Option<N> {
        if rva == 0 {
            return None;
        }
        self.image.resolve_rva(rva)
    }

    fn word_table_range(&self, rva: u32, count: u32) -> Option<(N, i64)> {
        let elem_size = 4i64;
        self.word_table_offset(rva).map(|begin| (begin, count as i64 * elem_size))
    }

    fn dword_range(&self, rva: u32, count: u32) -> EntryCursor<'img, N, VirtualOffset> {
        let image = self.image;
        let (begin, distance) = match self.word_table_range(rva, count) {
            Some(v) => v,
            None => return EntryCursor::empty(N::from_raw(0)),
        };
        EntryCursor::new(
            begin,
            move |offset: N| {
                let mut buf = [0u8; 4];
                let (got, _) = image.read(offset, &mut buf)?;
                if got < 4 {
                    return Err(PexpError::MalformedImage { offset: offset.value(), expected: 4, got });
                }
                Ok(VirtualOffset::new(endian::u32(&buf) as i64))
            },
            |_, offset| offset + 4i64,
            move |_, consumed| consumed >= distance,
        )
    }

    /// Resolves one export by ordinal. The ordinal is the public, 1-based
    /// (relative to `base`) export number; `functions()` is indexed from 0,
    /// so this is `ordinal` directly against that 0-based table, as in the
    /// grounding source.
    pub fn find_by_ordinal(&self, ordinal: u32) -> Result<Option<ExportInfo>> {
        if ordinal > self.directory.number_of_functions {
            return Ok(None);
        }

        let address = match self.function_rvas().nth(ordinal as usize) {
            Some(v) => v?,
            None => return Ok(None),
        };

        let mut info = ExportInfo {
            name: None,
            ordinal,
            address,
            name_ordinal: None,
            is_forwarded: false,
            forwarder_string: None,
        };

        if let Some(dir) = self.image.data_directory(DirectoryEntry::Export)? {
            if export::is_forwarded(address, VirtualOffset::new(dir.virtual_address as i64), dir.size) {
                info.is_forwarded = true;
                let decoded = self.image.read_string(address)?.into_inner();
                info.forwarder_string = Some(Pointed::new(address, decoded));
            }
        }

        let target_name_ordinal = ordinal.wrapping_sub(self.directory.base);
        for (name_index, exported_ordinal) in self.name_ordinals().enumerate() {
            let exported_ordinal = exported_ordinal?;
            if exported_ordinal as u32 == target_name_ordinal {
                info.name_ordinal = Some(exported_ordinal);
                info.name = self.name_rvas().nth(name_index).transpose()?;
                break;
            }
        }

        Ok(Some(info))
    }

    /// Resolves one export by name via a linear scan of the name table, as
    /// the grounding source does (the export name table is sorted, but this
    /// crate mirrors the original's scan rather than adding a binary search
    /// it never specified).
    pub fn find_by_name(&self, name: &str) -> Result<Option<ExportInfo>> {
        for (name_index, candidate) in self.name_rvas().enumerate() {
            let candidate = candidate?;
            if candidate.as_str() != name {
                continue;
            }

            let name_ordinal = match self.name_ordinals().nth(name_index) {
                Some(v) => v?,
                None => return Ok(None),
            };
            if name_ordinal as u32 >= self.directory.number_of_names {
                return Err(PexpError::MalformedExport {
                    ordinal: name_ordinal as u32,
                    number_of_names: self.directory.number_of_names,
                });
            }

            let address = match self.function_rvas().nth(name_ordinal as usize) {
                Some(v) => v?,
                None => return Ok(None),
            };

            let mut info = ExportInfo {
                name: Some(candidate),
                ordinal: self.directory.base + name_ordinal as u32,
                address,
                name_ordinal: Some(name_ordinal),
                is_forwarded: false,
                forwarder_string: None,
            };

            if let Some(dir) = self.image.data_directory(DirectoryEntry::Export)? {
                if export::is_forwarded(address, VirtualOffset::new(dir.virtual_address as i64), dir.size) {
                    info.is_forwarded = true;
                    let decoded = self.image.read_string(address)?.into_inner();
                    info.forwarder_string = Some(Pointed::new(address, decoded));
                }
            }

            return Ok(Some(info));
        }
        Ok(None)
    }
}

/// One node of the resource tree.
pub struct ResourceDirectoryFacade<'img, S, N = FileOffset> {
    image: &'img Image<S, N>,
    offset: N,
    rdata_begin: N,
    directory: ResourceDirectory,
}

impl<'img, S: ByteStore, N: NativeOffset> ResourceDirectoryFacade<'img, S, N>
where
    VirtualOffset: ResolvesOffset<N>,
{
    fn new(image: &'img Image<S, N>, offset: N, rdata_begin: N) -> Result<Self> {
        let directory = resource::read_resource_directory(&image.store, offset)?;
        Ok(Self { image, offset, rdata_begin, directory })
    }

    pub fn directory(&self) -> &ResourceDirectory {
        &self.directory
    }

    fn entries_range(&self, count: u16) -> EntryCursor<'img, N, ResourceDirectoryEntryFacade<'img, S, N>> {
        let image = self.image;
        let rdata_begin = self.rdata_begin;
        let begin = self.offset + resource::RESOURCE_DIRECTORY_HEADER_SIZE as i64;
        let distance = count as i64 * resource::RESOURCE_DIRECTORY_ENTRY_SIZE as i64;
        EntryCursor::new(
            begin,
            move |offset: N| {
                let entry = resource::read_resource_directory_entry(&image.store, offset)?;
                Ok(ResourceDirectoryEntryFacade { image, rdata_begin, entry })
            },
            |_, offset| offset + resource::RESOURCE_DIRECTORY_ENTRY_SIZE as i64,
            move |_, consumed| consumed >= distance,
        )
    }

    pub fn entries(&self) -> EntryCursor<'img, N, ResourceDirectoryEntryFacade<'img, S, N>> {
        self.entries_range(self.directory.number_of_named_entries + self.directory.number_of_id_entries)
    }

    pub fn named_entries(&self) -> EntryCursor<'img, N, ResourceDirectoryEntryFacade<'img, S, N>> {
        self.entries_range(self.directory.number_of_named_entries)
    }

    pub fn id_entries(&self) -> EntryCursor<'img, N, ResourceDirectoryEntryFacade<'img, S, N>> {
        self.entries_range(self.directory.number_of_id_entries)
    }
}

/// One entry of a resource directory: resolvable to either a nested
/// directory or a data leaf.
pub struct ResourceDirectoryEntryFacade<'img, S, N = FileOffset> {
    image: &'img Image<S, N>,
    rdata_begin: N,
    entry: ResourceDirectoryEntry,
}

impl<'img, S, N: Copy> Clone for ResourceDirectoryEntryFacade<'img, S, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'img, S, N: Copy> Copy for ResourceDirectoryEntryFacade<'img, S, N> {}

impl<'img, S: ByteStore, N: NativeOffset> ResourceDirectoryEntryFacade<'img, S, N>
where
    VirtualOffset: ResolvesOffset<N>,
{
    pub fn entry(&self) -> &ResourceDirectoryEntry {
        &self.entry
    }

    pub fn name_str(&self) -> Result<Option<String>> {
        if !self.entry.is_named() {
            return Ok(None);
        }
        let offset = self.rdata_begin + self.entry.id() as i64;
        Ok(Some(resource::read_resource_name(&self.image.store, offset)?))
    }

    pub fn as_data_entry(&self) -> Result<Option<Pointed<N, ResourceDataEntry>>> {
        if !self.entry.is_data_entry() {
            return Ok(None);
        }
        let offset = N::from_raw(self.entry.offset_to_data as i64);
        let data_entry = resource::read_resource_data_entry(&self.image.store, offset)?;
        Ok(Some(Pointed::new(offset, data_entry)))
    }

    /// The resolved (offset, size) of this entry's raw resource bytes.
    pub fn data(&self) -> Result<Option<(N, usize)>> {
        Ok(self
            .as_data_entry()?
            .map(|entry| (self.rdata_begin + entry.offset_to_data as i64, entry.size as usize)))
    }

    pub fn as_directory(&self) -> Result<Option<ResourceDirectoryFacade<'img, S, N>>> {
        if !self.entry.is_directory() {
            return Ok(None);
        }
        let offset = self.rdata_begin + self.entry.directory_offset() as i64;
        Ok(Some(ResourceDirectoryFacade::new(self.image, offset, self.rdata_begin)?))
    }
}
