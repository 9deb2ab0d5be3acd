//! A lazy, read-only parser for the PE/COFF executable image format.
//!
//! Nothing in a [`Image`] is decoded until it is asked for: headers are read
//! on first access, and every variable-length table (sections, imports,
//! exports, relocations, resources, TLS callbacks, exception unwind data) is
//! walked through a forward-only cursor (see [`cursor`]) rather than
//! collected up front.

mod characteristics;
mod consts;
mod cursor;
mod debug_dir;
mod dll_characteristics;
mod endian;
mod error;
mod export;
mod headers;
mod image;
mod import;
mod machine;
mod offset;
mod relocation;
mod resource;
mod section;
mod store;
mod subsystem;
mod tls;
mod unwind;

pub use characteristics::FileCharacteristics;
pub use consts::{
    DirectoryEntry, DOS_SIGNATURE, NT_SIGNATURE, NUMBEROF_DIRECTORY_ENTRIES, OPTIONAL_HDR32_MAGIC,
    OPTIONAL_HDR64_MAGIC,
};
pub use cursor::{EntryCursor, TransformCursor};
pub use debug_dir::DebugDirectory;
pub use dll_characteristics::DllCharacteristics;
pub use error::{PexpError, Result};
pub use export::{ExportDirectory, ExportInfo};
pub use headers::{DataDirectory, DosHeader, FileHeader, NtHeaders, OptionalHeader, OptionalHeaderFields};
pub use image::{
    to_image_offset, Bitness, ExportDirectoryFacade, FileImage, Image, ImageKind, ResolvesOffset,
    ResourceDirectoryEntryFacade, ResourceDirectoryFacade, VirtualImage,
};
pub use import::{ImportDescriptor, ImportEntry, ThunkData};
pub use machine::Machine;
pub use offset::{FileOffset, NativeOffset, Pointed, VirtualOffset};
pub use relocation::{BaseRelocation, RelocationEntry};
pub use resource::{ResourceDataEntry, ResourceDirectory, ResourceDirectoryEntry};
pub use section::{SectionFlags, SectionHeader};
pub use store::{ByteStore, RawPointerStore, SliceStore};
pub use subsystem::Subsystem;
pub use tls::{AnyTlsDirectory, TlsDirectory};
pub use unwind::{
    RuntimeFunction, UnwindCode, UnwindInfo, UNW_FLAG_CHAININFO, UNW_FLAG_EHANDLER, UNW_FLAG_NHANDLER,
    UNW_FLAG_UHANDLER,
};
