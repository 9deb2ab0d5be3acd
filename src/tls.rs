//! Thread-local storage directory (`IMAGE_TLS_DIRECTORY`).

use crate::endian;
use crate::error::{PexpError, Result};
use crate::image::Bitness;
use crate::offset::NativeOffset;
use crate::store::ByteStore;

/// `TlsDirectory<32>`/`TlsDirectory<64>` fields, generic over the
/// platform-word type the same way [`crate::headers::OptionalHeaderFields`]
/// is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsDirectory<W> {
    pub start_address_of_raw_data: W,
    pub end_address_of_raw_data: W,
    pub address_of_index: W,
    pub address_of_callbacks: W,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
}

impl<W> TlsDirectory<W> {
    /// The 4-bit alignment field packed into `characteristics` bits 20..24
    /// (the original's anonymous bitfield union member).
    pub fn alignment(&self) -> u32 {
        (self.characteristics >> 20) & 0xf
    }
}

pub(crate) fn size_of_tls_directory(bitness: Bitness) -> usize {
    bitness.word_size() * 4 + 8
}

pub(crate) fn read_tls_directory32<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<TlsDirectory<u32>> {
    let size = size_of_tls_directory(Bitness::P32);
    let mut buf = vec![0u8; size];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    Ok(TlsDirectory {
        start_address_of_raw_data: endian::u32(&buf[0..]),
        end_address_of_raw_data: endian::u32(&buf[4..]),
        address_of_index: endian::u32(&buf[8..]),
        address_of_callbacks: endian::u32(&buf[12..]),
        size_of_zero_fill: endian::u32(&buf[16..]),
        characteristics: endian::u32(&buf[20..]),
    })
}

pub(crate) fn read_tls_directory64<S: ByteStore, O: NativeOffset>(
    store: &S,
    offset: O,
) -> Result<TlsDirectory<u64>> {
    let size = size_of_tls_directory(Bitness::P64);
    let mut buf = vec![0u8; size];
    let got = store.read(offset.value() as u64, &mut buf);
    if got < buf.len() {
        return Err(PexpError::MalformedImage {
            offset: offset.value(),
            expected: buf.len(),
            got,
        });
    }
    Ok(TlsDirectory {
        start_address_of_raw_data: endian::u64(&buf[0..]),
        end_address_of_raw_data: endian::u64(&buf[8..]),
        address_of_index: endian::u64(&buf[16..]),
        address_of_callbacks: endian::u64(&buf[24..]),
        size_of_zero_fill: endian::u32(&buf[32..]),
        characteristics: endian::u32(&buf[36..]),
    })
}

/// Either bitness's TLS directory, as returned by
/// [`crate::image::Image::tls_directory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyTlsDirectory {
    P32(TlsDirectory<u32>),
    P64(TlsDirectory<u64>),
}

impl AnyTlsDirectory {
    pub fn address_of_callbacks(&self) -> u64 {
        match self {
            AnyTlsDirectory::P32(d) => d.address_of_callbacks as u64,
            AnyTlsDirectory::P64(d) => d.address_of_callbacks,
        }
    }

    pub fn alignment(&self) -> u32 {
        match self {
            AnyTlsDirectory::P32(d) => d.alignment(),
            AnyTlsDirectory::P64(d) => d.alignment(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_reads_the_packed_bitfield() {
        // reserved_0: 20 bits, alignment: 4 bits, reserved_1: 8 bits
        let dir = TlsDirectory {
            start_address_of_raw_data: 0u32,
            end_address_of_raw_data: 0,
            address_of_index: 0,
            address_of_callbacks: 0,
            size_of_zero_fill: 0,
            characteristics: 9 << 20,
        };
        assert_eq!(dir.alignment(), 9);
    }
}
