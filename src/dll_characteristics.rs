//! `OptionalHeader::dll_characteristics` flags.

use bitflags::bitflags;

bitflags! {
    /// Grounded on `peplus::DllCharacteristics` (`headers.hpp`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DllCharacteristics: u16 {
        const DYNAMIC_BASE          = 0x0040;
        const FORCE_INTEGRITY       = 0x0080;
        const NX_COMPAT             = 0x0100;
        const NO_ISOLATION          = 0x0200;
        const NO_SEH                = 0x0400;
        const NO_BIND               = 0x0800;
        const WDM_DRIVER            = 0x2000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}
