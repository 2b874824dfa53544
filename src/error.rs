//! Error taxonomy for the host-facing surface (spec §7).
//!
//! Runtime soft faults (undefined instruction, unaligned privileged access,
//! misaligned SWI) are *not* represented here: they're logged and handled by
//! taking the corresponding CPU exception, never propagated to the host.

use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("firmware too big: expected 16384 bytes, got {0}")]
    FirmwareTooBig(usize),

    #[error("cartridge too big: expected at most 32 MiB, got {0} bytes")]
    CartridgeTooBig(usize),

    #[error("malformed save file: {0}")]
    MalformedSaveFile(&'static str),

    #[error(
        "unknown save type: prior save data was supplied, but no SRAM_/FLASH_/EEPROM_ \
         identifier was found in the ROM to say how to interpret it"
    )]
    UnknownSaveType,

    #[error("no usable framebuffer: expected a {expected}-byte host buffer, got {actual}")]
    NoFramebuffer { expected: usize, actual: usize },

    #[error("run_frame called without a loaded cartridge")]
    NoCartridgeLoaded,
}

pub type CoreResult<T> = Result<T, CoreError>;
