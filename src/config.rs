//! Host-supplied configuration (spec §6).

/// Construction-time configuration for a [`crate::System`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Render one frame out of every N; 0 disables frameskip entirely.
    pub frameskip: u8,
    /// Apply a gamma-like curve to the 15-bit-to-32-bit color lookup, to
    /// mimic the dimmer look of the original device's LCD.
    pub darken_screen: bool,
    /// Skip the firmware boot animation and jump directly into the
    /// cartridge entry point, using the HLE BIOS service table instead of a
    /// loaded firmware image.
    pub skip_bios: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            frameskip: 0,
            darken_screen: false,
            skip_bios: false,
        }
    }
}
