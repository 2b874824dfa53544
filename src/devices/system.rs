//! The machine as a whole (spec §9), grounded on the teacher's `Nes`: owns
//! every subsystem directly (no back-pointers), implements `Motherboard`
//! to fan MMIO region reads/writes out to the right subsystem, and exposes
//! the host-facing surface (`new`, `load_firmware`, `load_cartridge`,
//! `run_frame`, `reset`) that a binding layer wraps.

use super::bus::{AccessKind, Bus, Motherboard, Region, WaitCnt};
use super::cartridge::Cartridge;
use super::cpu::{Cpu, WithCpu};
use super::dma::{DmaController, StartTiming};
use super::interrupts::InterruptController;
use super::mmio::Keypad;
use super::ppu::{self, Ppu, WithPpu};
use super::scheduler;
use super::timers::TimerBank;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};

/// Size in bytes of the ARGB8888 buffer [`System::copy_framebuffer_into`]
/// expects (spec §6).
pub const FRAMEBUFFER_SIZE: usize = ppu::structs::SCREEN_WIDTH * ppu::structs::SCREEN_HEIGHT * 4;

/// A machine: CPU, PPU, bus-backed memory, and the peripherals that hang
/// off the MMIO region (spec §9).
pub struct System {
    pub(crate) bus: Bus,
    cpu: Cpu,
    pub(crate) ppu: Ppu,
    pub(crate) timers: TimerBank,
    pub(crate) dma: DmaController,
    pub(crate) irq: InterruptController,
    keypad: Keypad,
    waitcnt_raw: u16,
    has_firmware: bool,
    config: Config,
    frame_counter: u32,
}

impl System {
    pub fn new(config: Config) -> System {
        let mut ppu = Ppu::new();
        ppu.set_darken_screen(config.darken_screen);
        let mut sys = System {
            bus: Bus::new(),
            cpu: Cpu::new(),
            ppu,
            timers: TimerBank::new(),
            dma: DmaController::new(),
            irq: InterruptController::new(),
            keypad: Keypad::new(),
            waitcnt_raw: 0,
            has_firmware: false,
            config,
            frame_counter: 0,
        };
        Cpu::reset(&mut sys);
        sys
    }

    /// Load a firmware image. Firmware must be the full 16KiB BIOS ROM
    /// size; anything else is almost certainly the wrong file (spec §6).
    pub fn load_firmware(&mut self, bytes: &[u8]) -> CoreResult<()> {
        if bytes.len() != super::bus::FIRMWARE_SIZE {
            return Err(CoreError::FirmwareTooBig(bytes.len()));
        }
        self.bus.load_firmware(bytes);
        self.has_firmware = true;
        Cpu::reset(self);
        Ok(())
    }

    /// Load a cartridge ROM, with optional prior save data, and reset the
    /// machine to its entry point.
    pub fn load_cartridge(&mut self, rom: Vec<u8>, save_bytes: Option<Vec<u8>>) -> CoreResult<()> {
        let cart = Cartridge::new(rom, save_bytes)?;
        self.bus.cart = Some(cart);
        self.reset();
        Ok(())
    }

    /// Snapshot of the cartridge's backup storage, for the host to persist.
    pub fn save_bytes(&self) -> Option<&[u8]> {
        self.bus.cart.as_ref().map(|c| c.save_bytes())
    }

    /// The last completed frame, BGR555 colors already expanded to
    /// RGBA8888 (spec §2).
    pub fn frame_buffer(&self) -> &[u8] {
        self.ppu.frame_buffer()
    }

    /// Copy the last completed frame into a host-owned ARGB8888 buffer
    /// (spec §6's `set_framebuffer`). `dest` must be exactly
    /// [`FRAMEBUFFER_SIZE`] bytes; anything else is a host contract
    /// violation (spec §7) rather than a silent partial copy.
    pub fn copy_framebuffer_into(&self, dest: &mut [u8]) -> CoreResult<()> {
        let src = self.ppu.frame_buffer();
        if dest.len() != src.len() {
            return Err(CoreError::NoFramebuffer {
                expected: src.len(),
                actual: dest.len(),
            });
        }
        dest.copy_from_slice(src);
        Ok(())
    }

    /// Update the live key state. `mask` follows KEYINPUT's active-low
    /// convention: a set bit means the key is *not* pressed (spec §6).
    pub fn set_keypad(&mut self, mask: u16) {
        self.keypad.set_mask(mask);
    }

    /// Run the machine until one frame has been produced. Honors
    /// [`Config::frameskip`]: every frame other than the first of each
    /// N-frame group is composited without touching the frame buffer, so
    /// the host keeps reading back the last rendered frame (spec §6).
    pub fn run_frame(&mut self) -> CoreResult<()> {
        if self.bus.cart.is_none() {
            return Err(CoreError::NoCartridgeLoaded);
        }
        let skip = self.config.frameskip > 0
            && self.frame_counter % self.config.frameskip as u32 != 0;
        self.ppu.set_skip_render(skip);
        while !self.ppu.is_frame_ready() {
            scheduler::step_once(self);
        }
        self.ppu.ack_frame();
        self.frame_counter = self.frame_counter.wrapping_add(1);
        Ok(())
    }

    /// Hardware reset: reinitializes the CPU, PPU, timers, DMA, and
    /// interrupt state and re-fetches the reset vector. WRAM, firmware,
    /// and any loaded cartridge are left alone, matching the real reset
    /// button (spec §9).
    pub fn reset(&mut self) {
        self.ppu.reset();
        self.timers = TimerBank::new();
        self.dma = DmaController::new();
        self.irq = InterruptController::new();
        Cpu::reset(self);
    }

    /// Snapshot the CPU's registers and flags as a flat byte buffer, for
    /// hosts implementing save states or verifying reset determinism
    /// (spec §8: two resets must serialize identically).
    pub fn cpu_state_bytes(&self) -> Vec<u8> {
        self.cpu.state.to_bytes()
    }

    fn mmio_read16(&mut self, offset: u32) -> u16 {
        match offset {
            0x000..=0x056 => ppu::reg_read16(self, offset),
            0x0B0..=0x0DF => self.dma_read16(offset),
            0x100..=0x10F => self.timer_read16(offset),
            0x130 => self.keypad.state,
            0x200 => self.irq.ie.bits(),
            0x202 => self.irq.iflags.bits(),
            0x204 => self.waitcnt_raw,
            0x208 => self.irq.ime as u16,
            _ => 0,
        }
    }

    fn mmio_write16(&mut self, offset: u32, value: u16) {
        match offset {
            0x000..=0x056 => ppu::reg_write16(self, offset, value),
            0x0B0..=0x0DF => self.dma_write16(offset, value),
            0x100..=0x10F => self.timer_write16(offset, value),
            0x200 => self.irq.ie = super::interrupts::IrqSource::from_bits_truncate(value),
            0x202 => self.irq.write_if(value),
            0x204 => {
                self.waitcnt_raw = value;
                self.bus.set_waitcnt(WaitCnt(value));
            }
            0x208 => self.irq.ime = value & 1 != 0,
            // HALTCNT lives at 0x301, one byte into this halfword; a
            // 16-bit write's low byte (POSTFLG) is read-only and ignored.
            0x300 => {
                let halt_byte = (value >> 8) as u8;
                if halt_byte & 0x80 != 0 {
                    self.cpu.state.stopped = true;
                } else {
                    self.cpu.state.halted = true;
                    self.irq.halt();
                }
            }
            _ => {}
        }
    }

    fn dma_read16(&self, offset: u32) -> u16 {
        let channel = ((offset - 0x0B0) / 12) as usize;
        let reg_off = (offset - 0x0B0) % 12;
        let ch = &self.dma.channels[channel];
        match reg_off {
            // SAD/DAD/CNT_L are write-only on real hardware.
            0 | 2 | 4 | 6 | 8 => 0,
            10 => {
                let dst_bits = match ch.dst_control {
                    super::dma::AddressControl::Increment => 0,
                    super::dma::AddressControl::Decrement => 1,
                    super::dma::AddressControl::Fixed => 2,
                    super::dma::AddressControl::IncrementReload => 3,
                };
                let src_bits = match ch.src_control {
                    super::dma::AddressControl::Increment => 0,
                    super::dma::AddressControl::Decrement => 1,
                    super::dma::AddressControl::Fixed => 2,
                    super::dma::AddressControl::IncrementReload => 0,
                };
                let timing_bits = match ch.start_timing {
                    StartTiming::Immediate => 0,
                    StartTiming::VBlank => 1,
                    StartTiming::HBlank => 2,
                    StartTiming::Special => 3,
                };
                dst_bits
                    | (src_bits << 2)
                    | if ch.repeat { 0x10 } else { 0 }
                    | if ch.word_transfer { 0x20 } else { 0 }
                    | (timing_bits << 6)
                    | if ch.irq_on_complete { 0x100 } else { 0 }
                    | if ch.enabled { 0x200 } else { 0 }
            }
            _ => 0,
        }
    }

    fn dma_write16(&mut self, offset: u32, value: u16) {
        let channel = ((offset - 0x0B0) / 12) as usize;
        let reg_off = (offset - 0x0B0) % 12;
        let ch = &mut self.dma.channels[channel];
        match reg_off {
            0 => ch.src = (ch.src & 0xFFFF_0000) | value as u32,
            2 => ch.src = (ch.src & 0x0000_FFFF) | ((value as u32) << 16),
            4 => ch.dst = (ch.dst & 0xFFFF_0000) | value as u32,
            6 => ch.dst = (ch.dst & 0x0000_FFFF) | ((value as u32) << 16),
            8 => ch.count = (ch.count & 0xFFFF_0000) | value as u32,
            10 => {
                let mut latched = false;
                ch.write_control(value, &mut latched);
                if latched {
                    self.dma.run_immediate(&mut self.bus, &mut self.irq);
                }
            }
            _ => {}
        }
    }

    fn timer_read16(&self, offset: u32) -> u16 {
        let channel = ((offset - 0x100) / 4) as usize;
        let reg_off = (offset - 0x100) % 4;
        match reg_off {
            0 => self.timers.counter_value(channel),
            2 => self.timers.timers[channel].control_bits(),
            _ => 0,
        }
    }

    fn timer_write16(&mut self, offset: u32, value: u16) {
        let channel = ((offset - 0x100) / 4) as usize;
        let reg_off = (offset - 0x100) % 4;
        match reg_off {
            0 => self.timers.timers[channel].reload = value,
            2 => self.timers.timers[channel].write_control(value),
            _ => {}
        }
    }
}

impl WithCpu for System {
    fn cpu(&self) -> &Cpu {
        &self.cpu
    }
    fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }
}

impl WithPpu for System {
    fn ppu(&self) -> &Ppu {
        &self.ppu
    }
    fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }
}

impl Motherboard for System {
    fn read8(&mut self, addr: u32, access: AccessKind) -> u8 {
        let (region, local) = super::bus::decode(addr);
        let value = self.bus.read8(addr, access);
        if region == Region::Mmio {
            let half = self.mmio_read16(local & !1);
            if local & 1 == 0 {
                (half & 0xFF) as u8
            } else {
                (half >> 8) as u8
            }
        } else {
            value
        }
    }

    fn read16(&mut self, addr: u32, access: AccessKind) -> u16 {
        let (region, local) = super::bus::decode(addr & !1);
        let value = self.bus.read16(addr, access);
        if region == Region::Mmio {
            self.mmio_read16(local)
        } else {
            value
        }
    }

    fn read32(&mut self, addr: u32, access: AccessKind) -> u32 {
        let (region, local) = super::bus::decode(addr & !3);
        let value = self.bus.read32(addr, access);
        if region == Region::Mmio {
            let lo = self.mmio_read16(local) as u32;
            let hi = self.mmio_read16(local + 2) as u32;
            lo | (hi << 16)
        } else {
            value
        }
    }

    fn write8(&mut self, addr: u32, data: u8, access: AccessKind) {
        let (region, local) = super::bus::decode(addr);
        self.bus.write8(addr, data, access);
        if region == Region::Mmio {
            let aligned = local & !1;
            let old = self.mmio_read16(aligned);
            let new = if local & 1 == 0 {
                super::mmio::with_lo_byte(old, data)
            } else {
                super::mmio::with_hi_byte(old, data)
            };
            self.mmio_write16(aligned, new);
        }
    }

    fn write16(&mut self, addr: u32, data: u16, access: AccessKind) {
        let (region, local) = super::bus::decode(addr & !1);
        self.bus.write16(addr, data, access);
        if region == Region::Mmio {
            self.mmio_write16(local, data);
        }
    }

    fn write32(&mut self, addr: u32, data: u32, access: AccessKind) {
        let (region, local) = super::bus::decode(addr & !3);
        self.bus.write32(addr, data, access);
        if region == Region::Mmio {
            self.mmio_write16(local, (data & 0xFFFF) as u16);
            self.mmio_write16(local + 2, (data >> 16) as u16);
        }
    }

    fn total_cycles(&self) -> u64 {
        self.bus.cycles
    }

    fn tick_internal(&mut self, cycles: u32) {
        self.bus.cycles += cycles as u64;
    }

    fn hle_enabled(&self) -> bool {
        self.config.skip_bios || !self.has_firmware
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cart(rom: Vec<u8>) -> Vec<u8> {
        rom
    }

    #[test]
    fn run_frame_without_cartridge_errors() {
        let mut sys = System::new(Config::default());
        assert_eq!(sys.run_frame(), Err(CoreError::NoCartridgeLoaded));
    }

    #[test]
    fn loading_undersized_firmware_is_rejected() {
        let mut sys = System::new(Config::default());
        assert_eq!(sys.load_firmware(&[0u8; 10]), Err(CoreError::FirmwareTooBig(10)));
    }

    #[test]
    fn no_firmware_means_hle_dispatch() {
        let sys = System::new(Config::default());
        assert!(sys.hle_enabled());
    }

    #[test]
    fn loading_firmware_disables_hle_unless_skip_bios() {
        let mut sys = System::new(Config::default());
        sys.load_firmware(&[0u8; super::super::bus::FIRMWARE_SIZE]).unwrap();
        assert!(!sys.hle_enabled());

        let mut skip = System::new(Config {
            skip_bios: true,
            ..Config::default()
        });
        skip.load_firmware(&[0u8; super::super::bus::FIRMWARE_SIZE]).unwrap();
        assert!(skip.hle_enabled());
    }

    #[test]
    fn keyinput_register_reflects_host_mask() {
        let mut sys = System::new(Config::default());
        sys.set_keypad(0x0000);
        assert_eq!(
            sys.read16(0x0400_0130, AccessKind::no_billing()),
            0x0000
        );
    }

    #[test]
    fn dispcnt_register_round_trips_through_mmio() {
        let mut sys = System::new(Config::default());
        sys.write16(0x0400_0000, 0x0403, AccessKind::no_billing());
        assert_eq!(sys.read16(0x0400_0000, AccessKind::no_billing()), 0x0403);
    }

    #[test]
    fn dma_immediate_start_fires_on_control_write() {
        let mut sys = System::new(Config::default());
        let rom = make_cart(vec![0u8; 0x1000]);
        sys.load_cartridge(rom, None).unwrap();

        sys.write32(0x0300_0000, 0xABCD_1234, AccessKind::no_billing());
        sys.write32(0x0400_00B0, 0x0300_0000, AccessKind::no_billing()); // DMA0SAD
        sys.write32(0x0400_00B4, 0x0300_1000, AccessKind::no_billing()); // DMA0DAD
        sys.write16(0x0400_00B8, 1, AccessKind::no_billing()); // DMA0CNT_L
        sys.write16(0x0400_00BA, 0x200 | 0x20, AccessKind::no_billing()); // enable, word

        assert_eq!(
            sys.read32(0x0300_1000, AccessKind::no_billing()),
            0xABCD_1234
        );
    }

    #[test]
    fn ie_if_round_trip_write_one_to_clear() {
        let mut sys = System::new(Config::default());
        sys.write16(0x0400_0200, 0x0001, AccessKind::no_billing()); // IE = VBLANK
        assert_eq!(sys.read16(0x0400_0200, AccessKind::no_billing()), 0x0001);
        sys.irq.raise(super::super::interrupts::IrqSource::VBLANK);
        sys.write16(0x0400_0202, 0x0001, AccessKind::no_billing());
        assert_eq!(sys.read16(0x0400_0202, AccessKind::no_billing()), 0x0000);
    }

    #[test]
    fn copy_framebuffer_into_rejects_a_mismatched_host_buffer() {
        let sys = System::new(Config::default());
        let mut too_small = vec![0u8; FRAMEBUFFER_SIZE - 4];
        assert_eq!(
            sys.copy_framebuffer_into(&mut too_small),
            Err(CoreError::NoFramebuffer {
                expected: FRAMEBUFFER_SIZE,
                actual: FRAMEBUFFER_SIZE - 4,
            })
        );
    }

    #[test]
    fn copy_framebuffer_into_fills_a_correctly_sized_host_buffer() {
        let sys = System::new(Config::default());
        let mut dest = vec![0xAAu8; FRAMEBUFFER_SIZE];
        sys.copy_framebuffer_into(&mut dest).unwrap();
        assert_eq!(&dest[..], sys.frame_buffer());
    }

    #[test]
    fn frameskip_zero_never_skips() {
        let mut sys = System::new(Config::default());
        sys.load_cartridge(make_cart(vec![0u8; 0x1000]), None).unwrap();
        for _ in 0..3 {
            sys.run_frame().unwrap();
            assert!(!sys.ppu.skip_render());
        }
    }

    #[test]
    fn frameskip_n_renders_one_frame_out_of_every_n() {
        let mut sys = System::new(Config {
            frameskip: 3,
            ..Config::default()
        });
        sys.load_cartridge(make_cart(vec![0u8; 0x1000]), None).unwrap();
        let expected_skip = [false, true, true, false, true, true];
        for skip in expected_skip {
            sys.run_frame().unwrap();
            assert_eq!(sys.ppu.skip_render(), skip);
        }
    }

    #[test]
    fn reset_twice_serializes_the_cpu_state_identically() {
        let mut sys = System::new(Config::default());
        sys.load_cartridge(make_cart(vec![0u8; 0x1000]), None).unwrap();
        for _ in 0..50 {
            scheduler::step_once(&mut sys);
        }
        sys.reset();
        let first = sys.cpu_state_bytes();
        sys.reset();
        let second = sys.cpu_state_bytes();
        assert_eq!(first, second);
    }
}
