//! SRAM/Flash/EEPROM backing store (spec §6, §9).
//!
//! Flash chips are command-driven: a handful of magic byte sequences
//! written to $5555/$2AAA switch the chip between plain read, ID, erase,
//! and program states. This mirrors real SST/Macronix flash behavior and
//! is exactly the kind of small state machine the teacher's mapper code
//! favors (command bytes decoded with a direct match rather than a table).

use super::SaveType;
use crate::error::{CoreError, CoreResult};

const SRAM_SIZE: usize = 32 * 1024;
const FLASH64K_SIZE: usize = 64 * 1024;
const FLASH128K_SIZE: usize = 128 * 1024;
const EEPROM_SMALL_SIZE: usize = 512;
const EEPROM_LARGE_SIZE: usize = 8 * 1024;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub(crate) enum FlashState {
    Idle,
    Command1,
    Command2,
    Erasing,
    Writing,
    SwitchingBank,
    IdMode,
}

#[derive(Debug)]
pub enum BackupStore {
    None,
    Sram(Vec<u8>),
    Flash {
        data: Vec<u8>,
        state: FlashState,
        bank: usize,
        is_128k: bool,
    },
    Eeprom(Vec<u8>),
}

impl BackupStore {
    pub fn new(kind: SaveType, save_bytes: Option<Vec<u8>>) -> CoreResult<BackupStore> {
        Ok(match kind {
            SaveType::None => BackupStore::None,
            SaveType::Sram => BackupStore::Sram(init_buf(save_bytes, SRAM_SIZE)?),
            SaveType::Flash64k => BackupStore::Flash {
                data: init_buf(save_bytes, FLASH64K_SIZE)?,
                state: FlashState::Idle,
                bank: 0,
                is_128k: false,
            },
            SaveType::Flash128k => BackupStore::Flash {
                data: init_buf(save_bytes, FLASH128K_SIZE)?,
                state: FlashState::Idle,
                bank: 0,
                is_128k: true,
            },
            SaveType::Eeprom => {
                // Size isn't knowable from the ROM scan alone; the device
                // autosizes on first large-DMA access in real hardware.
                // We accept whichever of the two legal sizes the host
                // supplies, defaulting to the larger.
                let buf = save_bytes.unwrap_or_else(|| vec![0xFFu8; EEPROM_LARGE_SIZE]);
                if buf.len() != EEPROM_SMALL_SIZE && buf.len() != EEPROM_LARGE_SIZE {
                    return Err(CoreError::MalformedSaveFile(
                        "EEPROM save must be 512 bytes or 8192 bytes",
                    ));
                }
                BackupStore::Eeprom(buf)
            }
        })
    }

    pub fn read(&mut self, addr: u32) -> u8 {
        match self {
            BackupStore::None => 0xFF,
            BackupStore::Sram(buf) => buf[(addr as usize) % buf.len()],
            BackupStore::Flash {
                data,
                state,
                bank,
                ..
            } => {
                if *state == FlashState::IdMode && addr < 2 {
                    // Sanyo manufacturer/device ID pair, fixed values
                    // used by save-type probing software.
                    return if addr == 0 { 0x62 } else { 0x13 };
                }
                let offset = *bank * 0x1_0000 + (addr as usize % 0x1_0000);
                data[offset % data.len()]
            }
            BackupStore::Eeprom(buf) => buf[(addr as usize) % buf.len()],
        }
    }

    pub fn write(&mut self, addr: u32, value: u8) {
        match self {
            BackupStore::None => {}
            BackupStore::Sram(buf) => {
                let len = buf.len();
                buf[(addr as usize) % len] = value;
            }
            BackupStore::Flash {
                data,
                state,
                bank,
                is_128k,
            } => flash_write(data, state, bank, *is_128k, addr, value),
            BackupStore::Eeprom(buf) => {
                let len = buf.len();
                buf[(addr as usize) % len] = value;
            }
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            BackupStore::None => &[],
            BackupStore::Sram(buf) => buf,
            BackupStore::Flash { data, .. } => data,
            BackupStore::Eeprom(buf) => buf,
        }
    }
}

fn init_buf(save_bytes: Option<Vec<u8>>, expected: usize) -> CoreResult<Vec<u8>> {
    match save_bytes {
        None => Ok(vec![0xFFu8; expected]),
        Some(buf) if buf.len() == expected => Ok(buf),
        Some(buf) => {
            let _ = buf.len();
            Err(CoreError::MalformedSaveFile(
                "save file size does not match the detected backup type",
            ))
        }
    }
}

fn flash_write(
    data: &mut [u8],
    state: &mut FlashState,
    bank: &mut usize,
    is_128k: bool,
    addr: u32,
    value: u8,
) {
    match (*state, addr, value) {
        (FlashState::Idle, 0x5555, 0xAA) => *state = FlashState::Command1,
        (FlashState::Command1, 0x2AAA, 0x55) => *state = FlashState::Command2,
        (FlashState::Command2, 0x5555, 0x90) => {
            *state = FlashState::IdMode;
        }
        (FlashState::Command2, 0x5555, 0xF0) => {
            *state = FlashState::Idle;
        }
        (FlashState::Command2, 0x5555, 0x80) => {
            *state = FlashState::Erasing;
        }
        (FlashState::Command2, 0x5555, 0xA0) => {
            *state = FlashState::Writing;
        }
        (FlashState::Command2, 0x5555, 0xB0) if is_128k => {
            *state = FlashState::SwitchingBank;
        }
        (FlashState::Erasing, 0x5555, 0xAA) => {}
        (FlashState::Erasing, _, 0x30) => {
            let base = *bank * 0x1_0000 + (addr as usize & 0xF000);
            let len = data.len();
            for i in 0..0x1000 {
                data[(base + i) % len] = 0xFF;
            }
            *state = FlashState::Idle;
        }
        (FlashState::Writing, _, v) => {
            let offset = *bank * 0x1_0000 + (addr as usize % 0x1_0000);
            let len = data.len();
            data[offset % len] = v;
            *state = FlashState::Idle;
        }
        (FlashState::SwitchingBank, _, v) => {
            *bank = (v & 1) as usize;
            *state = FlashState::Idle;
        }
        _ => {
            *state = FlashState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sram_round_trips() {
        let mut store = BackupStore::new(SaveType::Sram, None).unwrap();
        store.write(0x10, 0x42);
        assert_eq!(store.read(0x10), 0x42);
    }

    #[test]
    fn rejects_mismatched_save_size() {
        let err = BackupStore::new(SaveType::Sram, Some(vec![0u8; 10])).unwrap_err();
        assert_eq!(
            err,
            CoreError::MalformedSaveFile("save file size does not match the detected backup type")
        );
    }

    #[test]
    fn flash_erase_sector_then_write_byte() {
        let mut store = BackupStore::new(SaveType::Flash64k, None).unwrap();
        store.write(0x5555, 0xAA);
        store.write(0x2AAA, 0x55);
        store.write(0x5555, 0x80);
        store.write(0x5555, 0xAA);
        store.write(0x2AAA, 0x55);
        store.write(0x0000, 0x30);
        assert_eq!(store.read(0x0000), 0xFF);

        store.write(0x5555, 0xAA);
        store.write(0x2AAA, 0x55);
        store.write(0x5555, 0xA0);
        store.write(0x0000, 0x7B);
        assert_eq!(store.read(0x0000), 0x7B);
    }
}
