//! WASM front-end, grounded on the teacher's `bindings/wasm.rs`: a thin
//! wrapper exposing `System`'s host-facing surface to JavaScript.

use js_sys::Uint8Array;
use std::panic;
use wasm_bindgen::prelude::*;

use crate::config::Config;
use crate::devices::system::System;

#[wasm_bindgen]
pub struct CoreEmulator {
    system: System,
}

#[wasm_bindgen]
impl CoreEmulator {
    #[wasm_bindgen(constructor)]
    pub fn new(skip_bios: bool) -> CoreEmulator {
        let config = Config {
            skip_bios,
            ..Config::default()
        };
        CoreEmulator {
            system: System::new(config),
        }
    }

    #[wasm_bindgen(js_name = loadFirmware)]
    pub fn load_firmware(&mut self, bytes: &[u8]) -> Result<(), JsValue> {
        self.system
            .load_firmware(bytes)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    #[wasm_bindgen(js_name = loadCartridge)]
    pub fn load_cartridge(&mut self, rom: &[u8], save: Option<Vec<u8>>) -> Result<(), JsValue> {
        self.system
            .load_cartridge(rom.to_vec(), save)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    #[wasm_bindgen(js_name = setKeypad)]
    pub fn set_keypad(&mut self, mask: u16) {
        self.system.set_keypad(mask);
    }

    /// Run until a frame is ready and return it, BGR555 already expanded
    /// to RGBA8888.
    #[wasm_bindgen(js_name = runFrame)]
    pub fn run_frame(&mut self) -> Result<Uint8Array, JsValue> {
        self.system
            .run_frame()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Uint8Array::from(self.system.frame_buffer()))
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.system.reset();
    }

    #[wasm_bindgen(js_name = saveBytes)]
    pub fn save_bytes(&self) -> Option<Uint8Array> {
        self.system.save_bytes().map(Uint8Array::from)
    }
}

/// Installs a global panic handler to make debugging easier in the
/// browser console.
#[wasm_bindgen(js_name = initDebugHooks)]
pub fn init_debug_hooks() {
    panic::set_hook(Box::new(console_error_panic_hook::hook));
}
