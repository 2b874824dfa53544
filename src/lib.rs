#[macro_use]
extern crate bitflags;

#[cfg(feature = "wasm")]
extern crate wasm_bindgen;

pub mod bindings;
pub mod config;
pub mod devices;
pub mod error;

pub use config::Config;
pub use devices::system::System;
pub use error::CoreError;
