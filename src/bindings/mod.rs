//! Host bindings (spec §9): thin wrappers over [`crate::System`] for a
//! particular embedding. Feature-gated so the plain `rlib` build doesn't
//! pull in wasm-bindgen.

#[cfg(feature = "wasm")]
pub mod wasm;
