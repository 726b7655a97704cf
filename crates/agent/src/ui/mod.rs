//! Terminal output helpers for the CLI host.

pub mod qr;

pub use qr::{generate_png_qr, generate_terminal_qr};
