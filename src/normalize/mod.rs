//! Turns AEMET's irregular nested JSON into fixed-shape records.
//!
//! Shape problems (empty lists, missing keys, too few forecast days) make the
//! normalizers return `None`; they never panic and never return an error.

pub mod forecast;
pub mod number;
pub mod observation;
