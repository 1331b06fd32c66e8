//! Helper functions for the render surface

mod date;
mod html;

pub use date::*;
pub use html::*;
