//! Session configuration and settings

mod model;
mod settings;

pub use model::*;
pub use settings::*;
