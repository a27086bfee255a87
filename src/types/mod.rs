//! Core data types shared across the engine.

mod feedback;
mod field;
mod forecast;
mod recommendation;
mod state;

pub use feedback::*;
pub use field::*;
pub use forecast::*;
pub use recommendation::*;
pub use state::*;
