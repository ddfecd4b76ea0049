//! Template interpolation of task inputs.
//!
//! Tasks build a [`Tags`] store (usually [`Tags::for_experiment`]) and render
//! their string inputs through it.

mod error;
mod tags;
mod template;

pub use error::{InterpolationError, Result};
pub use tags::{EXPERIMENT_LABEL, Tags};
