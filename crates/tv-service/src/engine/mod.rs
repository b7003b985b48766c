//! Engine implementations

mod controller;
mod logs;

pub use controller::ControllerEngine;
pub use logs::LogDecoder;
