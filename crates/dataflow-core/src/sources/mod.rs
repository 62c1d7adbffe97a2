//! Built-in source filter types: nodes with no input slots.

pub mod signal_generator;
