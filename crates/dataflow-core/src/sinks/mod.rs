//! Built-in sink filter types: terminal nodes with no output slots.

pub mod aggregator;
