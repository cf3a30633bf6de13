//! Store access (spec.md §4.G, §7 Store).

pub mod devices;
pub mod status_writer;
