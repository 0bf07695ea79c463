pub mod start_end_packer;

pub use start_end_packer::{PackOptions, StartEndPacker};
