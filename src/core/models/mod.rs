pub mod status;
pub mod usage;
