pub mod device;
pub mod trace;
