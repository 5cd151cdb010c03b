pub mod audio;
pub mod units;
