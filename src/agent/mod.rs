pub mod channels;
pub mod config;
pub mod daemon;
pub mod identity;
