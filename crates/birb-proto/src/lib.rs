pub mod config;
pub mod feed;
pub mod platform;
pub mod protocol;
