pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod plugins;
pub mod services;
pub mod storage;
pub mod sync;
#[cfg(test)]
pub mod test_helpers;
