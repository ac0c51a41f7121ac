pub mod cli;
pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod identity;
pub mod provision;

#[cfg(test)]
pub mod testing;
