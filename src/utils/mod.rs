pub mod config;

pub use config::DriverConfig;
