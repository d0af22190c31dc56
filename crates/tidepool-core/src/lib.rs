pub mod config;
pub mod error;
pub mod types;

pub use config::{DataSourceSection, PoolFileConfig, PoolSection};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
