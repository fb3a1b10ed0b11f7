pub mod env;
pub mod loader;
pub mod types;

pub use loader::{discover_config_file, load_config, load_config_file};
pub use types::ClientConfig;
