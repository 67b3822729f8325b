pub mod loader;
pub mod types;

pub use self::loader::{get_config_path, load_config};
pub use self::types::PageletConfig;
