pub mod archive;
pub mod config_file;
pub mod error;
pub mod json_bridge;
pub mod schema;
pub mod session;
pub mod store;

pub use archive::AnchorArchive;
pub use config_file::{load_config, load_config_or_default, parse_config};
pub use error::{Result, StoreError};
pub use session::{DATA_DIR_ENV, DEFAULT_SESSION, default_base_dir, open_session, session_path};
pub use store::{Store, StoreStats};
