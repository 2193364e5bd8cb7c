mod core;
mod layout;
mod options;

pub use self::core::{Capabilities, DbflowRuntime};
pub use layout::FilesystemLayout;
pub use options::{DBFLOW_HOME_ENV, DbflowOptions, default_data_dir};
