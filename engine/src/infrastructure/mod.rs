mod config;
mod detectors;
mod file_store;
mod hooks;
mod locator;
mod proc_table;
mod tokio_launcher;

pub use config::{
    load_recipe, parse_dependency_list, AgentOptions, DetectorSpec, RecipeTimeouts,
    ServiceRecipe, DEFAULT_SHARED_DIR,
};
pub use detectors::{LogPatternDetector, ProcessNameDetector, TcpPortDetector};
pub use file_store::{FileAttemptStore, FileClusterView};
pub use hooks::{CommandInstaller, CommandListener, CommandStorageDriver};
pub use locator::LeafProcessLocator;
pub use proc_table::ProcProcessTable;
pub use tokio_launcher::TokioProcessLauncher;
