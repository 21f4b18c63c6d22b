mod coordination;
mod detectors;
mod installer;
mod listener;
mod monitoring;
mod process_launcher;
mod process_locator;
mod process_table;

pub use coordination::{AttemptStore, ClusterStateView};
pub use detectors::{LivenessDetector, StopDetector};
pub use installer::{Installer, StorageDriver};
pub use listener::LifecycleListener;
pub use monitoring::{DetailsProvider, Monitor};
pub use process_launcher::{LaunchedProcess, ProcessLauncher};
pub use process_locator::ProcessLocator;
pub use process_table::ProcessTable;
