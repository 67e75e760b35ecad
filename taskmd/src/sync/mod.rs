// Multi-device sync over git

mod controller;
mod runner;
mod state;

pub use controller::{SyncController, SyncOutcome};
pub use runner::{CommandOutput, CommandRunner, GitRunner};
pub use state::{SyncState, SyncStateFile, SyncStatus};
