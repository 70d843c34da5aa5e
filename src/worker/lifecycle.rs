//! Worker lifecycle state machine.

use std::fmt;
use thiserror::Error;

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, not yet installing
  Parsed,
  /// Seeding the static partition
  Installing,
  /// Seeded, waiting to be activated
  Installed,
  /// Purging stale partitions
  Activating,
  /// In control of pages
  Activated,
  /// Failed to install or replaced by a newer worker
  Redundant,
}

/// Inputs that drive the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  InstallStarted,
  InstallSucceeded,
  InstallFailed,
  ActivateStarted,
  ActivateFinished,
  Replaced,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid worker transition: {event:?} while {from}")]
pub struct LifecycleError {
  pub from: WorkerState,
  pub event: LifecycleEvent,
}

impl WorkerState {
  /// Apply an event, returning the next state.
  pub fn on(self, event: LifecycleEvent) -> Result<WorkerState, LifecycleError> {
    use LifecycleEvent::*;
    use WorkerState::*;

    match (self, event) {
      (Parsed, InstallStarted) => Ok(Installing),
      (Installing, InstallSucceeded) => Ok(Installed),
      (Installing, InstallFailed) => Ok(Redundant),
      (Installed, ActivateStarted) => Ok(Activating),
      (Activating, ActivateFinished) => Ok(Activated),
      // A waiting or active worker can be superseded
      (Installed | Activated, Replaced) => Ok(Redundant),
      (from, event) => Err(LifecycleError { from, event }),
    }
  }

  #[cfg(test)]
  pub fn is_waiting(self) -> bool {
    self == WorkerState::Installed
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}
