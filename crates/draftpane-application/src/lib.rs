//! Application layer for draftpane.
//!
//! Coordinates the drafting service, the operation registry, and the
//! snapshot store into the reply pane lifecycle.

pub mod bootstrap;
pub mod operation_registry;
pub mod pane_controller;

pub use bootstrap::build_controller;
pub use operation_registry::{
    ObserverId, OperationFailure, OperationObserver, OperationOutcome, OperationRegistry,
    OperationState, OperationStatus, ScheduledRetry,
};
pub use pane_controller::{PaneController, PaneEvent};
