pub mod board;
pub mod bulk;
pub mod client;
pub mod config;
pub mod confirm;
pub mod controls;
pub mod dispatcher;
pub mod models;
pub mod notify;
pub mod outcome;
pub mod panel;
pub mod poller;
pub mod snapshots;

pub use outcome::ActionOutcome;
pub use panel::{ControlPanel, PanelError};
