//! enginepool-broker: connection broker and task-submission seams.
//!
//! The broker is the process that engines and clients both register with.
//! It writes two JSON connection files: one for clients (the pool's task
//! channel) and one for engines (embedded in every launch command).
//!
//! # Components
//!
//! - **`broker`**: [`ConnectionBroker`] trait
//! - **`controller`**: [`ControllerBroker`], a broker run as a local controller process
//! - **`channel`**: [`TaskChannel`] / [`ChannelConnector`] and the future-like [`TaskHandle`]
//! - **`wait`**: advisory wait for connection files to appear

pub mod broker;
pub mod channel;
pub mod controller;
pub mod wait;

pub use broker::ConnectionBroker;
pub use channel::{ChannelConnector, Task, TaskChannel, TaskHandle, TaskResult};
pub use controller::ControllerBroker;
pub use wait::wait_for_files;
