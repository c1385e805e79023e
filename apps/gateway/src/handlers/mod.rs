//! Handlers 模块

pub mod alarms;
pub mod collector;
pub mod data;
pub mod devices;
pub mod drivers;
pub mod gateway;
pub mod northbound;
pub mod system;
pub mod thresholds;

pub use alarms::*;
pub use collector::*;
pub use data::*;
pub use devices::*;
pub use drivers::*;
pub use gateway::*;
pub use northbound::*;
pub use system::*;
pub use thresholds::*;
