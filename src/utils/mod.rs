pub mod health_monitor_utils;

pub use health_monitor_utils::*;
