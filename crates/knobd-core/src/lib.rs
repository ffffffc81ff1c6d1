//! Device-independent logic for knobd: gesture classification, the gesture
//! bus, target resolution, volume math, and configuration.

pub mod app;
pub mod audio;
pub mod bus;
pub mod config;
pub mod event;
pub mod gesture;
pub mod indicator;
pub mod link;
pub mod resolve;
pub mod session;
