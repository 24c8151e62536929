pub mod calibration;
pub mod config;
pub mod counter;
pub mod gesture;
pub mod inference;
pub mod pose;
pub mod replay;
pub mod session;
pub mod signals;
pub mod tracker;
