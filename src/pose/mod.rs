pub mod keypoint;

pub use keypoint::{Keypoint, KeypointIndex, Pose, PRESENT_THRESHOLD};
