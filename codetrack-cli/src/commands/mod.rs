pub mod control;
pub mod self_test;
pub mod track;

/// Exit status used when the volume does not have the required free space.
pub const INSUFFICIENT_DISKSPACE_EXIT: i32 = -1;
