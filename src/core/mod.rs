pub mod recurrence;
pub mod stats;
pub mod task;
pub mod temporal;
