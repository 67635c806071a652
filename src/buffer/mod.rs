//! Sample queues between the capture callback and the comparison thread.

pub mod ring;
