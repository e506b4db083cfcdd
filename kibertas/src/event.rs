pub mod cancellation;
pub mod signal;
