pub mod breaker;
pub mod credential;
pub mod task;
