pub mod janitor;
