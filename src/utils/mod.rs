pub mod hashing;
pub mod time;
