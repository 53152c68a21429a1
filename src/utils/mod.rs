pub mod password;

pub use password::{Password, PasswordHasher};
