//! Password hashing and secure random token generation.

pub mod password;
pub mod random;

pub use password::PasswordHasher;
pub use random::{generate_token, REFRESH_TOKEN_BYTES};
