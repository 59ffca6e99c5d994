//! Database module
//!
//! Models, the repository traits the auth engine depends on, and two
//! implementations of them: PostgreSQL and an in-process store.

pub mod memory;
pub mod models;
pub mod operations;
pub mod repository;

pub use memory::MemoryStore;
pub use models::{NewRefreshToken, NewUser, RefreshToken, SessionResponse, User, UserResponse};
pub use operations::DbOperations;
pub use repository::{TokenRepository, UserRepository};
