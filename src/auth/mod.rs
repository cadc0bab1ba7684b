//! Authentication for chat sessions
//!
//! Login and signup against the user store, with bcrypt password hashing.

mod gate;
mod password;

pub use gate::AuthGate;
pub use password::{BcryptHasher, PasswordHasher};
