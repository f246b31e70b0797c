//! Authentication & Security
//!
//! Bearer-token issuance/validation and salted password storage. Tokens are
//! validated both by the HTTP middleware and in-band on websocket connect.

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, AuthUser};
pub use password::{hash_password, verify_password};
