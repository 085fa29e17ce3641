//! Mostrador Gateway - HTTP surface for agents, teams and login

pub mod auth;
pub mod error;
pub mod jwt;
pub mod routes;
pub mod server;
pub mod stream;

pub use auth::{normalize_user, refresh_claims, AuthService, IdentityClient, LoginRequest};
pub use error::{status_for, ApiError};
pub use jwt::{Claims, HsKey, JwtError};
pub use server::{router, start_gateway, AppState};
pub use stream::{ndjson_response, NDJSON};
