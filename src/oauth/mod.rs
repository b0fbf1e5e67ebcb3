//! OAuth2 authorization-code grant.

pub mod errors;
pub mod flow;
pub mod memory;
pub mod models;
pub mod repo;
pub mod store;
mod utils;

pub use self::errors::{AccessTokenError, AccessTokenErrorCode, AuthorizeError, AuthorizeErrorCode};
pub use self::flow::{
    AuthorizationFlow, AuthorizeOutcome, AuthorizeRequest, CodeExchange, ConsentForm,
    ConsentPrompt, IssuedAccessToken, OAuthConfig, RegisteredApplication, TokenRequest,
};
pub use self::memory::MemoryOAuthStore;
pub use self::models::{AccessToken, AccessTokenResponse, OAuth2Application, OAuth2Grant};
pub use self::repo::PgOAuthStore;
pub use self::store::OAuthStore;
