//! Session token provider and identity-provider integration

mod claims;
mod identity;
mod jwt;
mod provider;
mod session;

pub use claims::{Claims, RealmAccess};
pub use identity::{IdentityProvider, OidcIdentityProvider};
pub use jwt::decode_claims;
pub use provider::SessionTokenProvider;
pub use session::{Session, TokenSet};
