pub mod claims;
pub mod context;
pub mod middleware;
pub mod password;
pub mod scope;
pub mod tokens;

pub use claims::{Claims, TokenType};
pub use context::AuthContext;
pub use middleware::RequireAuth;
pub use scope::{AdminScope, CompanyScope};
pub use tokens::{JwtKeys, TokenPair};
