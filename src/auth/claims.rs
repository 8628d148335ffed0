use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload issued by the identity provider and verified here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub iat: usize,  // issued at (unix timestamp)
    pub exp: usize,  // expires at (unix timestamp)
    pub iss: String, // issuer
    pub aud: String, // audience
    #[serde(default)]
    pub admin: bool, // grants access to admin routes
}
