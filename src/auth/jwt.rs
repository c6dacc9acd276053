use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by the bearer token. Tokens are issued by the central
/// auth service; this module only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub exp: usize,

    /// Present only if this user is linked to a staff record
    pub id_personal: Option<u64>,
    /// Tenant schema key; absent selects the default database
    pub tenant: Option<String>,
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}
