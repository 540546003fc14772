use uuid::Uuid;

/// Authenticated user resolved from an access token and the users table
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// User ID (from JWT sub claim)
    pub user_id: Uuid,

    /// Current email from the users table
    pub email: String,

    pub is_superuser: bool,
}

impl AuthContext {
    pub fn new(user_id: Uuid, email: String, is_superuser: bool) -> Self {
        Self {
            user_id,
            email,
            is_superuser,
        }
    }
}
