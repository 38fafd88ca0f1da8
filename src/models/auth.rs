//! Authentication-related models

use serde::{Deserialize, Serialize};

/// Login request
///
/// The legacy top-level `username` / `password` pair is folded into the
/// `username_and_password` strategy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub strategy: Option<LoginStrategy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStrategy {
    UsernameAndPassword { username: String, password: String },
    RefreshToken { refresh_token: String },
}

impl LoginRequest {
    pub fn into_strategy(self) -> LoginStrategy {
        match self.strategy {
            Some(strategy) => strategy,
            None => LoginStrategy::UsernameAndPassword {
                username: self.username.unwrap_or_default(),
                password: self.password.unwrap_or_default(),
            },
        }
    }
}

/// Login response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

/// Logout / IsAuthenticated / Actor request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessTokenRequest {
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsAuthenticatedResponse {
    pub authenticated: bool,
}

/// The authenticated principal behind a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorResponse {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_confirmed: bool,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsGrantedRequest {
    pub user_id: i64,
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsGrantedResponse {
    pub granted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BelongsToRequest {
    pub user_id: i64,
    pub group_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BelongsToResponse {
    pub belongs: bool,
}
