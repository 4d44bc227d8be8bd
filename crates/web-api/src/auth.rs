//! JWT 认证模块
//!
//! 令牌签发属于外部认证服务，这里只负责验证并还原出 [`Principal`]。
//! `generate_token` 供本地开发和测试使用。

use axum::http::HeaderMap;
use config::JwtConfig;
use domain::{Principal, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal::new(UserId::from(claims.sub), claims.email, claims.name)
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, principal: &Principal) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: principal.id.into(),
            email: principal.email.clone(),
            name: principal.display_name.clone(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "token 验证失败");
                ApiError::unauthorized("Invalid token")
            })
    }

    pub fn principal_from_token(&self, token: &str) -> Result<Principal, ApiError> {
        self.verify_token(token).map(Principal::from)
    }

    /// 从 Authorization: Bearer 头中提取身份
    pub fn extract_principal_from_headers(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        self.principal_from_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "test-secret-key-with-at-least-32-characters".to_string(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn test_token_round_trip_restores_principal() {
        let jwt = service();
        let principal = Principal::new(UserId::generate(), "a@example.com", "Alice");
        let token = jwt.generate_token(&principal).unwrap();

        assert_eq!(jwt.principal_from_token(&token).unwrap(), principal);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let other = JwtService::new(JwtConfig {
            secret: "another-secret-key-with-at-least-32-characters".to_string(),
            expiration_hours: 1,
        });
        let principal = Principal::new(UserId::generate(), "a@example.com", "Alice");
        let token = other.generate_token(&principal).unwrap();

        assert!(service().verify_token(&token).is_err());
    }

    #[test]
    fn test_bearer_header_required() {
        let jwt = service();
        let principal = Principal::new(UserId::generate(), "a@example.com", "Alice");
        let token = jwt.generate_token(&principal).unwrap();

        let mut headers = HeaderMap::new();
        assert!(jwt.extract_principal_from_headers(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_str(&token).unwrap());
        assert!(jwt.extract_principal_from_headers(&headers).is_err());

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(
            jwt.extract_principal_from_headers(&headers).unwrap().id,
            principal.id
        );
    }
}
