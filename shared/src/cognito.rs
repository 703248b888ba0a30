use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::{
    types::{AttributeType, AuthFlowType},
    Client as CognitoClient,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use notedmark_atoms::users::{Credentials, Identity, Session, SessionProvider};
use notedmark_atoms::AppError;
use sha2::Sha256;

use crate::backend_error;

type HmacSha256 = Hmac<Sha256>;

/// `SECRET_HASH` for a confidential app client:
/// base64(HMAC-SHA256(client_secret, username + client_id)).
pub fn secret_hash(username: &str, client_id: &str, client_secret: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|e| AppError::backend(format!("Invalid client secret: {}", e)))?;
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Cognito user pools use the lower-cased email as the username.
fn username(credentials: &Credentials) -> String {
    credentials.email.trim().to_lowercase()
}

pub struct CognitoSessionProvider {
    client: CognitoClient,
    client_id: String,
    client_secret: String,
}

impl CognitoSessionProvider {
    pub fn new(client: CognitoClient, client_id: String, client_secret: String) -> Self {
        Self { client, client_id, client_secret }
    }

    async fn identity(&self, access_token: &str) -> Result<Option<Identity>, AppError> {
        let user = match self.client.get_user().access_token(access_token).send().await {
            Ok(user) => user,
            Err(e) => {
                let expired = e
                    .as_service_error()
                    .map(|se| se.is_not_authorized_exception() || se.is_user_not_found_exception())
                    .unwrap_or(false);
                if expired {
                    return Ok(None);
                }
                return Err(backend_error(e));
            }
        };

        let attribute = |name: &str| {
            user.user_attributes()
                .iter()
                .find(|a| a.name() == name)
                .and_then(|a| a.value())
                .map(str::to_string)
        };

        Ok(Some(Identity {
            user_id: attribute("sub").unwrap_or_else(|| user.username().to_string()),
            email: attribute("email").unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl SessionProvider for CognitoSessionProvider {
    async fn current_session(&self, access_token: &str) -> Result<Option<Session>, AppError> {
        Ok(self.identity(access_token).await?.map(|identity| Session {
            access_token: access_token.to_string(),
            refresh_token: None,
            identity,
        }))
    }

    async fn sign_up(&self, credentials: &Credentials, redirect_to: &str) -> Result<(), AppError> {
        let username = username(credentials);
        let hash = secret_hash(&username, &self.client_id, &self.client_secret)?;
        let email = AttributeType::builder()
            .name("email")
            .value(&username)
            .build()
            .map_err(AppError::backend)?;

        let result = self
            .client
            .sign_up()
            .client_id(&self.client_id)
            .username(&username)
            .password(&credentials.password)
            .secret_hash(hash)
            .user_attributes(email)
            .client_metadata("redirect_to", redirect_to)
            .send()
            .await
            .map_err(backend_error)?;

        tracing::info!(
            "Cognito sign_up: user_sub={}, confirmed={}",
            result.user_sub(),
            result.user_confirmed()
        );
        Ok(())
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, AppError> {
        let username = username(credentials);
        let hash = secret_hash(&username, &self.client_id, &self.client_secret)?;

        let result = self
            .client
            .initiate_auth()
            .client_id(&self.client_id)
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .auth_parameters("USERNAME", &username)
            .auth_parameters("PASSWORD", &credentials.password)
            .auth_parameters("SECRET_HASH", hash)
            .send()
            .await
            .map_err(backend_error)?;

        if let Some(challenge) = result.challenge_name() {
            return Err(AppError::backend(format!("Sign-in needs a further step: {}", challenge.as_str())));
        }

        let tokens = result
            .authentication_result()
            .ok_or_else(|| AppError::backend("Sign-in returned no tokens"))?;
        let access_token = tokens
            .access_token()
            .ok_or_else(|| AppError::backend("Sign-in returned no access token"))?
            .to_string();

        let identity = self
            .identity(&access_token)
            .await?
            .ok_or_else(|| AppError::backend("Session was rejected right after sign-in"))?;

        Ok(Session {
            access_token,
            refresh_token: tokens.refresh_token().map(str::to_string),
            identity,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AppError> {
        self.client
            .global_sign_out()
            .access_token(access_token)
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hash_matches_a_known_value() {
        // The published HMAC-SHA256 vector f7bc83f4...3cd8, split into username and client id.
        assert_eq!(
            secret_hash("The quick brown fox ", "jumps over the lazy dog", "key").unwrap(),
            "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg="
        );
        assert_eq!(
            secret_hash("user@example.com", "client", "secret").unwrap(),
            "4zqhOFl0JivfkWh1VINyOJyrDTdsinJktzPUT+t0plg="
        );
        assert_ne!(
            secret_hash("other@example.com", "client", "secret").unwrap(),
            "4zqhOFl0JivfkWh1VINyOJyrDTdsinJktzPUT+t0plg="
        );
    }

    #[test]
    fn username_is_the_normalised_email() {
        let credentials = Credentials { email: "  User@Example.COM ".into(), password: "secret1".into() };
        assert_eq!(username(&credentials), "user@example.com");
    }
}
