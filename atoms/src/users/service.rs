use super::model::{Credentials, MIN_PASSWORD_LEN};
use crate::AppError;

/// Checks made before a sign-up request leaves the process.
pub fn validate_sign_up(credentials: &Credentials) -> Result<(), AppError> {
    let email = credentials.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("Please provide a valid email address"));
    }
    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_sign_in(credentials: &Credentials) -> Result<(), AppError> {
    if credentials.email.trim().is_empty() || credentials.password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials { email: email.into(), password: password.into() }
    }

    #[test]
    fn sign_up_needs_an_email_and_six_characters() {
        assert!(validate_sign_up(&creds("user@example.com", "secret1")).is_ok());
        assert!(validate_sign_up(&creds("user@example.com", "123456")).is_ok());
        assert!(matches!(
            validate_sign_up(&creds("user@example.com", "12345")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validate_sign_up(&creds("user.example.com", "secret1")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn sign_in_only_needs_both_fields() {
        assert!(validate_sign_in(&creds("a@b", "x")).is_ok());
        assert!(validate_sign_in(&creds("", "x")).is_err());
    }
}
