//! Field validators. Each returns the field-level error for its field;
//! `validate_registration` runs them all and reports every failure at once.

use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    auth::secret::Secret,
    error::{AppError, FieldError},
    users::Role,
};

pub const USERNAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=20;
pub const PASSWORD_LENGTH: std::ops::RangeInclusive<usize> = 8..=32;

/// Registration input as received; `register` consumes it.
#[derive(Debug, Default)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: Secret,
    pub password_confirm: Secret,
    pub role: Role,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn field_error(field: &'static str, message: &str) -> FieldError {
    FieldError {
        field,
        message: message.to_string(),
    }
}

pub fn validate_first_name(value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(field_error("firstName", "Please tell us your first name"));
    }
    Ok(())
}

pub fn validate_last_name(value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(field_error("lastName", "Please tell us your last name"));
    }
    Ok(())
}

pub fn validate_username(value: &str) -> Result<(), FieldError> {
    if value.is_empty() {
        return Err(field_error("username", "Please make username for yourself"));
    }
    if !USERNAME_LENGTH.contains(&value.chars().count()) {
        return Err(field_error(
            "username",
            "Please provide username with 3 letter or more and 20 letter or less",
        ));
    }
    Ok(())
}

/// Expects an already normalized address.
pub fn validate_email(value: &str) -> Result<(), FieldError> {
    if value.is_empty() {
        return Err(field_error("email", "Please tell us your email"));
    }
    if !is_valid_email(value) {
        return Err(field_error("email", "Please provide a valid email"));
    }
    Ok(())
}

pub fn validate_password(value: &Secret) -> Result<(), FieldError> {
    if value.is_empty() {
        return Err(field_error("password", "Please provide your password"));
    }
    if !PASSWORD_LENGTH.contains(&value.char_len()) {
        return Err(field_error(
            "password",
            "Password should contain 8 letter or more and 32 letter or less",
        ));
    }
    Ok(())
}

pub fn validate_password_confirm(password: &Secret, confirm: &Secret) -> Result<(), FieldError> {
    if confirm.is_empty() {
        return Err(field_error("passwordConfirm", "Please confirm your password"));
    }
    if !password.matches(confirm) {
        return Err(field_error("passwordConfirm", "Passwords are not the same!"));
    }
    Ok(())
}

/// Checks a new password and its confirmation, as used by the change and
/// reset paths.
pub fn validate_new_password(password: &Secret, confirm: &Secret) -> Result<(), AppError> {
    collect([
        validate_password(password),
        validate_password_confirm(password, confirm),
    ])
}

/// Normalizes the email in place, then validates every field.
pub fn validate_registration(candidate: &mut Registration) -> Result<(), AppError> {
    candidate.email = normalize_email(&candidate.email);
    collect([
        validate_first_name(&candidate.first_name),
        validate_last_name(&candidate.last_name),
        validate_username(&candidate.username),
        validate_email(&candidate.email),
        validate_password(&candidate.password),
        validate_password_confirm(&candidate.password, &candidate.password_confirm),
    ])
}

fn collect<const N: usize>(results: [Result<(), FieldError>; N]) -> Result<(), AppError> {
    let errors: Vec<FieldError> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}
