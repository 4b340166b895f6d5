//! Input checks shared by the HTTP layer and the escrow service.

use crate::catalog;
use crate::models::Coordinates;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must be between 2 and 64 characters")]
    Name,
    #[error("email address is not valid")]
    Email,
    #[error("phone number must use the format 2547XXXXXXXX")]
    Phone,
    #[error("password must be at least 8 characters")]
    Password,
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("unknown county '{0}'")]
    County(String),
    #[error("unknown crop '{0}'")]
    Crop(String),
    #[error("coordinates are out of range")]
    Coordinates,
}

pub fn name(value: &str) -> Result<(), ValidationError> {
    let len = value.trim().chars().count();
    if (2..=64).contains(&len) {
        Ok(())
    } else {
        Err(ValidationError::Name)
    }
}

pub fn email(value: &str) -> Result<(), ValidationError> {
    let (local, domain) = value.split_once('@').ok_or(ValidationError::Email)?;
    let domain_ok = domain
        .split_once('.')
        .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty());
    if local.is_empty() || !domain_ok || value.contains(char::is_whitespace) {
        return Err(ValidationError::Email);
    }
    Ok(())
}

/// M-Pesa numbers in international form: `254` followed by nine digits.
pub fn phone(value: &str) -> Result<(), ValidationError> {
    if value.len() == 12 && value.starts_with("254") && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::Phone)
    }
}

pub fn password(value: &str) -> Result<(), ValidationError> {
    if value.len() < 8 {
        return Err(ValidationError::Password);
    }
    Ok(())
}

pub fn positive(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ValidationError::NotPositive(field))
    }
}

pub fn county(value: &str) -> Result<(), ValidationError> {
    if catalog::is_known_county(value) {
        Ok(())
    } else {
        Err(ValidationError::County(value.to_string()))
    }
}

pub fn crop(value: &str) -> Result<(), ValidationError> {
    if catalog::is_known_crop(value) {
        Ok(())
    } else {
        Err(ValidationError::Crop(value.to_string()))
    }
}

pub fn coordinates(value: &Coordinates) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&value.lat) && (-180.0..=180.0).contains(&value.lng) {
        Ok(())
    } else {
        Err(ValidationError::Coordinates)
    }
}
