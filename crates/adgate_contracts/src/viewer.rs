#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_token;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ViewerId(String);

impl ViewerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_token("viewer_id", &id, 128)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ViewerId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ViewerId::new(value)
    }
}

impl From<ViewerId> for String {
    fn from(value: ViewerId) -> Self {
        value.0
    }
}

impl Validate for ViewerId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("viewer_id", &self.0, 128)
    }
}

/// An authenticated viewer as resolved by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: ViewerId,
    pub email: Option<String>,
}

impl Viewer {
    pub fn v1(id: ViewerId, email: Option<String>) -> Result<Self, ContractViolation> {
        let viewer = Self { id, email };
        viewer.validate()?;
        Ok(viewer)
    }
}

impl Validate for Viewer {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        if let Some(email) = &self.email {
            if email.len() > 254 || !email.contains('@') {
                return Err(ContractViolation::InvalidValue {
                    field: "viewer.email",
                    reason: "must be an address of at most 254 chars",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_viewer_01_id_rejects_empty_and_unsafe_chars() {
        assert!(ViewerId::new("").is_err());
        assert!(ViewerId::new("viewer one").is_err());
        assert!(ViewerId::new("viewer_1").is_ok());
    }

    #[test]
    fn at_viewer_02_email_must_look_like_an_address() {
        let id = ViewerId::new("viewer_1").unwrap();
        assert!(Viewer::v1(id.clone(), Some("nope".to_string())).is_err());
        assert!(Viewer::v1(id.clone(), Some("a@b.example".to_string())).is_ok());
        assert!(Viewer::v1(id, None).is_ok());
    }

    #[test]
    fn at_viewer_03_id_deserialization_validates() {
        let bad: Result<ViewerId, _> = serde_json::from_str("\"has space\"");
        assert!(bad.is_err());
        let good: ViewerId = serde_json::from_str("\"viewer_9\"").unwrap();
        assert_eq!(good.as_str(), "viewer_9");
    }
}
