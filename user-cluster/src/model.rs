//! Records, drafts and the events that describe changes to them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use uuid::{Uuid, Variant};

use crate::error::ApiError;

/// Length of the canonical hyphenated form, e.g. `67e55044-10b1-426f-9247-bb680e5fe0c8`.
const HYPHENATED_LEN: usize = 36;

/// Server-assigned identifier of a [`User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Allocates a fresh random (version 4) identifier.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a client-supplied identifier.
    ///
    /// Only the hyphenated textual form is accepted, and it must carry the
    /// RFC 4122 variant with a version between 1 and 8. The nil and max
    /// UUIDs are accepted as well. Anything else is
    /// [`ApiError::InvalidIdentifier`].
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        if raw.len() != HYPHENATED_LEN {
            return Err(ApiError::InvalidIdentifier);
        }
        let uuid = Uuid::try_parse(raw).map_err(|_| ApiError::InvalidIdentifier)?;

        if uuid.is_nil() || uuid.as_u128() == u128::MAX {
            return Ok(Self(uuid));
        }

        let versioned = (1..=8).contains(&uuid.get_version_num());
        if versioned && uuid.get_variant() == Variant::RFC4122 {
            Ok(Self(uuid))
        } else {
            Err(ApiError::InvalidIdentifier)
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Client payload for create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDraft {
    pub username: String,
    pub age: Number,
    pub hobbies: Vec<String>,
}

impl UserDraft {
    /// Decodes and validates a request body.
    ///
    /// The body must be a JSON object with all three named fields; a
    /// positional array is not accepted. Every failure (bad JSON, missing
    /// field, wrong type) collapses into [`ApiError::InvalidBody`]; the caller
    /// is not told which field failed.
    pub fn from_slice(payload: &[u8]) -> Result<Self, ApiError> {
        let value: Value = serde_json::from_slice(payload).map_err(|_| ApiError::InvalidBody)?;
        if !value.is_object() {
            return Err(ApiError::InvalidBody);
        }
        serde_json::from_value(value).map_err(|_| ApiError::InvalidBody)
    }

    pub fn into_user(self, id: UserId) -> User {
        User {
            username: self.username,
            age: self.age,
            hobbies: self.hobbies,
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub age: Number,
    pub hobbies: Vec<String>,
    pub id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// One successful state change, published by the service that performed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub operation: Operation,
    pub record: User,
}

impl MutationEvent {
    pub fn created(record: User) -> Self {
        Self {
            operation: Operation::Create,
            record,
        }
    }

    pub fn updated(record: User) -> Self {
        Self {
            operation: Operation::Update,
            record,
        }
    }

    pub fn deleted(record: User) -> Self {
        Self {
            operation: Operation::Delete,
            record,
        }
    }
}
