//! User model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user announced to the relay
///
/// The id is assigned by the relay on `user:join` and stays fixed for
/// the lifetime of the relay connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
}

impl User {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}
