use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Assignable roles. Kept as strings in storage; this is the vocabulary the
/// administration surface offers.
pub const ROLE_VOCABULARY: &[&str] = &[
    "SuperAdmin",
    "Gerente",
    "Dispatcher",
    "Técnico",
    "Cliente",
    "Maestro",
    "Auditor",
    "AdministradorClientes",
];

pub fn is_known_role(role: &str) -> bool {
    ROLE_VOCABULARY.contains(&role)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Display label mirroring what notifications show: name, then email,
    /// then the bare uid.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.uid.0)
    }
}

pub const ROLE_UPDATE_ACTION: &str = "user.role.update";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDetails {
    pub previous_roles: Vec<String>,
    pub new_roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub action: String,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    pub target_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_email: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: AuditDetails,
}
