use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::mail::{MailMessage, MailRecord};
use crate::domain::user::{
    is_known_role, AuditDetails, AuditLogEntry, UserId, UserProfile, ROLE_UPDATE_ACTION,
};
use crate::errors::{PreconditionError, ValidationError, WorkflowError};
use crate::messages::{MessageGenerator, ROLE_EMAIL_SUBJECT};
use crate::session::Session;
use crate::store::{collections, encode, DocumentStore, WriteBatch};
use crate::workflow::load;

/// Outcome of a role change. The mail record is absent when the target has
/// no email on file.
#[derive(Clone, Debug)]
pub struct RoleChange {
    pub user: UserProfile,
    pub audit: AuditLogEntry,
    pub mail: Option<MailRecord>,
}

/// Replaces the target's roles with `[new_role]`, writing the roles update,
/// the audit entry and the notification mail in one atomic batch. Admins
/// cannot change their own role; that is enforced here, not left to the
/// calling surface.
pub async fn change_user_role<S, G>(
    store: &S,
    session: &Session,
    generator: &G,
    target_user_id: &UserId,
    new_role: &str,
) -> Result<RoleChange, WorkflowError>
where
    S: DocumentStore + ?Sized,
    G: MessageGenerator + ?Sized,
{
    if !is_known_role(new_role) {
        return Err(ValidationError::UnknownRole { role: new_role.to_owned() }.into());
    }
    if session.uid == *target_user_id {
        return Err(PreconditionError::SelfRoleChange.into());
    }

    let (mut user, revision): (UserProfile, u64) =
        load(store, collections::USERS, &target_user_id.0).await?;

    let previous_roles = user.roles.clone();
    user.roles = vec![new_role.to_owned()];

    let audit = AuditLogEntry {
        action: ROLE_UPDATE_ACTION.to_owned(),
        actor_id: session.uid.0.clone(),
        actor_email: session.email.clone(),
        target_user_id: user.uid.0.clone(),
        target_user_email: user.email.clone(),
        timestamp: Utc::now(),
        details: AuditDetails {
            previous_roles,
            new_roles: user.roles.clone(),
        },
    };

    let mail = match &user.email {
        Some(email) => {
            let html = generator.role_change_email(&user, new_role, session)?;
            Some(MailRecord {
                to: vec![email.clone()],
                message: MailMessage {
                    subject: ROLE_EMAIL_SUBJECT.to_owned(),
                    html: Some(html),
                    text: None,
                },
            })
        }
        None => None,
    };

    let mut batch = WriteBatch::new()
        .update_checked(
            collections::USERS,
            &target_user_id.0,
            json!({ "roles": user.roles }),
            revision,
        )
        .set(collections::AUDIT_LOGS, &Uuid::new_v4().to_string(), encode(&audit)?);
    if let Some(record) = &mail {
        batch = batch.set(collections::MAIL, &Uuid::new_v4().to_string(), encode(record)?);
    }
    store.commit(batch).await?;

    Ok(RoleChange { user, audit, mail })
}
