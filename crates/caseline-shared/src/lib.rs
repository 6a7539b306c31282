use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use uuid::Uuid;

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Participant,
  Volunteer
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct StatusUpdateEntry {
  pub id:   i64,
  #[serde(default)]
  pub text: String,
  #[serde(default)]
  pub date: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct EntityDto {
  pub id:              Uuid,
  pub kind:            EntityKind,
  #[serde(default)]
  pub display_name:    String,
  #[serde(default)]
  pub is_archived:     bool,
  pub last_attendance: Option<NaiveDate>,
  pub last_phone_call: Option<NaiveDate>,
  #[serde(default)]
  pub status_updates:
    Vec<StatusUpdateEntry>
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
  ContactMarked,
  ContactRemoved,
  PhoneCall,
  StatusUpdate,
  EntityUpdated
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct ActivityRecord {
  pub id:            Uuid,
  pub actor_id:      Uuid,
  pub activity_type: ActivityType,
  pub entity_id:     Uuid,
  #[serde(default)]
  pub description:   String,
  pub created_at:    DateTime<Utc>,
  #[serde(default)]
  pub metadata:
    Option<serde_json::Value>
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Open,
  Done
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskDto {
  pub id:        Uuid,
  #[serde(default)]
  pub title:     String,
  pub status:    TaskStatus,
  pub due:       Option<NaiveDate>,
  pub entity_id: Option<Uuid>,
  pub done_at:   Option<DateTime<Utc>>,
  pub done_by:   Option<Uuid>
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Volunteer,
  Coordinator,
  Admin
}

impl Role {
  /// Coordinators and admins see the
  /// task list and the cross-user
  /// status feed.
  pub fn is_privileged(self) -> bool {
    matches!(
      self,
      Role::Coordinator | Role::Admin
    )
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct Identity {
  pub user_id: Uuid,
  pub role:    Role
}

#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct EntitySearchArgs {
  pub kind:             Option<EntityKind>,
  #[serde(default)]
  pub include_archived: bool
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn activity_type_uses_snake_case_wire_names()
  {
    let value = serde_json::to_value(
      ActivityType::PhoneCall
    )
    .expect("serialize type");
    assert_eq!(value, "phone_call");
  }

  #[test]
  fn entity_defaults_missing_collections()
  {
    let raw = serde_json::json!({
      "id": Uuid::nil(),
      "kind": "participant",
      "last_attendance": null,
      "last_phone_call": "2026-06-03"
    });
    let entity: EntityDto =
      serde_json::from_value(raw)
        .expect("decode entity");
    assert!(!entity.is_archived);
    assert!(
      entity.status_updates.is_empty()
    );
    assert_eq!(
      entity.last_phone_call,
      NaiveDate::from_ymd_opt(
        2026, 6, 3
      )
    );
  }

  #[test]
  fn only_coordinators_and_admins_are_privileged()
  {
    assert!(
      !Role::Volunteer.is_privileged()
    );
    assert!(
      Role::Coordinator.is_privileged()
    );
    assert!(Role::Admin.is_privileged());
  }
}
