use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-scoped notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(alias = "notification_id")]
    pub id: u64,

    #[serde(default)]
    pub message: String,

    /// Notification type, e.g. `club_join_request` or `event_reminder`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, alias = "is_read")]
    pub read: bool,

    #[serde(default, alias = "sent_at", with = "super::timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,

    /// Human readable age as rendered by the server ("5 minutes ago")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_club_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_event_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_user_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_rest_notification() {
        let n: Notification = serde_json::from_value(json!({
            "id": 9,
            "message": "Ada has requested to join Chess Club",
            "type": "club_join_request",
            "read": false,
            "time": "Just now",
            "created_at": "2024-05-01T09:00:00",
            "related_club_id": 3,
            "related_event_id": null,
            "related_user_id": 5
        }))
        .unwrap();

        assert_eq!(n.id, 9);
        assert_eq!(n.category.as_deref(), Some("club_join_request"));
        assert!(!n.read);
        assert!(n.created_at.is_some());
        assert_eq!(n.related_club_id, Some(3));
        assert_eq!(n.related_event_id, None);
    }

    #[test]
    fn test_deserialize_model_field_names() {
        let n: Notification = serde_json::from_value(json!({
            "notification_id": 4,
            "message": "Reminder",
            "is_read": true
        }))
        .unwrap();

        assert_eq!(n.id, 4);
        assert!(n.read);
        assert!(n.created_at.is_none());
    }
}
