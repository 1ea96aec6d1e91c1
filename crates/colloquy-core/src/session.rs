//! The session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::state::StateMap;

/// One conversation's identity and state.
///
/// The `(app_name, user_id, id)` triple is the composite key and is
/// immutable once created. `state` is the state visible at this session's
/// scope — the raw session tier when read through the repository, the
/// merged three-tier view when read through the store facade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Owning application name.
    pub app_name: String,
    /// Owning user ID.
    pub user_id: String,
    /// Session ID, unique within (application, user).
    pub id: SessionId,
    /// State map.
    pub state: StateMap,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// Last update timestamp (advanced by event appends).
    pub update_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;

    #[test]
    fn serde_roundtrip() {
        let now = time::utc_now();
        let session = Session {
            app_name: "support-bot".into(),
            user_id: "u-1".into(),
            id: SessionId::from_raw("sess_a"),
            state: StateMap::new(),
            create_time: now,
            update_time: now,
        };
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
