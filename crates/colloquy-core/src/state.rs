//! Three-tier state scoping.
//!
//! State lives at three levels — application-wide, per-user, per-session —
//! distinguished by key prefix. [`StateScope::of`] is the single dispatch
//! point from key to tier; deltas are partitioned with [`split_delta`] and
//! the externally visible view is assembled with [`merge_state`].
//!
//! Keys route strictly by prefix, regardless of where a delta arrived.
//! Prefixed keys keep their prefixes in their backing tables, so the three
//! tiers are disjoint by construction and the merge is a plain union.

use serde_json::Value;

/// A JSON object holding scoped state.
pub type StateMap = serde_json::Map<String, Value>;

/// Key prefix marking application-scoped state.
pub const APP_PREFIX: &str = "app:";

/// Key prefix marking user-scoped state.
pub const USER_PREFIX: &str = "user:";

/// The tier a state key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateScope {
    /// Shared by every user and session of one application.
    App,
    /// Shared by every session of one (application, user) pair.
    User,
    /// Private to one session.
    Session,
}

impl StateScope {
    /// Scope of a key, decided strictly by its prefix.
    pub fn of(key: &str) -> Self {
        if key.starts_with(APP_PREFIX) {
            Self::App
        } else if key.starts_with(USER_PREFIX) {
            Self::User
        } else {
            Self::Session
        }
    }
}

/// A state delta partitioned by scope.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplitDelta {
    /// Keys routed to application state (prefix kept).
    pub app: StateMap,
    /// Keys routed to user state (prefix kept).
    pub user: StateMap,
    /// Bare keys routed to the session row.
    pub session: StateMap,
}

impl SplitDelta {
    /// True when no tier received any key.
    pub fn is_empty(&self) -> bool {
        self.app.is_empty() && self.user.is_empty() && self.session.is_empty()
    }
}

/// Partition a delta into per-scope patches. Keys keep their prefixes.
pub fn split_delta(delta: &StateMap) -> SplitDelta {
    let mut split = SplitDelta::default();
    for (key, value) in delta {
        let target = match StateScope::of(key) {
            StateScope::App => &mut split.app,
            StateScope::User => &mut split.user,
            StateScope::Session => &mut split.session,
        };
        let _ = target.insert(key.clone(), value.clone());
    }
    split
}

/// Merge the three tiers into one externally visible map.
///
/// App and user keys carry their prefixes, session keys are bare, so the
/// sources are disjoint and no tier can shadow another.
pub fn merge_state(app: &StateMap, user: &StateMap, session: &StateMap) -> StateMap {
    let mut merged = StateMap::new();
    for (key, value) in app.iter().chain(user).chain(session) {
        let _ = merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn scope_dispatch_by_prefix() {
        assert_eq!(StateScope::of("app:theme"), StateScope::App);
        assert_eq!(StateScope::of("user:lang"), StateScope::User);
        assert_eq!(StateScope::of("counter"), StateScope::Session);
        // No special-casing of the bare prefix words themselves
        assert_eq!(StateScope::of("application"), StateScope::Session);
        assert_eq!(StateScope::of("user"), StateScope::Session);
    }

    #[test]
    fn split_routes_each_tier() {
        let delta = map(&[
            ("app:theme", json!("dark")),
            ("user:lang", json!("fr")),
            ("step", json!(3)),
        ]);
        let split = split_delta(&delta);
        assert_eq!(split.app, map(&[("app:theme", json!("dark"))]));
        assert_eq!(split.user, map(&[("user:lang", json!("fr"))]));
        assert_eq!(split.session, map(&[("step", json!(3))]));
    }

    #[test]
    fn split_of_empty_delta_is_empty() {
        let split = split_delta(&StateMap::new());
        assert!(split.is_empty());
    }

    #[test]
    fn merge_is_plain_union() {
        let app = map(&[("app:x", json!(1))]);
        let user = map(&[("user:y", json!(2))]);
        let session = map(&[("z", json!(3))]);
        let merged = merge_state(&app, &user, &session);
        assert_eq!(
            merged,
            map(&[("app:x", json!(1)), ("user:y", json!(2)), ("z", json!(3))])
        );
    }

    #[test]
    fn merge_with_absent_tiers() {
        let empty = StateMap::new();
        let session = map(&[("z", json!(3))]);
        let merged = merge_state(&empty, &empty, &session);
        assert_eq!(merged, session);
    }
}
