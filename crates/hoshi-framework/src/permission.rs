//! Permission model.
//!
//! A [`Permission`] is a minimum [`Level`] plus the chat [`Scope`] it applies
//! to. The sender's effective level is derived from the superuser list and,
//! inside groups, from their group role.

use std::collections::HashSet;
use std::fmt;

use hoshi_core::{Event, SenderRole};
use serde::{Deserialize, Serialize};

/// Ranked capability levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Normal,
    Admin,
    Owner,
    Superuser,
}

impl From<SenderRole> for Level {
    fn from(role: SenderRole) -> Self {
        match role {
            SenderRole::Member => Level::Normal,
            SenderRole::Admin => Level::Admin,
            SenderRole::Owner => Level::Owner,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Normal => "NORMAL",
            Level::Admin => "ADMIN",
            Level::Owner => "OWNER",
            Level::Superuser => "SUPERUSER",
        })
    }
}

/// Chat kinds a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    pub group: bool,
    pub private: bool,
}

impl Scope {
    pub const ANY: Scope = Scope {
        group: true,
        private: true,
    };
    pub const GROUP: Scope = Scope {
        group: true,
        private: false,
    };
    pub const PRIVATE: Scope = Scope {
        group: false,
        private: true,
    };

    fn intersect(self, other: Scope) -> Scope {
        Scope {
            group: self.group && other.group,
            private: self.private && other.private,
        }
    }
}

/// A required level within a chat scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permission {
    level: Level,
    scope: Scope,
}

impl Permission {
    pub const NORMAL: Permission = Permission::new(Level::Normal, Scope::ANY);
    pub const ADMIN: Permission = Permission::new(Level::Admin, Scope::ANY);
    pub const OWNER: Permission = Permission::new(Level::Owner, Scope::ANY);
    pub const SUPERUSER: Permission = Permission::new(Level::Superuser, Scope::ANY);
    pub const GROUP: Permission = Permission::new(Level::Normal, Scope::GROUP);
    pub const PRIVATE: Permission = Permission::new(Level::Normal, Scope::PRIVATE);
    pub const GROUP_ADMIN: Permission = Permission::new(Level::Admin, Scope::GROUP);
    pub const GROUP_OWNER: Permission = Permission::new(Level::Owner, Scope::GROUP);

    pub const fn new(level: Level, scope: Scope) -> Self {
        Self { level, scope }
    }

    /// A permission at least as strict as both `a` and `b`.
    pub fn both(a: Permission, b: Permission) -> Permission {
        Permission {
            level: a.level.max(b.level),
            scope: a.scope.intersect(b.scope),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns `true` if `manage_perm` may be used to guard a service.
    pub fn is_manage_level(&self) -> bool {
        matches!(
            *self,
            Permission::ADMIN | Permission::OWNER | Permission::SUPERUSER
        )
    }

    /// Checks whether the sender of `event` satisfies this permission.
    pub fn allows(&self, event: &dyn Event, superusers: &HashSet<i64>) -> bool {
        let in_scope = if event.group_id().is_some() {
            self.scope.group
        } else {
            self.scope.private
        };
        in_scope && sender_level(event, superusers) >= self.level
    }
}

impl Default for Permission {
    fn default() -> Self {
        Permission::NORMAL
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.scope.group, self.scope.private) {
            (true, true) => write!(f, "{}", self.level),
            (true, false) => write!(f, "GROUP_{}", self.level),
            (false, true) => write!(f, "PRIVATE_{}", self.level),
            (false, false) => write!(f, "NONE_{}", self.level),
        }
    }
}

/// Computes the effective level of the event's sender.
pub fn sender_level(event: &dyn Event, superusers: &HashSet<i64>) -> Level {
    if event.user_id().is_some_and(|id| superusers.contains(&id)) {
        return Level::Superuser;
    }
    if event.group_id().is_some() {
        event.sender_role().map(Level::from).unwrap_or_default()
    } else {
        Level::Normal
    }
}
