//! Sync scope and permission keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An isolated sync domain. Every record, event, and request belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Inventory,
    Tickets,
}

impl Scope {
    pub const ALL: [Self; 2] = [Self::Inventory, Self::Tickets];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Tickets => "tickets",
        }
    }

    /// Permission required on top of [`Permission::Scanning`] to sync this scope
    pub const fn required_permission(self) -> Permission {
        match self {
            Self::Inventory => Permission::Inventory,
            Self::Tickets => Permission::Tickets,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "inventory" => Ok(Self::Inventory),
            "tickets" => Ok(Self::Tickets),
            other => Err(format!("unsupported scope `{other}`")),
        }
    }
}

/// Permission keys checked by the sync endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Base grant for any scanner access
    Scanning,
    Inventory,
    Tickets,
}

impl Permission {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Inventory => "inventory",
            Self::Tickets => "tickets",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "scanning" => Ok(Self::Scanning),
            "inventory" => Ok(Self::Inventory),
            "tickets" => Ok(Self::Tickets),
            other => Err(format!("unknown permission `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_str() {
        for scope in Scope::ALL {
            assert_eq!(scope.as_str().parse::<Scope>().unwrap(), scope);
        }
        assert!("events".parse::<Scope>().is_err());
        assert!("".parse::<Scope>().is_err());
    }

    #[test]
    fn scope_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Scope::Inventory).unwrap(),
            "\"inventory\""
        );
    }

    #[test]
    fn scope_permissions() {
        assert_eq!(Scope::Inventory.required_permission(), Permission::Inventory);
        assert_eq!(Scope::Tickets.required_permission(), Permission::Tickets);
    }
}
