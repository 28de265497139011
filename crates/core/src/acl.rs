//! Node access control lists.
//!
//! Policy:
//! - the owner holds every right;
//! - a caller listed in a right's list holds that right;
//! - the entry [`PUBLIC`] grants the right to every caller, anonymous included;
//! - an empty list grants nothing beyond the owner;
//! - a node without an owner is public for every right.

use serde::{Deserialize, Serialize};

/// List entry granting a right to everyone.
pub const PUBLIC: &str = "public";

/// Access control list stored on each node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
}

/// Capability set resolved for one caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

/// Which list a right lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Right {
    Read,
    Write,
    Delete,
}

impl Acl {
    /// ACL for a node created by `owner`. The owner is also listed in each right.
    pub fn owned_by(owner: Option<&str>) -> Self {
        match owner {
            Some(owner) => Self {
                owner: Some(owner.to_string()),
                read: vec![owner.to_string()],
                write: vec![owner.to_string()],
                delete: vec![owner.to_string()],
            },
            None => Self::default(),
        }
    }

    /// Resolve rights for `caller` (`None` is anonymous).
    pub fn check(&self, caller: Option<&str>) -> Rights {
        Rights {
            read: self.allows(Right::Read, caller),
            write: self.allows(Right::Write, caller),
            delete: self.allows(Right::Delete, caller),
        }
    }

    /// Whether `caller` holds `right`.
    pub fn allows(&self, right: Right, caller: Option<&str>) -> bool {
        let Some(owner) = self.owner.as_deref() else {
            return true;
        };
        if caller == Some(owner) {
            return true;
        }
        let list = self.list(right);
        list.iter().any(|entry| entry == PUBLIC)
            || caller.is_some_and(|caller| list.iter().any(|entry| entry == caller))
    }

    fn list(&self, right: Right) -> &[String] {
        match right {
            Right::Read => &self.read,
            Right::Write => &self.write,
            Right::Delete => &self.delete,
        }
    }
}
