//! Deterministic names and labels for child objects.
//!
//! Every child a cycle creates is found again on the next pass by name, so
//! names must be a pure function of the owner and the cycle. They are also
//! DNS labels: lowercase alphanumerics and `-`, at most 63 characters. Names
//! that had to be rewritten (sanitised or truncated) carry a digest of the
//! original so two owners that map to the same label never collide.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

pub const MAX_NAME_LEN: usize = 63;
const DIGEST_LEN: usize = 8;

/// Label carrying the controlling owner's uid.
pub const LABEL_OWNER_UID: &str = "volrep.io/owner-uid";
/// Label carrying the replication role of the child.
pub const LABEL_ROLE: &str = "volrep.io/role";
/// Label carrying the cycle a child belongs to.
pub const LABEL_CYCLE: &str = "volrep.io/cycle";
/// Label naming the mover a job or credential belongs to.
pub const LABEL_MOVER: &str = "volrep.io/mover";

/// Side of a replication relationship a child serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Destination,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Destination => "destination",
        }
    }

    pub fn short(&self) -> &'static str {
        match self {
            Role::Source => "src",
            Role::Destination => "dst",
        }
    }

    /// Short prefix used in child names.
    pub fn prefix(&self) -> &'static str {
        match self {
            Role::Source => "volrep-src",
            Role::Destination => "volrep-dst",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join parts with `-`, sanitise to a DNS label and bound the length.
pub fn child_name(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-");
    let sanitized = sanitize(&joined);

    if sanitized == joined && sanitized.len() <= MAX_NAME_LEN {
        return sanitized;
    }

    let digest = Sha256::digest(joined.as_bytes());
    let suffix: String = format!("{:x}", digest).chars().take(DIGEST_LEN).collect();
    let keep = MAX_NAME_LEN - DIGEST_LEN - 1;
    let prefix = sanitized[..sanitized.len().min(keep)].trim_end_matches('-');
    if prefix.is_empty() {
        return suffix;
    }
    format!("{}-{}", prefix, suffix)
}

/// Name of the primary child of an owner for a role, e.g. `volrep-dst-db`.
pub fn owner_child(role: Role, owner: &str) -> String {
    child_name(&[role.prefix(), owner])
}

/// Name of a per-cycle child, e.g. `volrep-src-db-20240101000000`.
pub fn cycle_child(role: Role, owner: &str, cycle_id: &str) -> String {
    child_name(&[role.prefix(), owner, cycle_id])
}

/// Name of a mover-specific child, e.g. `volrep-rsync-dst-db`.
pub fn mover_child(mover: &str, role: Role, owner: &str) -> String {
    child_name(&["volrep", mover, role.short(), owner])
}

/// Name of a per-cycle mover child, e.g. `volrep-rsync-src-db-20240101000000`.
pub fn mover_cycle_child(mover: &str, role: Role, owner: &str, cycle_id: &str) -> String {
    child_name(&["volrep", mover, role.short(), owner, cycle_id])
}

/// Labels stamped on every child of an owner.
pub fn owner_labels(owner_uid: &str, role: Role) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_OWNER_UID.to_string(), owner_uid.to_string()),
        (LABEL_ROLE.to_string(), role.as_str().to_string()),
    ])
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
