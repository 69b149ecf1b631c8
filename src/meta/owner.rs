//! Numeric ids to account names and back, via the host user database.

use nix::unistd::{Gid, Group, Uid, User};
use tracing::warn;

pub fn user_name(uid: u32) -> Option<String> {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(user) => user.map(|u| u.name),
        Err(err) => {
            warn!(uid, error = %err, "passwd lookup failed");
            None
        }
    }
}

pub fn group_name(gid: u32) -> Option<String> {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(group) => group.map(|g| g.name),
        Err(err) => {
            warn!(gid, error = %err, "group lookup failed");
            None
        }
    }
}

pub fn uid_of(name: &str) -> Option<u32> {
    match User::from_name(name) {
        Ok(user) => user.map(|u| u.uid.as_raw()),
        Err(err) => {
            warn!(name, error = %err, "passwd lookup failed");
            None
        }
    }
}

pub fn gid_of(name: &str) -> Option<u32> {
    match Group::from_name(name) {
        Ok(group) => group.map(|g| g.gid.as_raw()),
        Err(err) => {
            warn!(name, error = %err, "group lookup failed");
            None
        }
    }
}
