//! Recipient computation helpers for producers.

use crate::UserId;
use std::collections::BTreeSet;

/// Everyone in `members` except the acting user, deduplicated.
pub fn others<I>(members: I, actor: UserId) -> Vec<UserId>
where
    I: IntoIterator<Item = UserId>,
{
    members
        .into_iter()
        .filter(|id| *id != actor)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
