//! Change-order verification for synchronization streams.
//!
//! Ordering is a property of what a server chose to send, not of the
//! format, so it is checked after decode and only when the caller asked
//! for ordered output.

use std::collections::HashMap;

use fxsync_core::LongTermId;

use crate::error::{CodecError, CodecResult};
use crate::stream::{ContentsSync, HierarchySync};
use crate::tags::{pid, PropertyTag};
use crate::value::PropValue;

/// Whether change order is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingPolicy {
    /// Changes must be newest first.
    Enforced,
    /// Any order is accepted.
    #[default]
    Unenforced,
}

/// Checks that timed records are in non-increasing modification-time
/// order. Records without a time are skipped.
pub fn verify_change_order<I>(times: I, policy: OrderingPolicy) -> CodecResult<()>
where
    I: IntoIterator<Item = Option<u64>>,
{
    if policy == OrderingPolicy::Unenforced {
        return Ok(());
    }
    let mut previous: Option<u64> = None;
    for (index, time) in times.into_iter().enumerate() {
        let Some(current) = time else { continue };
        if let Some(previous) = previous {
            if current > previous {
                return Err(CodecError::OrderingViolation {
                    index,
                    previous,
                    current,
                });
            }
        }
        previous = Some(current);
    }
    Ok(())
}

/// Checks message changes of a contents synchronization.
pub fn verify_contents_order(sync: &ContentsSync, policy: OrderingPolicy) -> CodecResult<()> {
    verify_change_order(
        sync.changes.iter().map(|change| change.last_modification_time()),
        policy,
    )
}

/// Checks folder changes of a hierarchy synchronization.
pub fn verify_hierarchy_order(sync: &HierarchySync, policy: OrderingPolicy) -> CodecResult<()> {
    verify_change_order(
        sync.folders.iter().map(|folder| {
            folder
                .get(pid::LAST_MODIFICATION_TIME)
                .and_then(PropValue::as_time)
        }),
        policy,
    )
}

/// Checks that every folder whose parent is also in the batch comes after
/// that parent.
pub fn verify_parent_order(sync: &HierarchySync) -> CodecResult<()> {
    let key = |index: usize, tag: PropertyTag| -> Option<LongTermId> {
        sync.folders[index]
            .get(tag)
            .and_then(PropValue::as_long_term_id)
            .copied()
    };
    let positions: HashMap<LongTermId, usize> = (0..sync.folders.len())
        .filter_map(|index| key(index, pid::SOURCE_KEY).map(|id| (id, index)))
        .collect();
    for index in 0..sync.folders.len() {
        let Some(parent) = key(index, pid::PARENT_SOURCE_KEY) else {
            continue;
        };
        if let Some(&parent_index) = positions.get(&parent) {
            if parent_index > index {
                return Err(CodecError::ParentOrderViolation {
                    index,
                    parent_index,
                });
            }
        }
    }
    Ok(())
}
