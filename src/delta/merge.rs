//! Built-in merge functions for delta batches
//!
//! Both mergers reconcile by `id()`: existing entities are replaced in place,
//! unseen ones are appended in delta order, and tombstones remove their
//! entity unless `preserve_deleted` is set. The custom equality function in
//! [`MergeOptions`] is not consulted.

use crate::delta::types::{DeltaEntity, GroupedEntity, MergeOptions};
use std::collections::HashMap;

/// Merge a flat delta batch into a snapshot
pub fn merge_flat_entities<T: DeltaEntity>(
    snapshot: Vec<T>,
    delta: Vec<T>,
    options: &MergeOptions<T>,
) -> Vec<T> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(snapshot.len());
    let mut merged: Vec<Option<T>> = Vec::with_capacity(snapshot.len() + delta.len());

    for entity in snapshot {
        positions.insert(entity.id().to_string(), merged.len());
        merged.push(Some(entity));
    }

    for entity in delta {
        let drop_it = entity.is_deleted() && !options.preserve_deleted;

        match positions.get(entity.id()).copied() {
            Some(position) => {
                merged[position] = if drop_it { None } else { Some(entity) };
            }
            None if !drop_it => {
                positions.insert(entity.id().to_string(), merged.len());
                merged.push(Some(entity));
            }
            None => {}
        }
    }

    merged.into_iter().flatten().collect()
}

/// Merge grouped entities, reconciling each group's children by identity too
///
/// A group present in the delta replaces the cached group's own fields; its
/// children are the cached children merged with the delta's children.
pub fn merge_grouped_entities<G: GroupedEntity>(
    snapshot: Vec<G>,
    delta: Vec<G>,
    options: &MergeOptions<G>,
) -> Vec<G> {
    let child_options = MergeOptions::<G::Child> {
        preserve_deleted: options.preserve_deleted,
        equality: None,
    };

    let mut positions: HashMap<String, usize> = HashMap::with_capacity(snapshot.len());
    let mut merged: Vec<Option<G>> = Vec::with_capacity(snapshot.len() + delta.len());

    for group in snapshot {
        positions.insert(group.id().to_string(), merged.len());
        merged.push(Some(group));
    }

    for mut group in delta {
        let drop_it = group.is_deleted() && !options.preserve_deleted;

        match positions.get(group.id()).copied() {
            Some(position) => {
                if drop_it {
                    merged[position] = None;
                    continue;
                }

                if let Some(mut existing) = merged[position].take() {
                    let cached_children = std::mem::take(existing.children_mut());
                    let delta_children = std::mem::take(group.children_mut());
                    *group.children_mut() =
                        merge_flat_entities(cached_children, delta_children, &child_options);
                } else {
                    let children = std::mem::take(group.children_mut());
                    *group.children_mut() =
                        merge_flat_entities(Vec::new(), children, &child_options);
                }
                merged[position] = Some(group);
            }
            None if !drop_it => {
                let children = std::mem::take(group.children_mut());
                *group.children_mut() = merge_flat_entities(Vec::new(), children, &child_options);
                positions.insert(group.id().to_string(), merged.len());
                merged.push(Some(group));
            }
            None => {}
        }
    }

    merged.into_iter().flatten().collect()
}
