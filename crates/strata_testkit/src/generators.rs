//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entity keys, payloads and tree
//! shapes that respect the entity ownership schema.

use crate::fixtures::key;
use proptest::prelude::*;
use std::sync::Arc;
use strata_core::{Engine, Entity, EntityKey, EntityKind};

/// Strategy for generating valid entity keys.
pub fn key_strategy() -> impl Strategy<Value = EntityKey> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,31}")
        .expect("Invalid regex")
        .prop_map(|s| key(&s))
}

/// Strategy for generating payloads, including absent ones.
pub fn payload_strategy() -> impl Strategy<Value = Option<Vec<u8>>> {
    prop::option::of(prop::collection::vec(any::<u8>(), 0..512))
}

/// Strategy for generating entity kinds.
pub fn kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

/// The shape of a story tree: one entry per moment, giving its media count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeShape {
    /// Media count of each moment.
    pub moments: Vec<usize>,
}

impl TreeShape {
    /// Returns the number of entities in the tree, root included.
    pub fn size(&self) -> usize {
        1 + self.moments.len() + self.moments.iter().sum::<usize>()
    }

    /// Builds an unsaved story with this shape under `root`.
    pub fn build(&self, engine: &Engine, root: &str) -> Arc<Entity> {
        let story = engine.new_entity(EntityKind::Story, key(root));
        story.set_payload(Some(root.as_bytes().to_vec()));
        for (i, media) in self.moments.iter().enumerate() {
            let moment_key = format!("{root}-m{i}");
            let moment = engine.new_entity(EntityKind::Moment, key(&moment_key));
            for j in 0..*media {
                let child = engine.new_entity(EntityKind::Media, key(&format!("{moment_key}-x{j}")));
                child.set_payload(Some(vec![i as u8, j as u8]));
                moment.add_child(child).expect("Moments may own media");
            }
            story.add_child(moment).expect("Stories may own moments");
        }
        story
    }
}

/// Strategy for generating small story tree shapes.
pub fn tree_shape_strategy() -> impl Strategy<Value = TreeShape> {
    prop::collection::vec(0usize..4, 0..5).prop_map(|moments| TreeShape { moments })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_keys_are_valid(k in key_strategy()) {
            prop_assert!(!k.as_str().is_empty());
            prop_assert!(k.as_str().len() <= 32);
        }

        #[test]
        fn tree_shape_size_counts_every_node(shape in tree_shape_strategy()) {
            prop_assert!(shape.size() >= 1);
            prop_assert_eq!(shape.size() - 1 - shape.moments.len(), shape.moments.iter().sum::<usize>());
        }
    }
}
