//! The entity schema.
//!
//! Every entity has a kind, and each kind declares which kinds it may own as
//! children. The ownership graph between kinds is acyclic, so no chain of
//! child references can lead back to an ancestor and recursive operations
//! always terminate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// A published collection of moments.
    Story,
    /// One captured moment within a story.
    Moment,
    /// A photo or video blob.
    Media,
    /// An annotation layer drawn over media.
    Markup,
    /// The place a story was captured at.
    Venue,
    /// An account profile.
    User,
}

impl EntityKind {
    /// All kinds, roots first.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::User,
        EntityKind::Story,
        EntityKind::Moment,
        EntityKind::Venue,
        EntityKind::Markup,
        EntityKind::Media,
    ];

    /// Kinds an entity of this kind may own as children.
    pub fn child_kinds(self) -> &'static [EntityKind] {
        match self {
            EntityKind::User => &[EntityKind::Media],
            EntityKind::Story => &[EntityKind::Moment, EntityKind::Venue, EntityKind::Media],
            EntityKind::Moment => &[EntityKind::Media, EntityKind::Markup],
            EntityKind::Media | EntityKind::Markup | EntityKind::Venue => &[],
        }
    }

    /// Returns true if this kind may own `child`.
    pub fn may_own(self, child: EntityKind) -> bool {
        self.child_kinds().contains(&child)
    }

    /// Returns true if this kind never has children.
    pub fn is_leaf(self) -> bool {
        self.child_kinds().is_empty()
    }

    /// Lowercase name, also used as the key prefix of generated keys.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Story => "story",
            EntityKind::Moment => "moment",
            EntityKind::Media => "media",
            EntityKind::Markup => "markup",
            EntityKind::Venue => "venue",
            EntityKind::User => "user",
        }
    }

    /// Parses a kind from its lowercase name.
    pub fn parse(name: &str) -> Option<EntityKind> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
