//! The stored form of an entity.
//!
//! Both tiers persist one [`Document`] per entity. Children are stored by
//! reference only; each child is a document of its own.

use crate::error::{PersistError, PersistResult};
use crate::kind::EntityKind;
use serde::{Deserialize, Serialize};
use strata_storage::EntityKey;

/// Current record format version.
pub const FORMAT_VERSION: u8 = 1;

/// A reference from a parent document to one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildRef {
    /// Kind of the child.
    pub kind: EntityKind,
    /// Key of the child.
    pub key: EntityKey,
}

/// A serialized entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Kind of the entity.
    pub kind: EntityKind,
    /// Key of the entity.
    pub key: EntityKey,
    /// Revision assigned by the remote tier, `None` until first pushed.
    pub revision: Option<u64>,
    /// Opaque entity data.
    pub payload: Option<Vec<u8>>,
    /// Children, in order.
    pub children: Vec<ChildRef>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u8,
    document: &'a Document,
}

#[derive(Deserialize)]
struct Envelope {
    version: u8,
    document: Document,
}

impl Document {
    /// Creates a document with no revision, payload or children.
    pub fn new(kind: EntityKind, key: EntityKey) -> Self {
        Self {
            kind,
            key,
            revision: None,
            payload: None,
            children: Vec::new(),
        }
    }

    /// Encodes the document as a versioned CBOR record.
    pub fn to_bytes(&self) -> PersistResult<Vec<u8>> {
        let mut buf = Vec::new();
        let envelope = EnvelopeRef {
            version: FORMAT_VERSION,
            document: self,
        };
        ciborium::into_writer(&envelope, &mut buf)
            .map_err(|e| PersistError::Codec(format!("encoding {}: {e}", self.key)))?;
        Ok(buf)
    }

    /// Decodes a record written by [`Document::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> PersistResult<Self> {
        let envelope: Envelope =
            ciborium::from_reader(bytes).map_err(|e| PersistError::Codec(e.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(PersistError::Codec(format!(
                "unsupported record version {}",
                envelope.version
            )));
        }
        Ok(envelope.document)
    }

    /// Checks that every child reference is allowed by the schema.
    pub fn validate(&self) -> PersistResult<()> {
        for child in &self.children {
            if !self.kind.may_own(child.kind) {
                return Err(PersistError::Codec(format!(
                    "{} {} cannot own {} {}",
                    self.kind, self.key, child.kind, child.key
                )));
            }
        }
        Ok(())
    }
}
