//! The [`Record`] type: an immutable, cheaply-cloneable byte slice.

use std::ops::Deref;
use std::sync::Arc;

/// An immutable record payload.
///
/// Cloning a `Record` bumps a reference count rather than copying bytes,
/// so the same record can sit in a shuffle buffer and be handed to a
/// worker thread without duplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(Arc<[u8]>);

impl Record {
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Record {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for Record {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for Record {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}
