/// Normalized metadata for one library item.  `citation_key` is the sole
/// identity; every other field is derived from the export on each sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub citation_key: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    /// CSL item type, e.g. `article-journal` or `book`.
    pub item_type: String,
    /// Journal / container title.  Empty when the item has none.
    pub container: String,
    pub tags: Vec<String>,
    /// `zotero://` deep link that selects the item in Zotero.
    pub external_uri: String,
}

/// The three operations a sync can apply to a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffAction {
    Create,
    Update,
    Delete,
}

impl DiffAction {
    /// Verb used in log lines and per-item error messages.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One step of a computed diff.  `key` is the note key the operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    Create { key: String, record: ItemRecord },
    Update { key: String, record: ItemRecord },
    Delete { key: String },
}

impl DiffOp {
    pub fn action(&self) -> DiffAction {
        match self {
            Self::Create { .. } => DiffAction::Create,
            Self::Update { .. } => DiffAction::Update,
            Self::Delete { .. } => DiffAction::Delete,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Create { key, .. } | Self::Update { key, .. } | Self::Delete { key } => key,
        }
    }

    pub fn record(&self) -> Option<&ItemRecord> {
        match self {
            Self::Create { record, .. } | Self::Update { record, .. } => Some(record),
            Self::Delete { .. } => None,
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    /// A result carrying a single explanatory error and no counts.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    pub fn changed(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn is_noop(&self) -> bool {
        self.changed() == 0 && self.errors.is_empty()
    }
}
