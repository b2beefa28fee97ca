//! The `Zotero Library.base` view over the stub folder.  Written once; the
//! user owns it afterwards.

use crate::error::StoreError;
use crate::note::normalize_path;
use crate::store::NoteStore;

pub const BASE_FILE_NAME: &str = "Zotero Library.base";

pub fn base_file_path() -> String {
    normalize_path(BASE_FILE_NAME)
}

pub fn base_content(stub_folder: &str) -> String {
    format!(
        r#"filters:
  - file.inFolder("{stub_folder}")
properties:
  title:
    displayName: Title
  authors:
    displayName: Authors
  year:
    displayName: Year
  type:
    displayName: Type
  journal:
    displayName: Journal
  tags:
    displayName: Tags
  citekey:
    displayName: Citation Key
views:
  - type: table
    name: All references
    order:
      - title
      - authors
      - year
      - type
      - journal
      - tags
  - type: table
    name: By type
    groupBy:
      property: type
      direction: ASC
    order:
      - title
      - authors
      - year
      - journal
  - type: cards
    name: By tag
    groupBy:
      property: tags
      direction: ASC
"#
    )
}

/// Create the overview when missing.  `Ok(true)` when it was written now.
pub async fn ensure_base_file(
    store: &dyn NoteStore,
    stub_folder: &str,
) -> Result<bool, StoreError> {
    let path = base_file_path();
    if store.file_exists(&path).await? {
        return Ok(false);
    }
    store.create(&path, &base_content(stub_folder)).await?;
    Ok(true)
}
