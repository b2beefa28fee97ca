//! Note file layout: YAML frontmatter, one `[Open in Zotero](…)` link line,
//! then whatever the user wrote underneath.

use crate::schema::ItemRecord;

pub const NOTE_EXTENSION: &str = ".md";
pub const LINK_MARKER: &str = "[Open in Zotero]";

/// A frontmatter value.  Absent scalars and empty lists are omitted.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(i64),
    List(Vec<String>),
    Absent,
}

/// Make a citation key safe to use as a file name.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            other => other,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_start_matches(|ch: char| ch == '.' || ch.is_whitespace())
        .trim_end()
        .to_string()
}

/// Vault-relative path normalization: `\` becomes `/`, empty segments and
/// `.` segments are dropped.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Note key for a citation key; the diff compares these against file stems.
pub fn note_key(citation_key: &str) -> String {
    sanitize_file_name(citation_key)
}

/// Vault-relative path of the note for `key`.
pub fn note_path(folder: &str, key: &str) -> String {
    normalize_path(&format!("{folder}/{}{NOTE_EXTENSION}", sanitize_file_name(key)))
}

/// Inverse of [`note_path`] for directory listings: `smith2020.md` → `smith2020`.
pub fn key_from_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(NOTE_EXTENSION)
        .filter(|stem| !stem.is_empty())
}

/// Quote a YAML scalar when it would otherwise be misread.
pub fn yaml_string(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.contains([':', '#', '\'', '"', '\n'])
        || value.starts_with(' ')
        || value.ends_with(' ')
        || value.starts_with('{')
        || value.starts_with('[')
        || matches!(value, "true" | "false" | "null");

    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Render `---`-delimited frontmatter from ordered fields.
pub fn render_frontmatter(fields: &[(&str, FieldValue)]) -> String {
    let mut lines = vec!["---".to_string()];

    for (key, value) in fields {
        match value {
            FieldValue::Absent => {}
            FieldValue::List(items) if items.is_empty() => {}
            FieldValue::List(items) => {
                lines.push(format!("{key}:"));
                lines.extend(items.iter().map(|item| format!("  - {}", yaml_string(item))));
            }
            FieldValue::Number(n) => lines.push(format!("{key}: {n}")),
            FieldValue::Text(text) => lines.push(format!("{key}: {}", yaml_string(text))),
        }
    }

    lines.push("---".to_string());
    lines.join("\n")
}

/// Managed part of a note: frontmatter plus the link line, newline-terminated.
pub fn build_note_content(record: &ItemRecord) -> String {
    let journal = if record.container.is_empty() {
        FieldValue::Absent
    } else {
        FieldValue::Text(record.container.clone())
    };

    let frontmatter = render_frontmatter(&[
        ("title", FieldValue::Text(record.title.clone())),
        ("authors", FieldValue::List(record.authors.clone())),
        (
            "year",
            record
                .year
                .map(|y| FieldValue::Number(i64::from(y)))
                .unwrap_or(FieldValue::Absent),
        ),
        ("type", FieldValue::Text(record.item_type.clone())),
        ("journal", journal),
        ("tags", FieldValue::List(record.tags.clone())),
        ("citekey", FieldValue::Text(record.citation_key.clone())),
        ("zotero-uri", FieldValue::Text(record.external_uri.clone())),
    ]);

    format!("{frontmatter}\n{LINK_MARKER}({})\n", record.external_uri)
}

/// Everything the user wrote after the link line, trimmed.  Empty when the
/// marker is missing or is the last line without a newline.
pub fn extract_user_notes(content: &str) -> &str {
    let Some(marker) = content.find(LINK_MARKER) else {
        return "";
    };
    let Some(line_end) = content[marker..].find('\n') else {
        return "";
    };
    content[marker + line_end + 1..].trim()
}

/// Rebuilt note for `record`, keeping the user region of `existing`.
pub fn rebuild_note(existing: &str, record: &ItemRecord) -> String {
    let managed = build_note_content(record);
    let user_notes = extract_user_notes(existing);
    if user_notes.is_empty() {
        managed
    } else {
        format!("{managed}\n{user_notes}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smith() -> ItemRecord {
        ItemRecord {
            citation_key: "smith2020".to_string(),
            title: "On Foo: A Study".to_string(),
            authors: vec!["Jane Smith".to_string(), "John Doe".to_string()],
            year: Some(2020),
            item_type: "article-journal".to_string(),
            container: "J. Foo".to_string(),
            tags: vec!["bar".to_string(), "baz".to_string()],
            external_uri: "zotero://select/library/items/AAAA1111".to_string(),
        }
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f\"g<h>i|j"), "a-b-c-d-e-f-g-h-i-j");
        assert_eq!(sanitize_file_name("..hidden"), "hidden");
        assert_eq!(sanitize_file_name("  two   words\there "), "two words here");
        assert_eq!(sanitize_file_name(" .dotted"), "dotted");
    }

    #[test]
    fn sanitizing_is_idempotent() {
        for raw in ["smith:2020", " ..x  y ", "a|b", ". lead", ". .x"] {
            let once = sanitize_file_name(raw);
            assert_eq!(sanitize_file_name(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn note_paths_are_normalized() {
        assert_eq!(note_path("Zotero Library", "smith2020"), "Zotero Library/smith2020.md");
        assert_eq!(note_path("/refs//nested/", "a:b"), "refs/nested/a-b.md");
        assert_eq!(normalize_path("./a\\b/"), "a/b");
    }

    #[test]
    fn key_from_file_name_requires_markdown() {
        assert_eq!(key_from_file_name("smith2020.md"), Some("smith2020"));
        assert_eq!(key_from_file_name("smith2020.pdf"), None);
        assert_eq!(key_from_file_name(".md"), None);
    }

    #[test]
    fn yaml_strings_are_quoted_when_ambiguous() {
        assert_eq!(yaml_string("plain"), "plain");
        assert_eq!(yaml_string("a: b"), "\"a: b\"");
        assert_eq!(yaml_string("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(yaml_string("true"), "\"true\"");
        assert_eq!(yaml_string(""), "\"\"");
        assert_eq!(yaml_string("[draft]"), "\"[draft]\"");
        assert_eq!(yaml_string(" padded"), "\" padded\"");
    }

    #[test]
    fn renders_full_note() {
        let expected = "---\n\
title: \"On Foo: A Study\"\n\
authors:\n  - Jane Smith\n  - John Doe\n\
year: 2020\n\
type: article-journal\n\
journal: J. Foo\n\
tags:\n  - bar\n  - baz\n\
citekey: smith2020\n\
zotero-uri: \"zotero://select/library/items/AAAA1111\"\n\
---\n\
[Open in Zotero](zotero://select/library/items/AAAA1111)\n";
        assert_eq!(build_note_content(&smith()), expected);
    }

    #[test]
    fn omits_empty_lists_and_absent_scalars() {
        let mut record = smith();
        record.authors.clear();
        record.tags.clear();
        record.year = None;
        record.container.clear();
        let content = build_note_content(&record);
        assert!(!content.contains("authors"));
        assert!(!content.contains("tags"));
        assert!(!content.contains("year"));
        assert!(!content.contains("journal"));
        assert!(content.contains("citekey: smith2020"));
    }

    #[test]
    fn extracts_user_notes_after_link_line() {
        let note = format!("{}\n## My notes\n\nGreat paper.\n", build_note_content(&smith()));
        assert_eq!(extract_user_notes(&note), "## My notes\n\nGreat paper.");
    }

    #[test]
    fn no_user_notes_without_marker_or_line_end() {
        assert_eq!(extract_user_notes("---\ntitle: x\n---\nfree text"), "");
        assert_eq!(extract_user_notes("---\n---\n[Open in Zotero](zotero://x)"), "");
    }

    #[test]
    fn rebuild_preserves_user_region_byte_for_byte() {
        let user = "## Notes\n\n- point one\n  - nested: with colon\n\n> quote";
        let old = format!("{}\n{user}\n", build_note_content(&smith()));

        let mut record = smith();
        record.title = "Renamed".to_string();
        let rebuilt = rebuild_note(&old, &record);

        assert!(rebuilt.starts_with(&build_note_content(&record)));
        assert!(rebuilt.ends_with(user));
        assert_eq!(extract_user_notes(&rebuilt), user);
    }

    #[test]
    fn rebuild_with_identical_data_is_stable() {
        let original = build_note_content(&smith());
        assert_eq!(rebuild_note(&original, &smith()), original);
    }
}
