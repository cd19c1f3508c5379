//! Migration file parsing.
//!
//! A migration file carries two statement blocks separated by marker lines:
//!
//! ```text
//! -- +sqlmigrate Up
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- +sqlmigrate Down
//! DROP TABLE users;
//! ```
//!
//! The parser is dialect-agnostic: blocks are kept verbatim (line endings
//! included) and handed to the driver as a whole. Text before the up marker
//! is ignored. A file without a down marker has an empty down block.

use std::io::Read;

use thiserror::Error;

/// Marker line opening the up block.
pub const UP_MARKER: &str = "-- +sqlmigrate Up";

/// Marker line opening the down block.
pub const DOWN_MARKER: &str = "-- +sqlmigrate Down";

/// Errors raised while splitting a migration into its blocks.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The mandatory up marker is absent.
    #[error("missing '-- +sqlmigrate Up' marker")]
    MissingUpMarker,

    /// The down marker appears before the up marker.
    #[error("down marker on line {line} precedes the up marker")]
    DownBeforeUp { line: usize },

    /// A marker appears more than once.
    #[error("duplicate marker '{marker}' on line {line}")]
    DuplicateMarker { marker: &'static str, line: usize },

    /// The source could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Up and down statement blocks of one migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMigration {
    /// Statements executed when applying the migration.
    pub up: String,
    /// Statements executed when rolling the migration back.
    pub down: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Reads a whole migration source and splits it into blocks.
///
/// # Errors
///
/// Returns [`ParseError::Io`] if the reader fails, otherwise the errors of
/// [`parse_migration_str`].
pub fn parse_migration<R: Read>(mut reader: R) -> Result<ParsedMigration, ParseError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_migration_str(&text)
}

/// Splits migration text into its up and down blocks.
///
/// # Examples
///
/// ```
/// use sqlmigrate_core::parse_migration_str;
///
/// let parsed = parse_migration_str(
///     "-- +sqlmigrate Up\nCREATE TABLE t (id INT);\n-- +sqlmigrate Down\nDROP TABLE t;\n",
/// )
/// .unwrap();
/// assert_eq!(parsed.up, "CREATE TABLE t (id INT);\n");
/// assert_eq!(parsed.down, "DROP TABLE t;\n");
/// ```
///
/// # Errors
///
/// Returns [`ParseError::MissingUpMarker`] when no up marker exists,
/// [`ParseError::DownBeforeUp`] when the markers are out of order and
/// [`ParseError::DuplicateMarker`] when a marker repeats.
pub fn parse_migration_str(text: &str) -> Result<ParsedMigration, ParseError> {
    let mut parsed = ParsedMigration::default();
    let mut section = Section::Preamble;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();

        if trimmed == UP_MARKER {
            if section != Section::Preamble {
                return Err(ParseError::DuplicateMarker {
                    marker: UP_MARKER,
                    line: line_no,
                });
            }
            section = Section::Up;
            continue;
        }

        if trimmed == DOWN_MARKER {
            match section {
                Section::Preamble => return Err(ParseError::DownBeforeUp { line: line_no }),
                Section::Down => {
                    return Err(ParseError::DuplicateMarker {
                        marker: DOWN_MARKER,
                        line: line_no,
                    });
                }
                Section::Up => section = Section::Down,
            }
            continue;
        }

        match section {
            Section::Preamble => {}
            Section::Up => parsed.up.push_str(line),
            Section::Down => parsed.down.push_str(line),
        }
    }

    if section == Section::Preamble {
        return Err(ParseError::MissingUpMarker);
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "-- +sqlmigrate Up
CREATE TABLE test (
    id serial NOT NULL,
    name text
);

-- +sqlmigrate Down
DROP TABLE test;
";

    #[test]
    fn test_parse_splits_blocks() {
        let parsed = parse_migration_str(SAMPLE).unwrap();
        assert_eq!(
            parsed.up,
            "CREATE TABLE test (\n    id serial NOT NULL,\n    name text\n);\n\n"
        );
        assert_eq!(parsed.down, "DROP TABLE test;\n");
    }

    #[test]
    fn test_parse_from_reader() {
        let parsed = parse_migration(SAMPLE.as_bytes()).unwrap();
        assert!(parsed.up.contains("CREATE TABLE test"));
        assert!(parsed.down.contains("DROP TABLE test"));
    }

    #[test]
    fn test_missing_up_marker() {
        let err = parse_migration_str("CREATE TABLE t (id INT);\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingUpMarker));
    }

    #[test]
    fn test_empty_source_is_malformed() {
        assert!(matches!(
            parse_migration_str(""),
            Err(ParseError::MissingUpMarker)
        ));
    }

    #[test]
    fn test_up_only_has_empty_down() {
        let parsed = parse_migration_str("-- +sqlmigrate Up\nSELECT 1;\n").unwrap();
        assert_eq!(parsed.up, "SELECT 1;\n");
        assert!(parsed.down.is_empty());
    }

    #[test]
    fn test_down_before_up() {
        let err = parse_migration_str("-- +sqlmigrate Down\nDROP TABLE t;\n-- +sqlmigrate Up\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::DownBeforeUp { line: 1 }));
    }

    #[test]
    fn test_duplicate_markers() {
        let err = parse_migration_str("-- +sqlmigrate Up\n-- +sqlmigrate Up\n").unwrap_err();
        assert!(matches!(
            err,
            ParseError::DuplicateMarker {
                marker: UP_MARKER,
                line: 2
            }
        ));

        let err = parse_migration_str(
            "-- +sqlmigrate Up\n-- +sqlmigrate Down\nx\n-- +sqlmigrate Down\n",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::DuplicateMarker { line: 4, .. }));
    }

    #[test]
    fn test_preamble_is_ignored() {
        let parsed =
            parse_migration_str("-- comment\n\n-- +sqlmigrate Up\nSELECT 1;\n-- +sqlmigrate Down\n")
                .unwrap();
        assert_eq!(parsed.up, "SELECT 1;\n");
        assert_eq!(parsed.down, "");
    }

    #[test]
    fn test_markers_tolerate_surrounding_whitespace_and_crlf() {
        let parsed = parse_migration_str(
            "  -- +sqlmigrate Up  \r\nSELECT 1;\r\n-- +sqlmigrate Down\r\nSELECT 2;\r\n",
        )
        .unwrap();
        assert_eq!(parsed.up, "SELECT 1;\r\n");
        assert_eq!(parsed.down, "SELECT 2;\r\n");
    }

    #[test]
    fn test_last_line_without_newline() {
        let parsed =
            parse_migration_str("-- +sqlmigrate Up\nSELECT 1;\n-- +sqlmigrate Down\nSELECT 2;")
                .unwrap();
        assert_eq!(parsed.down, "SELECT 2;");
    }

    #[test]
    fn test_reassembled_document_parses_to_same_blocks() {
        let documents = [
            SAMPLE,
            "-- +sqlmigrate Up\n-- +sqlmigrate Down\nDROP TABLE t;\n",
            "-- +sqlmigrate Up\nCREATE TABLE t (id INT);\n-- +sqlmigrate Down\n",
            "-- +sqlmigrate Up\r\nSELECT 1;\r\n\r\n-- +sqlmigrate Down\r\nSELECT 2;\r\n",
            "-- author: ops\n\n-- +sqlmigrate Up\nSELECT 1;\n-- +sqlmigrate Down\nSELECT 2;\n",
            "-- +sqlmigrate Up\nSELECT 1;\n-- +sqlmigrate Down\nSELECT 2;",
            "-- +sqlmigrate Up\nINSERT INTO t VALUES ('-- +sqlmigrate Down');\n",
        ];

        for document in documents {
            let parsed = parse_migration_str(document).unwrap();
            let rebuilt = format!("{UP_MARKER}\n{}{DOWN_MARKER}\n{}", parsed.up, parsed.down);
            assert_eq!(
                parse_migration_str(&rebuilt).unwrap(),
                parsed,
                "document: {document:?}"
            );
        }
    }

    #[test]
    fn test_reassembled_sample_keeps_text() {
        let parsed = parse_migration_str(SAMPLE).unwrap();
        let rebuilt = format!("{UP_MARKER}\n{}{DOWN_MARKER}\n{}", parsed.up, parsed.down);
        assert_eq!(rebuilt, SAMPLE);
    }
}
