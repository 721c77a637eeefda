//! Command catalog and typed parser registry.
//!
//! The catalog maps a short command tag (`SERI`, `BVOL`, `CELL`, ...) to its
//! wire and behavioral parameters: the literal command text, how many
//! response frames complete the exchange, the response deadline, and which
//! collaborator interprets the payload.
//!
//! The catalog itself stays declarative (and JSON-loadable, matching the
//! external configuration shape), while the `module`/`parser` name pair is
//! resolved against a [`ParserRegistry`] at load time. A misconfigured
//! entry is therefore a construction-time
//! [`Error::ParserNotRegistered`] instead of a string lookup failure
//! mid-poll.
//!
//! # Example
//!
//! ```
//! use recbms::catalog::Catalog;
//!
//! let catalog = Catalog::builtin();
//! let entry = catalog.get("SERI").unwrap();
//! assert_eq!(entry.command_text(), "SERI?");
//! assert_eq!(entry.expected_packets, 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use recbms_core::{Error, Result};

use crate::frame::Frame;

/// One immutable catalog entry.
///
/// Serializes to and from the external JSON configuration shape:
/// `{ "tag": "CELL", "expectedPackets": 5, "timeout": 3000,
///    "module": "array", "parser": "cell" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Short command tag, the catalog key.
    pub tag: String,
    /// Literal command text; `None` means the query form `tag + "?"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Number of response frames that complete the exchange.
    #[serde(rename = "expectedPackets")]
    pub expected_packets: u32,
    /// Response deadline in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// Collaborator module responsible for interpreting the payload.
    pub module: String,
    /// Parser name within the module.
    pub parser: String,
}

impl CatalogEntry {
    /// The command text to put on the wire: the explicit `command` if
    /// present, otherwise the query form `tag?`.
    pub fn command_text(&self) -> String {
        match &self.command {
            Some(cmd) => cmd.clone(),
            None => format!("{}?", self.tag),
        }
    }

    /// The response deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The static command catalog: an ordered list of entries indexed by tag.
///
/// Read-only after construction. The entry order is the poller's
/// round-robin order.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog from entries, validating as it loads.
    ///
    /// Rejects empty tags, `expectedPackets == 0`, zero timeouts, and
    /// duplicate tags with [`Error::InvalidCatalog`].
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.tag.is_empty() {
                return Err(Error::InvalidCatalog(format!("entry {i} has an empty tag")));
            }
            if entry.expected_packets == 0 {
                return Err(Error::InvalidCatalog(format!(
                    "tag {}: expectedPackets must be at least 1",
                    entry.tag
                )));
            }
            if entry.timeout_ms == 0 {
                return Err(Error::InvalidCatalog(format!(
                    "tag {}: timeout must be nonzero",
                    entry.tag
                )));
            }
            if index.insert(entry.tag.clone(), i).is_some() {
                return Err(Error::InvalidCatalog(format!(
                    "duplicate tag {}",
                    entry.tag
                )));
            }
        }
        Ok(Catalog { entries, index })
    }

    /// Load a catalog from its JSON configuration form: an array of
    /// entry objects.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(json).map_err(|e| Error::InvalidCatalog(e.to_string()))?;
        Self::new(entries)
    }

    /// The built-in REC command set.
    ///
    /// Query-form commands grouped by collaborator module. Single-frame
    /// commands use a 2 second timeout; multi-frame array reads (a size
    /// packet followed by data packets) get 3 seconds.
    pub fn builtin() -> Self {
        fn entry(tag: &str, module: &str, expected: u32, timeout_ms: u64) -> CatalogEntry {
            CatalogEntry {
                tag: tag.to_string(),
                command: None,
                expected_packets: expected,
                timeout_ms,
                module: module.to_string(),
                parser: tag.to_lowercase(),
            }
        }

        let mut entries = Vec::new();
        for tag in [
            "CAL1", "CAL2", "CAL3", "CAL4", "SERI", "SWVR", "HWVR", "TIME", "DATE", "WCBI",
        ] {
            entries.push(entry(tag, "abms", 1, 2000));
        }
        for tag in [
            "BVOL", "BMIN", "CMAX", "MAXH", "CMIN", "MINH", "CHAR", "CHIS", "RAZL", "UBDI", "CFVC",
        ] {
            entries.push(entry(tag, "volt", 1, 2000));
        }
        for tag in ["IOFF", "IOJA"] {
            entries.push(entry(tag, "cur", 1, 2000));
        }
        for tag in ["LCD1", "LCD3", "IDN"] {
            entries.push(entry(tag, "array", 1, 2000));
        }
        for tag in ["CELL", "RINT"] {
            entries.push(entry(tag, "array", 5, 3000));
        }
        for tag in ["PTEM", "BTEM", "ERRO"] {
            entries.push(entry(tag, "array", 2, 3000));
        }
        for tag in ["ERLD", "ERRL", "VMAX", "VMIN"] {
            entries.push(entry(tag, "erro", 1, 2000));
        }
        for tag in ["OP2", "OP2H", "RE1", "RE1H"] {
            entries.push(entry(tag, "outputs", 1, 2000));
        }
        for tag in ["CANF", "CHAC", "CLOW", "DCHC", "MAXC", "MAXD", "STRN"] {
            entries.push(entry(tag, "victron", 1, 2000));
        }

        // The table above has unique nonempty tags and nonzero parameters.
        Self::new(entries).expect("built-in catalog is valid")
    }

    /// Look up an entry by tag.
    pub fn get(&self, tag: &str) -> Option<&CatalogEntry> {
        self.index.get(tag).map(|&i| &self.entries[i])
    }

    /// All entries in round-robin order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// All tags in round-robin order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.tag.as_str())
    }

    /// Narrow the catalog to the named tags, preserving the given order.
    ///
    /// Fails with [`Error::UnknownTag`] if any tag is absent.
    pub fn select(&self, tags: &[&str]) -> Result<Catalog> {
        let mut entries = Vec::with_capacity(tags.len());
        for &tag in tags {
            let entry = self
                .get(tag)
                .ok_or_else(|| Error::UnknownTag(tag.to_string()))?;
            entries.push(entry.clone());
        }
        Self::new(entries)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed command response: a kind discriminator plus structured data
/// for the downstream delta-mapping collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    /// Response kind, conventionally the command tag.
    pub kind: String,
    /// Structured payload data.
    pub data: serde_json::Value,
}

/// The typed collaborator capability bound to a catalog entry.
///
/// Interprets the ordered response frames of one completed exchange.
/// Returning `None` means the frames carried nothing publishable (parsers
/// are expected to tolerate malformed device output).
pub trait PayloadParser: Send + Sync {
    /// Parse the response frames of one exchange.
    fn parse(&self, frames: &[Frame]) -> Option<ParsedResponse>;
}

impl<F> PayloadParser for F
where
    F: Fn(&[Frame]) -> Option<ParsedResponse> + Send + Sync,
{
    fn parse(&self, frames: &[Frame]) -> Option<ParsedResponse> {
        self(frames)
    }
}

/// Registry of payload parsers keyed by `(module, parser)` name.
///
/// Applications register their parsing collaborators here, then resolve a
/// [`Catalog`] against the registry to obtain a [`ResolvedCatalog`] whose
/// every entry carries its parser capability directly.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<(String, String), Arc<dyn PayloadParser>>,
}

impl ParserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser under a `(module, parser)` name pair.
    ///
    /// Re-registering the same pair replaces the previous parser.
    pub fn register(
        &mut self,
        module: &str,
        parser: &str,
        implementation: impl PayloadParser + 'static,
    ) -> &mut Self {
        self.parsers.insert(
            (module.to_string(), parser.to_string()),
            Arc::new(implementation),
        );
        self
    }

    /// Number of registered parsers.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Bind every catalog entry to its parser.
    ///
    /// Any entry whose `(module, parser)` pair is not registered fails the
    /// whole resolution with [`Error::ParserNotRegistered`].
    pub fn resolve(&self, catalog: &Catalog) -> Result<ResolvedCatalog> {
        let mut entries = Vec::with_capacity(catalog.len());
        for entry in catalog.entries() {
            let key = (entry.module.clone(), entry.parser.clone());
            let parser = self.parsers.get(&key).ok_or_else(|| {
                Error::ParserNotRegistered {
                    tag: entry.tag.clone(),
                    module: entry.module.clone(),
                    parser: entry.parser.clone(),
                }
            })?;
            entries.push(ResolvedEntry {
                entry: entry.clone(),
                parser: Arc::clone(parser),
            });
        }
        Ok(ResolvedCatalog { entries })
    }
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A catalog entry bound to its parser capability.
#[derive(Clone)]
pub struct ResolvedEntry {
    /// The declarative entry.
    pub entry: CatalogEntry,
    /// The parser resolved from the registry.
    pub parser: Arc<dyn PayloadParser>,
}

impl fmt::Debug for ResolvedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedEntry")
            .field("entry", &self.entry)
            .finish()
    }
}

/// A catalog with every entry's parser resolved at construction time.
#[derive(Debug, Clone)]
pub struct ResolvedCatalog {
    entries: Vec<ResolvedEntry>,
}

impl ResolvedCatalog {
    /// All resolved entries in round-robin order.
    pub fn entries(&self) -> &[ResolvedEntry] {
        &self.entries
    }

    /// Look up a resolved entry by tag.
    pub fn get(&self, tag: &str) -> Option<&ResolvedEntry> {
        self.entries.iter().find(|e| e.entry.tag == tag)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the resolved catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_entry(tag: &str) -> CatalogEntry {
        CatalogEntry {
            tag: tag.to_string(),
            command: None,
            expected_packets: 1,
            timeout_ms: 2000,
            module: "volt".to_string(),
            parser: tag.to_lowercase(),
        }
    }

    // ---------------------------------------------------------------
    // Entries
    // ---------------------------------------------------------------

    #[test]
    fn command_text_defaults_to_query_form() {
        let entry = test_entry("BVOL");
        assert_eq!(entry.command_text(), "BVOL?");
    }

    #[test]
    fn command_text_uses_explicit_command() {
        let mut entry = test_entry("TIME");
        entry.command = Some("TIME 12:00:00".to_string());
        assert_eq!(entry.command_text(), "TIME 12:00:00");
    }

    #[test]
    fn entry_timeout_duration() {
        let entry = test_entry("BVOL");
        assert_eq!(entry.timeout(), Duration::from_millis(2000));
    }

    // ---------------------------------------------------------------
    // Catalog construction
    // ---------------------------------------------------------------

    #[test]
    fn catalog_lookup_by_tag() {
        let catalog = Catalog::new(vec![test_entry("BVOL"), test_entry("CMAX")]).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("CMAX").unwrap().tag, "CMAX");
        assert!(catalog.get("NOPE").is_none());
    }

    #[test]
    fn catalog_rejects_duplicate_tags() {
        let result = Catalog::new(vec![test_entry("BVOL"), test_entry("BVOL")]);
        assert!(matches!(result.unwrap_err(), Error::InvalidCatalog(_)));
    }

    #[test]
    fn catalog_rejects_empty_tag() {
        let result = Catalog::new(vec![test_entry("")]);
        assert!(matches!(result.unwrap_err(), Error::InvalidCatalog(_)));
    }

    #[test]
    fn catalog_rejects_zero_expected_packets() {
        let mut entry = test_entry("BVOL");
        entry.expected_packets = 0;
        let result = Catalog::new(vec![entry]);
        assert!(matches!(result.unwrap_err(), Error::InvalidCatalog(_)));
    }

    #[test]
    fn catalog_rejects_zero_timeout() {
        let mut entry = test_entry("BVOL");
        entry.timeout_ms = 0;
        let result = Catalog::new(vec![entry]);
        assert!(matches!(result.unwrap_err(), Error::InvalidCatalog(_)));
    }

    #[test]
    fn catalog_select_preserves_order() {
        let catalog = Catalog::builtin();
        let narrowed = catalog.select(&["CELL", "BVOL"]).unwrap();
        let tags: Vec<&str> = narrowed.tags().collect();
        assert_eq!(tags, vec!["CELL", "BVOL"]);
    }

    #[test]
    fn catalog_select_unknown_tag_fails() {
        let catalog = Catalog::builtin();
        let result = catalog.select(&["NOPE"]);
        assert!(matches!(result.unwrap_err(), Error::UnknownTag(t) if t == "NOPE"));
    }

    // ---------------------------------------------------------------
    // Built-in catalog
    // ---------------------------------------------------------------

    #[test]
    fn builtin_contains_core_tags() {
        let catalog = Catalog::builtin();
        for tag in ["SERI", "BVOL", "CELL", "CANF", "ERLD", "OP2"] {
            assert!(catalog.get(tag).is_some(), "missing {tag}");
        }
    }

    #[test]
    fn builtin_multi_frame_counts() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.get("CELL").unwrap().expected_packets, 5);
        assert_eq!(catalog.get("RINT").unwrap().expected_packets, 5);
        assert_eq!(catalog.get("PTEM").unwrap().expected_packets, 2);
        assert_eq!(catalog.get("BVOL").unwrap().expected_packets, 1);
    }

    #[test]
    fn builtin_timeouts() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.get("SERI").unwrap().timeout_ms, 2000);
        assert_eq!(catalog.get("CELL").unwrap().timeout_ms, 3000);
    }

    // ---------------------------------------------------------------
    // JSON form
    // ---------------------------------------------------------------

    #[test]
    fn catalog_from_json() {
        let json = r#"[
            {"tag": "BVOL", "expectedPackets": 1, "timeout": 2000,
             "module": "volt", "parser": "bvol"},
            {"tag": "CELL", "command": "CELL?", "expectedPackets": 5,
             "timeout": 3000, "module": "array", "parser": "cell"}
        ]"#;
        let catalog = Catalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("CELL").unwrap().command_text(), "CELL?");
        assert_eq!(catalog.get("BVOL").unwrap().expected_packets, 1);
    }

    #[test]
    fn catalog_from_invalid_json_fails() {
        let result = Catalog::from_json("not json");
        assert!(matches!(result.unwrap_err(), Error::InvalidCatalog(_)));
    }

    #[test]
    fn entry_serde_round_trip() {
        let entry = test_entry("BVOL");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("expectedPackets"));
        let back: CatalogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    // ---------------------------------------------------------------
    // Parser registry
    // ---------------------------------------------------------------

    fn text_parser(frames: &[Frame]) -> Option<ParsedResponse> {
        let first = frames.first()?;
        Some(ParsedResponse {
            kind: "text".to_string(),
            data: json!({ "text": first.payload_text() }),
        })
    }

    #[test]
    fn registry_resolves_catalog() {
        let catalog = Catalog::new(vec![test_entry("BVOL")]).unwrap();
        let mut registry = ParserRegistry::new();
        registry.register("volt", "bvol", text_parser);

        let resolved = registry.resolve(&catalog).unwrap();
        assert_eq!(resolved.len(), 1);

        let frames = vec![Frame {
            target: 0,
            sender: 2,
            payload: b"13.42".to_vec(),
        }];
        let parsed = resolved.get("BVOL").unwrap().parser.parse(&frames).unwrap();
        assert_eq!(parsed.kind, "text");
        assert_eq!(parsed.data["text"], "13.42");
    }

    #[test]
    fn registry_missing_parser_is_load_time_error() {
        let catalog = Catalog::new(vec![test_entry("BVOL"), test_entry("CMAX")]).unwrap();
        let mut registry = ParserRegistry::new();
        registry.register("volt", "bvol", text_parser);

        let result = registry.resolve(&catalog);
        match result.unwrap_err() {
            Error::ParserNotRegistered {
                tag,
                module,
                parser,
            } => {
                assert_eq!(tag, "CMAX");
                assert_eq!(module, "volt");
                assert_eq!(parser, "cmax");
            }
            other => panic!("expected ParserNotRegistered, got {other:?}"),
        }
    }

    #[test]
    fn registry_resolves_builtin_with_blanket_parsers() {
        let catalog = Catalog::builtin();
        let mut registry = ParserRegistry::new();
        for entry in catalog.entries() {
            registry.register(&entry.module, &entry.parser, text_parser);
        }
        let resolved = registry.resolve(&catalog).unwrap();
        assert_eq!(resolved.len(), catalog.len());
    }
}
