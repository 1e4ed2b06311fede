//! Entity dictionary and stock-mapping loader
//!
//! Immutable after construction; a reload builds a fresh dictionary and the
//! analyzer swaps the whole `Arc`.

use crate::models::{Entity, EntityKind, Provenance};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Built-in stock name → symbol table, merged before any mapping file
const BUILTIN_STOCKS: &[(&str, &str)] = &[
    ("Kweichow Moutai", "600519.SS"),
    ("Moutai", "600519.SS"),
    ("Tencent", "00700.HK"),
    ("Tencent Holdings", "00700.HK"),
    ("Apple", "AAPL.US"),
    ("Alibaba", "BABA.US"),
    ("Microsoft", "MSFT.US"),
    ("Google", "GOOGL.US"),
    ("Amazon", "AMZN.US"),
    ("Tesla", "TSLA.US"),
    ("CATL", "300750.SZ"),
    ("BYD", "002594.SZ"),
    ("Ping An", "601318.SS"),
    ("ICBC", "601398.SS"),
];

const BUILTIN_INDICES: &[(&str, &str)] = &[
    ("Shanghai Composite", "000001.SS"),
    ("SSE Composite", "000001.SS"),
    ("Shenzhen Component", "399001.SZ"),
    ("ChiNext", "399006.SZ"),
    ("CSI 300", "000300.SS"),
    ("STAR 50", "000688.SS"),
    ("Hang Seng", "HSI"),
    ("Dow Jones", "DJI"),
    ("Dow", "DJI"),
    ("Nasdaq", "IXIC"),
    ("S&P 500", "SPX"),
];

/// Exchange suffixes a fully-qualified symbol may already carry
const KNOWN_SUFFIXES: &[&str] = &[".SS", ".SZ", ".HK", ".US"];

/// Shenzhen-listed code prefixes; everything else 6-digit goes to Shanghai
const SHENZHEN_PREFIXES: &[char] = &['0', '3'];

/// Normalize a raw code from a mapping file into a full symbol.
///
/// Strips `sh`/`sz` exchange prefixes, then suffixes bare 6-digit codes by
/// listing venue: `0`/`3` prefixes → `.SZ`, everything else → `.SS`.
/// Codes already carrying a known suffix pass through unchanged.
pub fn normalize_stock_code(raw: &str) -> String {
    let mut code = raw.trim().to_string();

    for prefix in ["sh", "sz"] {
        if let Some(rest) = code.strip_prefix(prefix) {
            if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
                code = rest.to_string();
                break;
            }
        }
    }

    if KNOWN_SUFFIXES.iter().any(|s| code.ends_with(s)) {
        return code;
    }

    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        return classify_bare_code(&code);
    }

    code
}

/// Suffix a bare 6-digit code by its listing venue prefix
pub fn classify_bare_code(code: &str) -> String {
    if code.starts_with(SHENZHEN_PREFIXES) {
        format!("{}.SZ", code)
    } else {
        format!("{}.SS", code)
    }
}

/// Display-name → canonical-symbol mapping for stocks and indices.
/// Read-only once handed to the analyzer.
#[derive(Debug, Clone, Default)]
pub struct EntityDictionary {
    stocks: HashMap<String, String>,
    indices: HashMap<String, String>,
}

impl EntityDictionary {
    /// Dictionary seeded from the built-in tables
    pub fn with_builtins() -> Self {
        Self::from_tables(
            BUILTIN_STOCKS.iter().map(|(n, c)| (n.to_string(), c.to_string())),
            BUILTIN_INDICES.iter().map(|(n, c)| (n.to_string(), c.to_string())),
        )
    }

    /// Dictionary from explicit tables (tests, custom deployments)
    pub fn from_tables(
        stocks: impl IntoIterator<Item = (String, String)>,
        indices: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            stocks: stocks.into_iter().collect(),
            indices: indices.into_iter().collect(),
        }
    }

    /// Merge a `display_name,raw_code` mapping file into the stock table.
    ///
    /// A missing file or malformed rows are logged and skipped; whatever
    /// subset parsed is kept. Returns the number of rows merged.
    pub fn load_csv(&mut self, path: &Path) -> usize {
        let mut reader = match csv::Reader::from_path(path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Stock mapping file {} not loaded: {}", path.display(), e);
                return 0;
            }
        };

        let mut loaded = 0;
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed mapping row: {}", e);
                    continue;
                }
            };

            let name = record.get(0).map(str::trim).unwrap_or_default();
            let raw_code = record.get(1).map(str::trim).unwrap_or_default();
            if name.is_empty() || raw_code.is_empty() {
                warn!("Skipping mapping row with empty name or code");
                continue;
            }

            self.stocks
                .insert(name.to_string(), normalize_stock_code(raw_code));
            loaded += 1;
        }

        info!("Merged {} stocks from {}", loaded, path.display());
        loaded
    }

    pub fn lookup_stock(&self, name: &str) -> Option<&str> {
        self.stocks.get(name).map(String::as_str)
    }

    pub fn lookup_index(&self, name: &str) -> Option<&str> {
        self.indices.get(name).map(String::as_str)
    }

    /// Resolve a display name to a full entity, stocks first
    pub fn lookup(&self, name: &str) -> Option<Entity> {
        if let Some(code) = self.lookup_stock(name) {
            return Some(Entity::new(
                EntityKind::Stock,
                code,
                name,
                0.9,
                Provenance::Dictionary,
            ));
        }
        self.lookup_index(name).map(|code| {
            Entity::new(EntityKind::Index, code, name, 0.9, Provenance::Dictionary)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stocks.contains_key(name) || self.indices.contains_key(name)
    }

    /// All known names with their kinds and canonical codes
    pub fn names(&self) -> impl Iterator<Item = (&str, EntityKind, &str)> {
        self.stocks
            .iter()
            .map(|(n, c)| (n.as_str(), EntityKind::Stock, c.as_str()))
            .chain(
                self.indices
                    .iter()
                    .map(|(n, c)| (n.as_str(), EntityKind::Index, c.as_str())),
            )
    }

    pub fn len(&self) -> usize {
        self.stocks.len() + self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty() && self.indices.is_empty()
    }
}
