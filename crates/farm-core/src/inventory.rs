//! Snapshot of the jobs a CI backend currently holds.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Job names and stored configuration documents, limited to the namespace
/// this system owns. Read once per pass; never persisted locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInventory {
    jobs: BTreeMap<String, String>,
}

impl JobInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, config: impl Into<String>) {
        self.jobs.insert(name.into(), config.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.jobs.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Extend<(String, String)> for JobInventory {
    fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, iter: I) {
        self.jobs.extend(iter);
    }
}

impl FromIterator<(String, String)> for JobInventory {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            jobs: iter.into_iter().collect(),
        }
    }
}

/// Compare two configuration documents the way a backend stores them.
///
/// Line endings, indentation, blank lines, the XML declaration and
/// `plugin="name@version"` attributes are ignored, since Jenkins rewrites all
/// of them in a stored `config.xml`. Any other re-serialisation, such as
/// reordered attributes or defaults a plugin expands, still compares as a
/// change, so that job is updated again on the next pass.
pub fn payloads_match(stored: &str, desired: &str) -> bool {
    canonical(stored) == canonical(desired)
}

fn canonical(doc: &str) -> String {
    static DECLARATION: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*<\?xml[^>]*\?>").expect("valid regex"));
    static PLUGIN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"\s+plugin="[^"]*""#).expect("valid regex"));

    let doc = DECLARATION.replace(doc, "");
    let doc = PLUGIN.replace_all(&doc, "");
    doc.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
