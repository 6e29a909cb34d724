use anyhow::{Context, Result};
use regex::RegexSet;
use std::collections::BTreeMap;

/// Shell-style patterns selecting the labels or annotations kept from an object.
///
/// `*` matches any sequence of characters and `?` matches a single character. Without any
/// pattern nothing is kept.
#[derive(Clone, Debug, Default)]
pub struct Globs(Option<RegexSet>);

// === impl Globs ===

impl Globs {
    pub fn new<S: AsRef<str>>(globs: impl IntoIterator<Item = S>) -> Result<Self> {
        let patterns = globs
            .into_iter()
            .map(|g| to_regex(g.as_ref()))
            .collect::<Vec<_>>();
        if patterns.is_empty() {
            return Ok(Self(None));
        }
        let set = RegexSet::new(&patterns).context("invalid glob")?;
        Ok(Self(Some(set)))
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.0.as_ref().is_some_and(|set| set.is_match(key))
    }

    /// Keeps the entries whose key matches a pattern.
    pub fn filter(&self, map: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
        map.into_iter()
            .flatten()
            .filter(|(k, _)| self.is_match(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn to_regex(glob: &str) -> String {
    let mut re = String::with_capacity(glob.len() + 2);
    re.push('^');
    for c in glob.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    re
}
