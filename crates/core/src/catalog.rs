//! Read-only view of a namespace's localization catalog.
//!
//! Catalogs are filled from gettext `.po` files, one file per locale.
//! Only singular entries are read; obsolete entries and comments are
//! skipped.

use std::collections::{BTreeMap, HashMap};

/// Message id -> (locale -> translated string).
#[derive(Debug, Clone, Default)]
pub struct TranslationCatalog {
    entries: HashMap<String, BTreeMap<String, String>>,
}

impl TranslationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one translation. Empty translations are ignored.
    pub fn insert(&mut self, msgid: &str, locale: &str, translated: &str) {
        if msgid.is_empty() || translated.is_empty() {
            return;
        }
        self.entries
            .entry(msgid.to_owned())
            .or_default()
            .insert(locale.to_owned(), translated.to_owned());
    }

    /// Translations of `msgid`, ordered by locale.
    pub fn translations(&self, msgid: &str) -> Option<&BTreeMap<String, String>> {
        self.entries.get(msgid)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every translated entry of a `.po` file for `locale`.
    pub fn read_po(&mut self, locale: &str, text: &str) {
        let mut part = Part::None;
        let mut msgid = String::new();
        let mut msgstr = String::new();

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('"') {
                match part {
                    Part::Id => msgid.push_str(&unquote(line)),
                    Part::Str => msgstr.push_str(&unquote(line)),
                    _ => {}
                }
                continue;
            }
            let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            match keyword {
                "msgctxt" | "msgid" => {
                    if matches!(part, Part::Str | Part::Skipped) {
                        self.insert(&msgid, locale, &msgstr);
                        msgid.clear();
                        msgstr.clear();
                    }
                    if keyword == "msgid" {
                        msgid = unquote(rest);
                        part = Part::Id;
                    } else {
                        part = Part::Skipped;
                    }
                }
                "msgstr" | "msgstr[0]" => {
                    msgstr = unquote(rest);
                    part = Part::Str;
                }
                _ => part = Part::Skipped,
            }
        }
        if matches!(part, Part::Str | Part::Skipped) {
            self.insert(&msgid, locale, &msgstr);
        }
    }
}

/// Which string of the current entry continuation lines extend.
#[derive(Clone, Copy)]
enum Part {
    None,
    Id,
    Str,
    Skipped,
}

/// Decode a quoted `.po` string.
fn unquote(quoted: &str) -> String {
    let inner = quoted
        .trim()
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(quoted);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
