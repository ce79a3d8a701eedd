// Copyright 2025 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Keyword expansion (`svn:keywords`, §4.4.3, §6, glossary).
//!
//! Keywords are expanded into working-file text on checkout/update and
//! contracted back to their bare `$Name$` form before storing into the
//! pristine text-base, so the text-base never carries revision-specific
//! bytes.

use std::collections::HashSet;

/// Values bound to the four well-known keyword names, re-derived from the
/// *updated* entry metadata (§4.4.3's "not the pre-update entry" invariant).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KeywordValues {
    pub revision: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
}

/// Parses the `svn:keywords` property value into the set of enabled long
/// and short keyword names (e.g. `"Revision Rev Date"` or `"Id"`).
pub fn parse_keyword_set(value: &str) -> HashSet<&'static str> {
    let mut set = HashSet::new();
    for token in value.split_whitespace() {
        match token {
            "Revision" | "Rev" | "LastChangedRevision" => {
                set.insert("Revision");
            }
            "Date" | "LastChangedDate" => {
                set.insert("Date");
            }
            "Author" | "LastChangedBy" => {
                set.insert("Author");
            }
            "URL" | "HeadURL" => {
                set.insert("URL");
            }
            "Id" => {
                set.insert("Revision");
                set.insert("Date");
                set.insert("Author");
                set.insert("URL");
            }
            _ => {}
        }
    }
    set
}

fn value_for(name: &str, values: &KeywordValues) -> Option<String> {
    match name {
        "Revision" => values.revision.clone(),
        "Date" => values.date.clone(),
        "Author" => values.author.clone(),
        "URL" => values.url.clone(),
        _ => None,
    }
}

/// Expands every enabled `$Name$` or previously-expanded `$Name: ... $`
/// occurrence in `text` to its bound value.
pub fn expand(text: &[u8], enabled: &HashSet<&'static str>, values: &KeywordValues) -> Vec<u8> {
    if enabled.is_empty() || !text.contains(&b'$') {
        return text.to_vec();
    }
    let text = String::from_utf8_lossy(text);
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_ref();
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(end) = after.find('$') {
            let inner = &after[..end];
            let name = inner.split(':').next().unwrap_or(inner);
            if enabled.contains(name) {
                if let Some(value) = value_for(name, values) {
                    out.push_str(&format!("${name}: {value} $"));
                    rest = &after[end + 1..];
                    continue;
                }
            }
            // Unknown or disabled keyword: leave the `$...$` run untouched.
            out.push('$');
            out.push_str(inner);
            out.push('$');
            rest = &after[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }
    out.push_str(rest);
    out.into_bytes()
}

/// Contracts every `$Name: ... $` occurrence back to `$Name$`, the form
/// stored in the pristine text-base.
pub fn contract(text: &[u8], enabled: &HashSet<&'static str>) -> Vec<u8> {
    if enabled.is_empty() || !text.contains(&b'$') {
        return text.to_vec();
    }
    let text = String::from_utf8_lossy(text);
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_ref();
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(end) = after.find('$') {
            let inner = &after[..end];
            let name = inner.split(':').next().unwrap_or(inner);
            if enabled.contains(name) {
                out.push('$');
                out.push_str(name);
                out.push('$');
            } else {
                out.push('$');
                out.push_str(inner);
                out.push('$');
            }
            rest = &after[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }
    out.push_str(rest);
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_then_contract_roundtrips() {
        let enabled = parse_keyword_set("Id Revision");
        let values = KeywordValues { revision: Some("42".into()), date: None, author: None, url: Some("https://x/a".into()) };
        let expanded = expand(b"prefix $Revision$ $URL$ suffix", &enabled, &values);
        assert_eq!(&expanded[..], b"prefix $Revision: 42 $ $URL: https://x/a $ suffix");
        let contracted = contract(&expanded, &enabled);
        assert_eq!(&contracted[..], b"prefix $Revision$ $URL$ suffix");
    }

    #[test]
    fn disabled_keyword_is_left_untouched() {
        let enabled = parse_keyword_set("Date");
        let values = KeywordValues::default();
        let text = expand(b"$Revision$", &enabled, &values);
        assert_eq!(&text[..], b"$Revision$");
    }
}
