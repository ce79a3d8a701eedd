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

//! EOL-style normalization (`svn:eol-style`, §4.4.3, §6).
//!
//! The pristine text-base always stores LF-normalized text when an EOL
//! style is in effect; [`EolStyle::to_disk`]/[`EolStyle::to_pristine`]
//! convert between that and the working file's on-disk line endings.

/// One of the six EOL styles named in §3.4/§6.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "style", content = "value")]
pub enum EolStyle {
    /// No translation at all.
    None,
    /// The platform's native line ending.
    Native,
    Cr,
    Lf,
    Crlf,
    /// A fixed, explicitly named line ending (rare; same repertoire as the
    /// other four, but the value came from the property text verbatim
    /// rather than being inferred).
    Fixed(String),
}

impl EolStyle {
    fn native_ending() -> &'static str {
        if cfg!(windows) {
            "\r\n"
        } else {
            "\n"
        }
    }

    fn ending(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Native => Some(Self::native_ending()),
            Self::Cr => Some("\r"),
            Self::Lf => Some("\n"),
            Self::Crlf => Some("\r\n"),
            Self::Fixed(s) => Some(s.as_str()),
        }
    }

    /// Parses the `svn:eol-style` property value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "native" => Some(Self::Native),
            "CR" => Some(Self::Cr),
            "LF" => Some(Self::Lf),
            "CRLF" => Some(Self::Crlf),
            "" => None,
            other => Some(Self::Fixed(other.to_owned())),
        }
    }

    /// Normalizes `bytes` (assumed LF-normalized pristine text) to this
    /// style's on-disk line ending, for checkout/update.
    pub fn to_disk(&self, bytes: &[u8]) -> Vec<u8> {
        match self.ending() {
            None | Some("\n") => bytes.to_vec(),
            Some(ending) => translate_lf_to(bytes, ending.as_bytes()),
        }
    }

    /// Normalizes `bytes` (working-file contents in this style) back to LF,
    /// for storing into the pristine text-base.
    pub fn to_pristine(&self, bytes: &[u8]) -> Vec<u8> {
        match self.ending() {
            None | Some("\n") => bytes.to_vec(),
            Some(ending) => translate_to_lf(bytes, ending.as_bytes()),
        }
    }
}

fn translate_lf_to(bytes: &[u8], ending: &[u8]) -> Vec<u8> {
    if ending == b"\n" {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'\n' {
            out.extend_from_slice(ending);
        } else {
            out.push(b);
        }
    }
    out
}

fn translate_to_lf(bytes: &[u8], ending: &[u8]) -> Vec<u8> {
    if ending == b"\n" {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(ending) {
            out.push(b'\n');
            i += ending.len();
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Normalizes arbitrary line endings (CRLF, CR, or LF) down to LF, used when
/// preparing the two text-bases for the external `diff` invocation (§4.4.3
/// step 8's "LF-normalized old and new textbases").
pub fn normalize_to_lf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                out.push(b'\n');
                i += 2;
            }
            b'\r' => {
                out.push(b'\n');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}
