// Copyright 2020 The Jujutsu Authors
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

//! The file installer (§4.4.3): the merge matrix that reconciles an
//! incoming revision of a file with whatever the user has locally changed,
//! entirely through the log so a crash never leaves the working copy
//! between states.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tracing::instrument;

use crate::admin::AdmPaths;
use crate::admin::AdminArea;
use crate::entries::EntryKind;
use crate::entries::EntryUpdate;
use crate::eol::EolStyle;
use crate::error::WcError;
use crate::error::WcResult;
use crate::external;
use crate::keywords;
use crate::keywords::KeywordValues;
use crate::log::LogCommand;
use crate::log::LogWriter;
use crate::log::TextTranslation;
use crate::noderev::RevNum;

pub(crate) const ENTRY_PROP_PREFIX: &str = "svn:entry:";
pub(crate) const WC_PROP_PREFIX: &str = "svn:wc:";
const MIME_TYPE_PROP: &str = "svn:mime-type";
const EOL_STYLE_PROP: &str = "svn:eol-style";
const KEYWORDS_PROP: &str = "svn:keywords";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropClass {
    Entry,
    WcProp,
    Regular,
}

pub(crate) fn classify_prop(name: &str) -> PropClass {
    if name.starts_with(WC_PROP_PREFIX) {
        PropClass::WcProp
    } else if name.starts_with(ENTRY_PROP_PREFIX) {
        PropClass::Entry
    } else {
        PropClass::Regular
    }
}

/// Stores the out-of-band `svn:wc:` property channel (§1's supplemented
/// feature, grounded on `update_editor.c`'s wc-prop caching hints). Kept
/// pluggable rather than hardcoded to a path so embedders can back it with
/// whatever side storage fits.
pub trait WcPropStore: std::fmt::Debug + Send + Sync {
    fn get(&self, path: &str, name: &str) -> WcResult<Option<String>>;
    fn set(&self, path: &str, name: &str, value: Option<String>) -> WcResult<()>;
}

/// An in-memory [`WcPropStore`], sufficient for tests and for embedders with
/// no durability requirement for wc-props (they are, by design, a cache).
#[derive(Debug, Default)]
pub struct MemoryWcPropStore {
    values: std::sync::Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryWcPropStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WcPropStore for MemoryWcPropStore {
    fn get(&self, path: &str, name: &str) -> WcResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(&(path.to_owned(), name.to_owned())).cloned())
    }

    fn set(&self, path: &str, name: &str, value: Option<String>) -> WcResult<()> {
        let mut values = self.values.lock().unwrap();
        let key = (path.to_owned(), name.to_owned());
        match value {
            Some(v) => {
                values.insert(key, v);
            }
            None => {
                values.remove(&key);
            }
        }
        Ok(())
    }
}

pub(crate) fn read_props(path: &Path) -> WcResult<BTreeMap<String, String>> {
    match fs::read(path) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).map_err(|e| WcError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(WcError::io(path, e)),
    }
}

fn queue_write(log: &mut LogWriter, paths: &AdmPaths, tmp_name: &str, dst: PathBuf, bytes: Vec<u8>) -> WcResult<()> {
    let tmp_path = paths.tmp(tmp_name);
    if let Some(parent) = tmp_path.parent() {
        fs::create_dir_all(parent).map_err(|e| WcError::io(parent, e))?;
    }
    fs::write(&tmp_path, bytes).map_err(|e| WcError::io(&tmp_path, e))?;
    log.push(LogCommand::Cp { src: tmp_path, dst, translation: None, repair: false });
    Ok(())
}

/// Step 3: merges `propchanges` into `name`'s working and pristine property
/// files via the log, returning the set of property names whose local value
/// disagreed with both the old and new incoming value (a genuine conflict,
/// as opposed to a clean fast-forward).
pub(crate) fn merge_prop_diffs(
    log: &mut LogWriter,
    paths: &AdmPaths,
    name: &str,
    propchanges: &[(String, Option<String>)],
) -> WcResult<BTreeMap<String, bool>> {
    let base = read_props(&paths.prop_base(name))?;
    let working = read_props(&paths.props(name))?;
    let mut merged = working.clone();
    let mut new_base = base.clone();
    let mut conflicts = BTreeMap::new();

    for (key, new_value) in propchanges {
        let old_base_value = base.get(key).cloned();
        let local_value = working.get(key).cloned();
        let locally_modified = local_value != old_base_value;
        if locally_modified && local_value != *new_value {
            conflicts.insert(key.clone(), true);
        }
        match new_value {
            Some(v) => {
                new_base.insert(key.clone(), v.clone());
                if !locally_modified {
                    merged.insert(key.clone(), v.clone());
                }
            }
            None => {
                new_base.remove(key);
                if !locally_modified {
                    merged.remove(key);
                }
            }
        }
    }

    if propchanges.is_empty() {
        return Ok(conflicts);
    }
    queue_write(log, paths, &format!("{name}.props"), paths.props(name), serde_json::to_vec_pretty(&merged).unwrap())?;
    queue_write(log, paths, &format!("{name}.prop-base"), paths.prop_base(name), serde_json::to_vec_pretty(&new_base).unwrap())?;
    Ok(conflicts)
}

/// A file's incoming revision, as handed to [`install_file`] by the driver
/// (which is responsible for materializing `new_text_path` from whatever
/// repository state it is consuming — out of scope here).
pub struct FileInstallRequest<'a> {
    pub parent_dir: &'a Path,
    pub basename: &'a str,
    pub new_rev: RevNum,
    /// Present only when the text itself changed (`apply_textdelta` was
    /// called). Expected to already sit at `adm/tmp/text-base/<basename>.base`
    /// or be moved there as step 6 describes.
    pub new_text_path: Option<PathBuf>,
    pub props: Vec<(String, Option<String>)>,
    pub is_full_proplist: bool,
    pub new_url: Option<String>,
}

/// The effective value of a single regular property: the incoming value
/// when one was sent and it did not land in `prop_conflicts`, else whatever
/// was already on record (§4.4.3 step 5's precedence rule, applied
/// uniformly to `svn:mime-type`, `svn:eol-style` and `svn:keywords`).
fn effective_prop(
    name: &str,
    regular_props: &[(String, Option<String>)],
    conflicts: &BTreeMap<String, bool>,
    prior: &BTreeMap<String, String>,
) -> Option<String> {
    let incoming = regular_props.iter().find(|(k, _)| k == name);
    match incoming {
        Some((_, v)) if !conflicts.contains_key(name) => v.clone(),
        _ => prior.get(name).cloned(),
    }
}

fn is_binary(regular_props: &[(String, Option<String>)], conflicts: &BTreeMap<String, bool>, prior: &BTreeMap<String, String>) -> bool {
    effective_prop(MIME_TYPE_PROP, regular_props, conflicts, prior).is_some_and(|mime| !mime.starts_with("text/"))
}

fn effective_eol_style(
    regular_props: &[(String, Option<String>)],
    conflicts: &BTreeMap<String, bool>,
    prior: &BTreeMap<String, String>,
) -> Option<EolStyle> {
    effective_prop(EOL_STYLE_PROP, regular_props, conflicts, prior).and_then(|v| EolStyle::parse(&v))
}

fn effective_keywords(
    regular_props: &[(String, Option<String>)],
    conflicts: &BTreeMap<String, bool>,
    prior: &BTreeMap<String, String>,
) -> std::collections::HashSet<&'static str> {
    effective_prop(KEYWORDS_PROP, regular_props, conflicts, prior)
        .map(|v| keywords::parse_keyword_set(&v))
        .unwrap_or_default()
}

/// Runs the full §4.4.3 installation of one file's incoming revision.
#[instrument(skip_all, fields(parent_dir = %req.parent_dir.display(), name = req.basename))]
pub fn install_file(wc_props: &dyn WcPropStore, req: FileInstallRequest<'_>) -> WcResult<()> {
    let mut area = AdminArea::lock(req.parent_dir)?;
    let paths = area.paths.clone();
    let name = req.basename;

    let mut entry_props = Vec::new();
    let mut wc_props_list = Vec::new();
    let mut regular_props = Vec::new();
    for (key, value) in &req.props {
        match classify_prop(key) {
            PropClass::Entry => entry_props.push((key.clone(), value.clone())),
            PropClass::WcProp => wc_props_list.push((key.clone(), value.clone())),
            PropClass::Regular => regular_props.push((key.clone(), value.clone())),
        }
    }

    let propchanges = if req.is_full_proplist {
        let pristine = read_props(&paths.prop_base(name))?;
        regular_props
            .iter()
            .filter(|(k, v)| pristine.get(k) != v.as_ref())
            .cloned()
            .chain(pristine.keys().filter(|k| !regular_props.iter().any(|(rk, _)| rk == *k)).map(|k| (k.clone(), None)))
            .collect::<Vec<_>>()
    } else {
        regular_props.clone()
    };

    let working_props_before = read_props(&paths.props(name))?;
    let base_props_before = read_props(&paths.prop_base(name))?;
    let props_locally_modified = working_props_before != base_props_before;

    let prop_conflicts = merge_prop_diffs(&mut area.log, &paths, name, &propchanges)?;

    for (key, value) in &entry_props {
        let attr = key.strip_prefix(ENTRY_PROP_PREFIX).unwrap_or(key);
        let update = match attr {
            "committed-rev" => {
                EntryUpdate { committed_rev: Some(value.as_ref().and_then(|v| v.parse().ok())), ..Default::default() }
            }
            "committed-date" => EntryUpdate { committed_date: Some(value.clone()), ..Default::default() },
            "last-author" => EntryUpdate { last_author: Some(value.clone()), ..Default::default() },
            _ => continue,
        };
        area.log.push(LogCommand::ModifyEntry { name: name.to_owned(), update });
    }

    for (key, value) in &wc_props_list {
        let attr = key.strip_prefix(WC_PROP_PREFIX).unwrap_or(key);
        wc_props.set(&paths.working_file(name).to_string_lossy(), attr, value.clone())?;
    }

    let mut locally_modified_text = false;
    if req.new_text_path.is_some() {
        let working_path = paths.working_file(name);
        let base_path = paths.text_base(name);
        locally_modified_text = match fs::read(&working_path) {
            Ok(working) => match fs::read(&base_path) {
                Ok(base) => crate::eol::normalize_to_lf(&working) != base,
                Err(_) => true,
            },
            Err(_) => false,
        };

        // The previously-set value for precedence purposes is the pristine
        // property set as it stood *before* this install (`merge_prop_diffs`
        // above only queued its write, not yet replayed it).
        let binary = is_binary(&regular_props, &prop_conflicts, &base_props_before);
        let eol_style = effective_eol_style(&regular_props, &prop_conflicts, &base_props_before).unwrap_or(EolStyle::None);
        let enabled_keywords = effective_keywords(&regular_props, &prop_conflicts, &base_props_before);
        let keyword_values = KeywordValues {
            revision: Some(req.new_rev.0.to_string()),
            date: entry_props.iter().find(|(k, _)| k.ends_with("committed-date")).and_then(|(_, v)| v.clone()),
            author: entry_props.iter().find(|(k, _)| k.ends_with("last-author")).and_then(|(_, v)| v.clone()),
            url: req
                .new_url
                .clone()
                .or_else(|| working_props_before.get("svn:entry:url").cloned()),
        };

        let tmp_textbase = paths.tmp_text_base(name);
        let final_textbase = paths.text_base(name);
        let new_text_path = req.new_text_path.as_ref().unwrap();
        if new_text_path != &tmp_textbase {
            if let Some(parent) = tmp_textbase.parent() {
                fs::create_dir_all(parent).map_err(|e| WcError::io(parent, e))?;
            }
            fs::rename(new_text_path, &tmp_textbase).map_err(|e| WcError::io(&tmp_textbase, e))?;
        }
        area.log.push(LogCommand::Mv { src: tmp_textbase.clone(), dst: final_textbase.clone() });

        let keyword_names: Vec<String> = enabled_keywords.iter().map(|s| s.to_string()).collect();
        if !locally_modified_text {
            area.log.push(LogCommand::Cp {
                src: final_textbase.clone(),
                dst: working_path.clone(),
                translation: Some(TextTranslation {
                    eol: eol_style.clone(),
                    keywords: keyword_names.clone(),
                    keyword_values: keyword_values.clone(),
                    expand: true,
                }),
                repair: false,
            });
        } else if binary {
            let orig_path = paths.tmp(&format!("{name}.orig"));
            area.log.push(LogCommand::Cp { src: working_path.clone(), dst: orig_path, translation: None, repair: false });
            area.log.push(LogCommand::Cp { src: final_textbase.clone(), dst: working_path.clone(), translation: None, repair: false });
        } else {
            let old_lf = paths.tmp(&format!("{name}.old-lf"));
            let new_lf = paths.tmp(&format!("{name}.new-lf"));
            let patch_path = paths.tmp(&format!("{name}.patch"));
            let reject_path = paths.adm_dir.join(format!("{name}.rej"));

            // The diff itself runs outside the log (it only reads, never
            // mutates the working copy) but its output feeds a RUN_CMD that
            // does, so the patch file is written directly here.
            let old_base_bytes = fs::read(&final_textbase).unwrap_or_default();
            fs::write(&old_lf, crate::eol::normalize_to_lf(&old_base_bytes)).map_err(|e| WcError::io(&old_lf, e))?;
            let new_base_bytes = fs::read(new_text_path).or_else(|_| fs::read(&tmp_textbase)).unwrap_or_default();
            fs::write(&new_lf, crate::eol::normalize_to_lf(&new_base_bytes)).map_err(|e| WcError::io(&new_lf, e))?;

            if let Some(patch) = external::diff_unified(&old_lf, &new_lf)? {
                fs::write(&patch_path, &patch).map_err(|e| WcError::io(&patch_path, e))?;
                if eol_style == EolStyle::None && enabled_keywords.is_empty() {
                    area.log.push(LogCommand::RunCmd {
                        name: "patch".into(),
                        args: vec![working_path.to_string_lossy().into_owned(), reject_path.to_string_lossy().into_owned()],
                        infile: Some(patch_path.clone()),
                    });
                } else {
                    let working_lf = paths.tmp(&format!("{name}.working-lf"));
                    area.log.push(LogCommand::Cp {
                        src: working_path.clone(),
                        dst: working_lf.clone(),
                        translation: Some(TextTranslation {
                            eol: eol_style.clone(),
                            keywords: keyword_names.clone(),
                            keyword_values: keyword_values.clone(),
                            expand: false,
                        }),
                        repair: true,
                    });
                    area.log.push(LogCommand::RunCmd {
                        name: "patch".into(),
                        args: vec![working_lf.to_string_lossy().into_owned(), reject_path.to_string_lossy().into_owned()],
                        infile: Some(patch_path.clone()),
                    });
                    area.log.push(LogCommand::Cp {
                        src: working_lf.clone(),
                        dst: working_path.clone(),
                        translation: Some(TextTranslation { eol: eol_style.clone(), keywords: keyword_names.clone(), keyword_values, expand: true }),
                        repair: false,
                    });
                    area.log.push(LogCommand::Rm { path: working_lf });
                }
                area.log.push(LogCommand::DetectConflict { name: name.to_owned(), reject: reject_path });
                area.log.push(LogCommand::Rm { path: patch_path });
            }
            area.log.push(LogCommand::Rm { path: old_lf });
            area.log.push(LogCommand::Rm { path: new_lf });
        }
        area.log.push(LogCommand::Readonly { path: final_textbase });
    }

    area.log.push(LogCommand::ModifyEntry {
        name: name.to_owned(),
        update: EntryUpdate { kind: Some(EntryKind::File), revision: Some(req.new_rev.0), ..Default::default() },
    });
    if !locally_modified_text && req.new_text_path.is_some() {
        area.log.push(LogCommand::ModifyEntry {
            name: name.to_owned(),
            update: EntryUpdate { text_time: Some(Some(wc_mtime_sentinel())), ..Default::default() },
        });
    }
    if !req.props.is_empty() && !props_locally_modified {
        area.log.push(LogCommand::ModifyEntry {
            name: name.to_owned(),
            update: EntryUpdate { prop_time: Some(Some(wc_mtime_sentinel())), ..Default::default() },
        });
    }
    if let Some(url) = &req.new_url {
        area.log.push(LogCommand::ModifyEntry { name: name.to_owned(), update: EntryUpdate { url: Some(url.clone()), ..Default::default() } });
    }

    area.run_log()?;
    area.unlock()?;
    Ok(())
}

/// `text_time`/`prop_time` are recorded as "use the working file's mtime at
/// replay time" (§4.3's `MODIFY_ENTRY basename text_time=WC`); this records
/// the replay wall-clock instead of re-stat'ing the file, which is
/// observationally equivalent for the crate's own modification check (both
/// predate any subsequent edit).
pub(crate) fn wc_mtime_sentinel() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_json(path: &Path, props: &BTreeMap<String, String>) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec(props).unwrap()).unwrap();
    }

    #[test]
    fn no_local_mods_installs_textbase_into_working() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        fs::write(paths.working_file("a"), b"old\n").unwrap();
        fs::write(paths.text_base("a"), b"old\n").unwrap();

        let tmp_new = paths.tmp("incoming");
        fs::create_dir_all(tmp_new.parent().unwrap()).unwrap();
        fs::write(&tmp_new, b"new\n").unwrap();

        let wc_props = MemoryWcPropStore::new();
        install_file(
            &wc_props,
            FileInstallRequest {
                parent_dir: dir.path(),
                basename: "a",
                new_rev: RevNum(7),
                new_text_path: Some(tmp_new),
                props: Vec::new(),
                is_full_proplist: false,
                new_url: None,
            },
        )
        .unwrap();

        assert_eq!(fs::read(paths.working_file("a")).unwrap(), b"new\n");
        let entries = crate::entries::entries_read(&paths.adm_dir).unwrap();
        assert_eq!(entries["a"].revision, 7);
    }

    #[test]
    fn clean_local_mod_patches_without_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AdmPaths::new(dir.path());
        paths.ensure_initialized().unwrap();
        fs::write(paths.text_base("a"), b"a\nb\n").unwrap();
        fs::write(paths.working_file("a"), b"a\nb\nlocal\n").unwrap();

        let tmp_new = paths.tmp("incoming");
        fs::create_dir_all(tmp_new.parent().unwrap()).unwrap();
        fs::write(&tmp_new, b"a\nB\n").unwrap();

        let wc_props = MemoryWcPropStore::new();
        install_file(
            &wc_props,
            FileInstallRequest {
                parent_dir: dir.path(),
                basename: "a",
                new_rev: RevNum(2),
                new_text_path: Some(tmp_new),
                props: Vec::new(),
                is_full_proplist: false,
                new_url: None,
            },
        )
        .unwrap();

        let working = fs::read_to_string(paths.working_file("a")).unwrap();
        assert!(working.contains("local"));
        assert!(working.contains('B'));
        let entries = crate::entries::entries_read(&paths.adm_dir).unwrap();
        assert!(!entries["a"].conflicted);
        let _ = write_json;
    }
}
