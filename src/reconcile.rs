//! Reconciliation of a filtered remote listing against the destination directory.

use crate::download::is_partial_name;
use crate::error::SyncError;
use crate::filename::RemoteFileName;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, error};

/// What to do with one remote candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No local version exists.
    Fetch,
    /// The remote version supersedes the single local copy, which is removed
    /// once the new one is in place.
    Replace { stale: String },
    /// The exact file is already present.
    Present,
    /// The local copy is at least as new as the remote one.
    AlreadyLatest { local: String },
    /// The same listing carries a newer version of this file.
    SupersededRemote { by: String },
    /// Several local versions coexist; the file is skipped.
    Ambiguous { locals: Vec<String> },
}

/// A remote name and its decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub decision: Decision,
}

impl Candidate {
    /// Whether the candidate must be retrieved.
    pub fn needs_fetch(&self) -> bool {
        matches!(self.decision, Decision::Fetch | Decision::Replace { .. })
    }
}

/// Outcome of reconciling one day; every remote candidate appears exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub candidates: Vec<Candidate>,
}

impl ReconcilePlan {
    /// Candidates to retrieve, in listing order.
    pub fn to_fetch(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.needs_fetch())
    }

    /// Candidates skipped because of inconsistent local state.
    pub fn ambiguous(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates
            .iter()
            .filter(|c| matches!(c.decision, Decision::Ambiguous { .. }))
    }

    /// Candidates already satisfied locally.
    pub fn satisfied(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates
            .iter()
            .filter(|c| !c.needs_fetch() && !matches!(c.decision, Decision::Ambiguous { .. }))
    }
}

/// Identity of a tile-day content stream, independent of its version.
type ContentKey<'a> = (bool, &'a str, &'a str, &'a str, &'a str);

fn content_key(name: &RemoteFileName) -> ContentKey<'_> {
    (
        name.imagery,
        &name.product,
        &name.date,
        &name.tile,
        &name.extension,
    )
}

/// Decides which remote files to retrieve given the local inventory.
///
/// Versions of the same tile-day content are grouped by product, date, tile
/// and extension. Only the newest remote version of a group is considered;
/// it is fetched when no local version exists or when it is newer than the
/// single local version. Several local versions of one group make the
/// decision ambiguous: the file is reported and skipped.
pub fn reconcile(remote: &[String], local: &BTreeSet<String>) -> ReconcilePlan {
    let parsed_local: Vec<RemoteFileName> = local
        .iter()
        .filter_map(|name| RemoteFileName::parse(name).ok())
        .collect();
    let mut local_groups: HashMap<_, Vec<&RemoteFileName>> = HashMap::new();
    for name in &parsed_local {
        local_groups.entry(content_key(name)).or_default().push(name);
    }

    let parsed_remote: Vec<Option<RemoteFileName>> = remote
        .iter()
        .map(|name| RemoteFileName::parse(name).ok())
        .collect();
    let mut newest_remote: HashMap<_, &RemoteFileName> = HashMap::new();
    for name in parsed_remote.iter().flatten() {
        newest_remote
            .entry(content_key(name))
            .and_modify(|current| {
                if name.is_newer_than(current) {
                    *current = name;
                }
            })
            .or_insert(name);
    }

    let candidates = remote
        .iter()
        .zip(&parsed_remote)
        .map(|(raw, parsed)| {
            let decision = if local.contains(raw) {
                Decision::Present
            } else {
                match parsed {
                    // names outside the convention have no versions to compare
                    None => Decision::Fetch,
                    Some(parsed) => decide(parsed, &newest_remote, &local_groups),
                }
            };
            if let Decision::Ambiguous { locals } = &decision {
                error!(
                    "There are too many local files for {}: {}",
                    raw,
                    locals.join(", ")
                );
            }
            debug!("{} -> {:?}", raw, decision);
            Candidate {
                name: raw.clone(),
                decision,
            }
        })
        .collect();

    ReconcilePlan { candidates }
}

fn decide<'a>(
    remote: &'a RemoteFileName,
    newest_remote: &HashMap<ContentKey<'a>, &'a RemoteFileName>,
    local_groups: &HashMap<ContentKey<'a>, Vec<&'a RemoteFileName>>,
) -> Decision {
    let key = content_key(remote);
    if let Some(newest) = newest_remote.get(&key) {
        if newest.raw != remote.raw && newest.is_newer_than(remote) {
            return Decision::SupersededRemote {
                by: newest.raw.clone(),
            };
        }
    }
    match local_groups.get(&key).map(Vec::as_slice) {
        None | Some([]) => Decision::Fetch,
        Some([existing]) => {
            if remote.is_newer_than(existing) {
                Decision::Replace {
                    stale: existing.raw.clone(),
                }
            } else {
                Decision::AlreadyLatest {
                    local: existing.raw.clone(),
                }
            }
        }
        Some(many) => Decision::Ambiguous {
            locals: many.iter().map(|n| n.raw.clone()).collect(),
        },
    }
}

/// Local files without a remote counterpart (`local - remote`).
///
/// Only names following the tile convention are reported, so the ledger,
/// log, unrelated files and leftover `.part` transfers are never candidates
/// for relocation.
pub fn orphans(remote: &[String], local: &BTreeSet<String>) -> Vec<String> {
    let remote: BTreeSet<&str> = remote.iter().map(String::as_str).collect();
    local
        .iter()
        .filter(|name| !remote.contains(name.as_str()))
        .filter(|name| !is_partial_name(name) && RemoteFileName::parse(name).is_ok())
        .cloned()
        .collect()
}

/// Snapshot of the regular files in `dir`.
pub fn local_inventory(dir: &Path) -> Result<BTreeSet<String>, SyncError> {
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}
