//! Identity resolution and merging across sources and runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use paperdigest_core::{DigestError, IdentityKey, ProcessedHistory, Source, TrustTable, Work};
use serde::Serialize;

/// Two sources disagreed on a field. The kept value came from the more
/// trusted source; nothing is lost silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeConflict {
    /// Highest-priority key across both sides of the merge.
    pub work: String,
    pub field: String,
    pub kept: String,
    pub kept_source: Source,
    pub discarded: String,
    pub discarded_source: Source,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: kept {:?} ({}) over {:?} ({})",
            self.work,
            self.field,
            self.kept,
            self.kept_source,
            self.discarded,
            self.discarded_source
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    New,
    /// Folded into an existing batch work; `collapsed` counts the batch works
    /// the record matched (more than one means the record bridged them).
    Merged { collapsed: usize },
    /// One of the record's keys was delivered in an earlier run.
    Skipped { key: IdentityKey },
}

/// Owns the processed history for the duration of a run and keeps the
/// in-batch set of distinct works.
pub struct DedupEngine {
    history: ProcessedHistory,
    trust: TrustTable,
    slots: Vec<Option<Work>>,
    index: HashMap<IdentityKey, usize>,
    conflicts: Vec<MergeConflict>,
}

impl DedupEngine {
    pub fn new(history: ProcessedHistory, trust: TrustTable) -> Self {
        Self {
            history,
            trust,
            slots: Vec::new(),
            index: HashMap::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn register(&mut self, work: Work) -> RegisterOutcome {
        let keys = work.identity_keys();

        if let Some(key) = keys.iter().find(|k| self.history.contains(k)) {
            tracing::debug!(%key, title = %work.title, "already delivered in an earlier run");
            return RegisterOutcome::Skipped { key: key.clone() };
        }

        let matched: BTreeSet<usize> = keys
            .iter()
            .filter_map(|k| self.index.get(k))
            .copied()
            .collect();

        let mut matched_slots = matched.iter().copied();
        let Some(target_slot) = matched_slots.next() else {
            let slot = self.slots.len();
            for key in keys {
                self.index.insert(key, slot);
            }
            self.slots.push(Some(work));
            return RegisterOutcome::New;
        };

        let Some(mut target) = self.slots[target_slot].take() else {
            // Index entries only ever point at live slots.
            self.slots.push(Some(work));
            return RegisterOutcome::New;
        };
        for slot in matched_slots {
            if let Some(absorbed) = self.slots[slot].take() {
                target = self.merge(target, absorbed);
            }
        }
        target = self.merge(target, work);

        for key in target.identity_keys() {
            self.index.insert(key, target_slot);
        }
        self.slots[target_slot] = Some(target);

        RegisterOutcome::Merged {
            collapsed: matched.len(),
        }
    }

    /// Persist every key of a fully enriched work. One transaction per work.
    pub fn finalize_success(&mut self, work: &Work) -> Result<usize, DigestError> {
        let title = (!work.title.is_empty()).then_some(work.title.as_str());
        self.history.append(&work.identity_keys(), title)
    }

    pub fn conflicts(&self) -> &[MergeConflict] {
        &self.conflicts
    }

    /// Surviving works in first-seen order.
    pub fn works(&self) -> impl Iterator<Item = &Work> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.works().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand the batch to the enrichment stage. Registration after this starts
    /// a fresh batch.
    pub fn take_works(&mut self) -> Vec<Work> {
        self.index.clear();
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }

    pub fn history(&self) -> &ProcessedHistory {
        &self.history
    }

    pub fn into_history(self) -> ProcessedHistory {
        self.history
    }

    fn merge(&mut self, mut target: Work, incoming: Work) -> Work {
        let mut all_keys = target.identity_keys();
        all_keys.extend(incoming.identity_keys());
        // Labelled by the merged key set so the log text is arrival-order free.
        let label = all_keys
            .iter()
            .min_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.cmp(b)))
            .map(IdentityKey::storage_key)
            .unwrap_or_default();

        let mut merger = FieldMerger {
            trust: &self.trust,
            conflicts: &mut self.conflicts,
            work: label,
        };

        let ours = field_source(&target, "title");
        let theirs = field_source(&incoming, "title");
        let picked = merger.pick(
            "title",
            non_empty(std::mem::take(&mut target.title)).zip(ours),
            non_empty(incoming.title.clone()).zip(theirs),
        );
        let mut title = None;
        assign(&mut title, &mut target.provenance, "title", picked);
        target.set_title(title.unwrap_or_default());

        let namespaces: BTreeSet<String> = target
            .external_ids
            .keys()
            .chain(incoming.external_ids.keys())
            .cloned()
            .collect();
        for namespace in namespaces {
            let ours = field_source(&target, &namespace);
            let theirs = field_source(&incoming, &namespace);
            let picked = merger.pick(
                &namespace,
                target.external_ids.remove(&namespace).zip(ours),
                incoming.external_ids.get(&namespace).cloned().zip(theirs),
            );
            let mut value = None;
            assign(&mut value, &mut target.provenance, &namespace, picked);
            if let Some(id) = value {
                target.external_ids.insert(namespace, id);
            }
        }

        macro_rules! merge_option {
            ($field:ident) => {{
                let name = stringify!($field);
                let ours = field_source(&target, name);
                let theirs = field_source(&incoming, name);
                let picked = merger.pick(
                    name,
                    target.$field.take().zip(ours),
                    incoming.$field.clone().zip(theirs),
                );
                assign(&mut target.$field, &mut target.provenance, name, picked);
            }};
        }
        merge_option!(doi);
        merge_option!(journal);
        merge_option!(publication_date);
        merge_option!(abstract_text);
        merge_option!(url);
        merge_option!(pdf_url);

        let ours = field_source(&target, "authors");
        let theirs = field_source(&incoming, "authors");
        let picked = merger.pick(
            "authors",
            non_empty_vec(std::mem::take(&mut target.authors)).zip(ours),
            non_empty_vec(incoming.authors.clone()).zip(theirs),
        );
        let mut authors = None;
        assign(&mut authors, &mut target.provenance, "authors", picked);
        target.authors = authors.unwrap_or_default();

        target.open_access |= incoming.open_access;
        target.source_origin.extend(incoming.source_origin);
        for (kind, artifact) in incoming.content {
            let slot = target.content.entry(kind).or_insert(None);
            if slot.is_none() {
                *slot = artifact;
            }
        }

        let own = target.own_keys();
        target.merged_keys = all_keys.difference(&own).cloned().collect();
        target
    }
}

struct FieldMerger<'a> {
    trust: &'a TrustTable,
    conflicts: &'a mut Vec<MergeConflict>,
    work: String,
}

impl FieldMerger<'_> {
    /// Choose between two sourced values. Present beats absent; otherwise the
    /// more trusted source wins and the loser is logged as a conflict.
    fn pick<T>(
        &mut self,
        field: &str,
        ours: Option<(T, Source)>,
        theirs: Option<(T, Source)>,
    ) -> Option<(T, Source)>
    where
        T: PartialEq + Render,
    {
        match (ours, theirs) {
            (None, other) | (other, None) => other,
            (Some((a, sa)), Some((b, sb))) => {
                let theirs_wins = self.trust.prefers(&sb, &sa);
                if a == b {
                    return Some(if theirs_wins { (b, sb) } else { (a, sa) });
                }
                let ((kept, kept_src), (lost, lost_src)) = if theirs_wins {
                    ((b, sb), (a, sa))
                } else {
                    ((a, sa), (b, sb))
                };
                let conflict = MergeConflict {
                    work: self.work.clone(),
                    field: field.to_string(),
                    kept: kept.render(),
                    kept_source: kept_src.clone(),
                    discarded: lost.render(),
                    discarded_source: lost_src,
                };
                tracing::debug!(%conflict, "merge conflict");
                self.conflicts.push(conflict);
                Some((kept, kept_src))
            }
        }
    }
}

trait Render {
    fn render(&self) -> String;
}

impl Render for String {
    fn render(&self) -> String {
        self.clone()
    }
}

impl Render for chrono::NaiveDate {
    fn render(&self) -> String {
        self.to_string()
    }
}

impl Render for Vec<String> {
    fn render(&self) -> String {
        self.join("; ")
    }
}

/// Source that supplied `field`, falling back to the work's first origin.
fn field_source(work: &Work, field: &str) -> Option<Source> {
    work.provenance
        .get(field)
        .or_else(|| work.source_origin.iter().next())
        .cloned()
}

fn assign<T>(
    slot: &mut Option<T>,
    provenance: &mut BTreeMap<String, Source>,
    field: &str,
    picked: Option<(T, Source)>,
) {
    match picked {
        Some((value, source)) => {
            *slot = Some(value);
            provenance.insert(field.to_string(), source);
        }
        None => {
            *slot = None;
            provenance.remove(field);
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn non_empty_vec(v: Vec<String>) -> Option<Vec<String>> {
    (!v.is_empty()).then_some(v)
}
