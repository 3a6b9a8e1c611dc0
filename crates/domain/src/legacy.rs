use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::DomainResult;
use crate::clock::Clock;
use crate::directory::{DirectoryService, PolicyTag};
use crate::merge::{ActionSnapshot, CanonicalAction};
use crate::ports::actions::ActionRepository;
use crate::ports::platform::LegacyListSource;
use crate::ports::propagation::PropagationRepository;
use crate::util::uuid_v7_without_dashes;

/// One well-formed legacy list line: a handle plus its tag markers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyEntry {
    pub handle: String,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyParseReport {
    pub entries: Vec<LegacyEntry>,
    pub skipped: usize,
}

/// Line format: `handle #tag1 #tag2 ...` (the `#` is optional). Blank lines
/// and `;`/`#`-prefixed comment lines are ignored; anything else that fails
/// handle validation is logged and skipped.
pub fn parse_legacy_list(text: &str) -> LegacyParseReport {
    let mut report = LegacyParseReport::default();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let handle = parts
            .next()
            .unwrap_or_default()
            .trim_start_matches("u/");
        if !is_valid_handle(handle) {
            warn!(line = index + 1, "skipping malformed legacy list line");
            report.skipped += 1;
            continue;
        }
        let tags: Vec<String> = parts
            .map(|part| part.trim_start_matches('#').to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();
        report.entries.push(LegacyEntry {
            handle: handle.to_lowercase(),
            tags,
        });
    }
    report
}

fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= 64
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct LegacySummary {
    pub imported: usize,
    pub already_current: usize,
    pub unmatched: usize,
    pub skipped: usize,
}

/// Replays the legacy scammer list: entries for persons with no canonical
/// action seed one, tags only, since no platform event backs them. Live
/// history always wins over the list.
pub struct LegacyListService {
    source: Arc<dyn LegacyListSource>,
    directory: DirectoryService,
    actions: Arc<dyn ActionRepository>,
    propagation: Arc<dyn PropagationRepository>,
    clock: Arc<dyn Clock>,
}

impl LegacyListService {
    pub fn new(
        source: Arc<dyn LegacyListSource>,
        directory: DirectoryService,
        actions: Arc<dyn ActionRepository>,
        propagation: Arc<dyn PropagationRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            directory,
            actions,
            propagation,
            clock,
        }
    }

    pub async fn replay(&self) -> DomainResult<LegacySummary> {
        let text = self.source.fetch().await?;
        let report = parse_legacy_list(&text);
        let known: HashMap<String, PolicyTag> = self
            .directory
            .all_tags()
            .await?
            .into_iter()
            .map(|tag| (tag.tag.clone(), tag))
            .collect();

        let mut summary = LegacySummary {
            skipped: report.skipped,
            ..LegacySummary::default()
        };
        for entry in &report.entries {
            let person = self.directory.ensure_person(&entry.handle).await?;
            if self
                .actions
                .latest_for_person(&person.person_id)
                .await?
                .is_some()
            {
                summary.already_current += 1;
                continue;
            }
            let tags: Vec<PolicyTag> = entry
                .tags
                .iter()
                .filter_map(|tag| known.get(tag).cloned())
                .collect();
            if tags.is_empty() {
                summary.unmatched += 1;
                continue;
            }
            self.actions
                .append_latest(&ActionSnapshot {
                    action: CanonicalAction {
                        action_id: uuid_v7_without_dashes(),
                        person_id: person.person_id.clone(),
                        occurred_at_ms: self.clock.now_ms(),
                        is_ban: true,
                        is_latest: true,
                    },
                    tags,
                    attachments: HashMap::new(),
                })
                .await?;
            self.propagation.mark_dirty(&person.person_id).await?;
            summary.imported += 1;
        }
        Ok(summary)
    }
}
