//! Verb/tense dataset and the playback queues built from it.
//!
//! The dataset is read-only once loaded. Queues are built fresh for every
//! "read all" request and carry owned copies of the verbs they reference.

use crate::cache::ClipKey;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conjugation {
    pub pronoun: String,
    pub form: String,
}

impl Conjugation {
    /// Leading pronoun of a compound label such as `Él/Ella/Ud.`.
    pub fn primary_pronoun(&self) -> &str {
        self.pronoun.split('/').next().unwrap_or_default().trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerbConjugationSet {
    pub name: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default)]
    pub is_irregular: bool,
    pub conjugations: Vec<Conjugation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenseData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub usage: String,
    pub verbs: Vec<VerbConjugationSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbCategory {
    Regular,
    Irregular,
}

impl VerbCategory {
    fn matches(self, verb: &VerbConjugationSet) -> bool {
        match self {
            VerbCategory::Regular => !verb.is_irregular,
            VerbCategory::Irregular => verb.is_irregular,
        }
    }
}

impl std::fmt::Display for VerbCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VerbCategory::Regular => "regular",
            VerbCategory::Irregular => "irregular",
        };
        write!(f, "{}", label)
    }
}

impl TenseData {
    /// Title without its parenthesised gloss, e.g. `Presente (현재 시제)` -> `Presente`.
    pub fn clean_title(&self) -> &str {
        self.title.split(" (").next().unwrap_or_default()
    }

    pub fn verbs_in(&self, category: VerbCategory) -> impl Iterator<Item = &VerbConjugationSet> {
        self.verbs.iter().filter(move |verb| category.matches(verb))
    }

    pub fn find_verb(&self, name: &str) -> Option<&VerbConjugationSet> {
        self.verbs
            .iter()
            .find(|verb| verb.name.eq_ignore_ascii_case(name))
    }
}

/// One `(tense, verb)` entry of a playback queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub tense_id: String,
    pub verb: VerbConjugationSet,
}

impl QueueItem {
    pub fn new(tense_id: impl Into<String>, verb: VerbConjugationSet) -> Self {
        Self {
            tense_id: tense_id.into(),
            verb,
        }
    }

    pub fn key(&self) -> ClipKey {
        ClipKey::new(&self.tense_id, &self.verb.name)
    }
}

pub type PlaybackQueue = Vec<QueueItem>;

/// Favorited tenses and individual `(tense, verb)` pairs.
#[derive(Debug, Clone, Default)]
pub struct Favorites {
    tenses: BTreeSet<String>,
    verbs: BTreeSet<ClipKey>,
}

impl Favorites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tense(&mut self, tense_id: &str) {
        self.tenses.insert(tense_id.to_string());
    }

    pub fn add_verb(&mut self, tense_id: &str, verb_name: &str) {
        self.verbs.insert(ClipKey::new(tense_id, verb_name));
    }

    /// Parse a `"<tense>::<verb>"` reference as written in the config file.
    pub fn add_verb_ref(&mut self, reference: &str) -> bool {
        match reference.split_once("::") {
            Some((tense, verb)) if !tense.is_empty() && !verb.is_empty() => {
                self.add_verb(tense.trim(), verb.trim());
                true
            }
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tenses.is_empty() && self.verbs.is_empty()
    }

    pub fn contains(&self, tense_id: &str, verb_name: &str) -> bool {
        self.tenses.contains(tense_id) || self.verbs.contains(&ClipKey::new(tense_id, verb_name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    tenses: Vec<TenseData>,
}

impl Dataset {
    pub fn new(tenses: Vec<TenseData>) -> Self {
        Self { tenses }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Reading verb dataset {}", path.display()))?;
        let dataset = Self::from_json(&data)
            .with_context(|| format!("Parsing verb dataset {}", path.display()))?;
        info!(
            path = %path.display(),
            tenses = dataset.tenses.len(),
            "Loaded verb dataset"
        );
        Ok(dataset)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let tenses: Vec<TenseData> = serde_json::from_str(data)?;
        Ok(Self { tenses })
    }

    pub fn tenses(&self) -> &[TenseData] {
        &self.tenses
    }

    pub fn tense(&self, id: &str) -> Option<&TenseData> {
        self.tenses.iter().find(|tense| tense.id == id)
    }

    /// Every verb of one tense.
    pub fn tense_queue(&self, tense_id: &str) -> Option<PlaybackQueue> {
        let tense = self.tense(tense_id)?;
        Some(queue_of(tense, tense.verbs.iter()))
    }

    /// Only the regular or only the irregular verbs of one tense.
    pub fn category_queue(&self, tense_id: &str, category: VerbCategory) -> Option<PlaybackQueue> {
        let tense = self.tense(tense_id)?;
        Some(queue_of(tense, tense.verbs_in(category)))
    }

    /// Every verb across the selected tenses, in dataset order.
    pub fn selection_queue(&self, selected: &[String]) -> PlaybackQueue {
        self.tenses
            .iter()
            .filter(|tense| selected.iter().any(|id| *id == tense.id))
            .flat_map(|tense| queue_of(tense, tense.verbs.iter()))
            .collect()
    }

    /// Favorited verbs and every verb of a favorited tense, across the whole dataset.
    pub fn favorites_queue(&self, favorites: &Favorites) -> PlaybackQueue {
        self.tenses
            .iter()
            .flat_map(|tense| {
                queue_of(
                    tense,
                    tense
                        .verbs
                        .iter()
                        .filter(|verb| favorites.contains(&tense.id, &verb.name)),
                )
            })
            .collect()
    }

    /// The first verb of each tense, as a quick tour of every tense.
    pub fn overview_queue(&self) -> PlaybackQueue {
        self.tenses
            .iter()
            .filter_map(|tense| {
                tense
                    .verbs
                    .first()
                    .map(|verb| QueueItem::new(&tense.id, verb.clone()))
            })
            .collect()
    }

    /// Every irregular verb across all tenses.
    pub fn irregular_queue(&self) -> PlaybackQueue {
        self.tenses
            .iter()
            .flat_map(|tense| queue_of(tense, tense.verbs_in(VerbCategory::Irregular)))
            .collect()
    }
}

fn queue_of<'a>(
    tense: &TenseData,
    verbs: impl Iterator<Item = &'a VerbConjugationSet>,
) -> PlaybackQueue {
    verbs
        .map(|verb| QueueItem::new(&tense.id, verb.clone()))
        .collect()
}
