// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Lore Engine (C4): scans recent messages for keyword-triggered World Info
//! entries, activates them under constant/forced/keyword/character-scope/
//! sticky-cooldown-delay/probability rules, and selects a budget-bounded
//! subset bucketed by insertion position.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::block::Role;
use crate::error::{LoreError, Warning};
use crate::estimator::TokenEstimator;
use crate::vars::{ChatVariableStore, LORE_COOLDOWN_PREFIX, LORE_DELAY_PREFIX, LORE_STICKY_PREFIX};

/// Where an activated entry is inserted in the final Plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LorePosition {
    BeforeCharDefs,
    AfterCharDefs,
    TopOfAn,
    BottomOfAn,
    BeforeExampleMessages,
    AfterExampleMessages,
    AtDepth,
}

/// Combination rule between an entry's primary and secondary key sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoreLogic {
    AndAny,
    AndAll,
    NotAny,
    NotAll,
}

/// Precedence order used when collapsing books that share a canonical
/// signature: higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoreSource {
    Character,
    Persona,
    Chat,
    Global,
}

impl LoreSource {
    fn precedence(self) -> u8 {
        match self {
            LoreSource::Character => 0,
            LoreSource::Persona => 1,
            LoreSource::Chat => 2,
            LoreSource::Global => 3,
        }
    }
}

/// Character-sourced entries can be interleaved with global/chat/persona
/// entries under the shared sort key, or sorted strictly after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterLoreStrategy {
    #[default]
    Interleaved,
    CharacterLast,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoreEntry {
    pub uid: String,
    pub book_name: String,
    pub source: LoreSource,
    pub primary_keys: Vec<String>,
    pub secondary_keys: Vec<String>,
    pub logic: LoreLogic,
    pub constant: bool,
    pub depth: u32,
    pub scan_depth_override: Option<u32>,
    pub position: LorePosition,
    pub role: Role,
    pub insertion_order: i64,
    pub probability: f64,
    pub sticky: Option<u32>,
    pub cooldown: Option<u32>,
    pub delay: Option<u32>,
    pub content: String,
    pub case_sensitive: bool,
    pub whole_word: bool,
    pub character_filter: Option<Vec<String>>,
    pub outlet: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoreBook {
    pub name: String,
    pub scan_depth: u32,
    pub token_budget: u32,
    pub recursive_scanning: bool,
    pub source: LoreSource,
    pub entries: Vec<LoreEntry>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoreDrop {
    pub uid: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LoreResult {
    pub selected_by_position: BTreeMap<LorePosition, Vec<LoreEntry>>,
    pub outlets: HashMap<String, String>,
    pub dropped: Vec<LoreDrop>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    pub identity: HashMap<String, String>,
    pub character_fields: HashMap<String, String>,
    pub active_character_name: Option<String>,
}

pub struct LoreEngineInput<'a> {
    pub books: Vec<LoreBook>,
    /// Tail of recent messages, most recent first.
    pub scan_messages: Vec<String>,
    pub scan_context: ScanContext,
    pub scan_injects: Vec<String>,
    pub token_budget: usize,
    pub min_activations: usize,
    pub min_activations_depth_max: usize,
    pub character_lore_insertion_strategy: CharacterLoreStrategy,
    pub forced_activations: Vec<String>,
    pub estimator: &'a dyn TokenEstimator,
    pub vars: &'a dyn ChatVariableStore,
    pub rng: &'a mut StdRng,
}

const MAX_RECURSION_PASSES: usize = 5;

/// Canonical signature of a book used for dedup: SHA-256 of a deep-sorted,
/// stable-JSON rendering of its entries, ignoring per-entry `source`/
/// `book_name` (those vary across otherwise-identical copies of a book).
pub fn canonical_signature(book: &LoreBook) -> Result<String, LoreError> {
    let mut entries: Vec<&LoreEntry> = book.entries.iter().collect();
    entries.sort_by(|a, b| a.uid.cmp(&b.uid).then(a.insertion_order.cmp(&b.insertion_order)));

    let rendered: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "uid": e.uid,
                "primary_keys": e.primary_keys,
                "secondary_keys": e.secondary_keys,
                "logic": e.logic,
                "constant": e.constant,
                "depth": e.depth,
                "position": e.position,
                "role": e.role,
                "insertion_order": e.insertion_order,
                "probability": e.probability,
                "sticky": e.sticky,
                "cooldown": e.cooldown,
                "delay": e.delay,
                "content": e.content,
            })
        })
        .collect();

    let text = serde_json::to_string(&rendered).map_err(|e| LoreError::Signature {
        book: book.name.clone(),
        message: e.to_string(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn dedup_books(books: Vec<LoreBook>, warnings: &mut Vec<Warning>) -> Vec<LoreBook> {
    let mut by_signature: HashMap<String, LoreBook> = HashMap::new();
    for book in books {
        match canonical_signature(&book) {
            Ok(sig) => match by_signature.get(&sig) {
                Some(existing) if existing.source.precedence() >= book.source.precedence() => {}
                _ => {
                    by_signature.insert(sig, book);
                }
            },
            Err(e) => warnings.push(Warning::new("lore_signature_failed", e.to_string())),
        }
    }
    by_signature.into_values().collect()
}

fn text_contains_key(haystack: &str, key: &str, case_sensitive: bool, whole_word: bool) -> bool {
    if key.is_empty() {
        return false;
    }
    let (h, k) = if case_sensitive {
        (haystack.to_string(), key.to_string())
    } else {
        (haystack.to_lowercase(), key.to_lowercase())
    };
    if whole_word {
        h.split(|c: char| !c.is_alphanumeric()).any(|w| w == k)
    } else {
        h.contains(&k)
    }
}

fn any_key_matches(haystack: &str, keys: &[String], case_sensitive: bool, whole_word: bool) -> bool {
    keys.iter().any(|k| text_contains_key(haystack, k, case_sensitive, whole_word))
}

fn keys_activate(entry: &LoreEntry, haystack: &str) -> bool {
    if entry.primary_keys.is_empty() {
        return false;
    }
    let primary_hit = any_key_matches(haystack, &entry.primary_keys, entry.case_sensitive, entry.whole_word);
    if !primary_hit {
        return false;
    }
    if entry.secondary_keys.is_empty() {
        return true;
    }
    let secondary_any = any_key_matches(haystack, &entry.secondary_keys, entry.case_sensitive, entry.whole_word);
    let secondary_all = entry
        .secondary_keys
        .iter()
        .all(|k| text_contains_key(haystack, k, entry.case_sensitive, entry.whole_word));
    match entry.logic {
        LoreLogic::AndAny => secondary_any,
        LoreLogic::AndAll => secondary_all,
        LoreLogic::NotAny => !secondary_any,
        LoreLogic::NotAll => !secondary_all,
    }
}

fn character_scope_matches(entry: &LoreEntry, ctx: &ScanContext) -> bool {
    match &entry.character_filter {
        None => false,
        Some(filter) => match &ctx.active_character_name {
            Some(name) => filter.iter().any(|f| f == name),
            None => false,
        },
    }
}

fn build_window(entry: &LoreEntry, book: &LoreBook, scan_messages: &[String]) -> String {
    let depth = entry.scan_depth_override.unwrap_or(book.scan_depth) as usize;
    let window = &scan_messages[..depth.min(scan_messages.len())];
    window.join("\n")
}

/// Sticky/cooldown/delay gate, applied on top of (or instead of) keyword
/// activation. Returns `(forced_active_by_sticky, suppressed)`.
fn lifecycle_gate(entry: &LoreEntry, vars: &dyn ChatVariableStore) -> (bool, bool) {
    let sticky_key = format!("{LORE_STICKY_PREFIX}{}", entry.uid);
    let cooldown_key = format!("{LORE_COOLDOWN_PREFIX}{}", entry.uid);
    let delay_key = format!("{LORE_DELAY_PREFIX}{}", entry.uid);

    if let Some(n) = vars.get(&sticky_key).and_then(|s| s.parse::<u32>().ok()) {
        if n > 0 {
            let remaining = n - 1;
            if remaining == 0 {
                vars.delete(&sticky_key);
                if let Some(cooldown) = entry.cooldown {
                    vars.set(&cooldown_key, cooldown.to_string());
                }
            } else {
                vars.set(&sticky_key, remaining.to_string());
            }
            return (true, false);
        }
    }

    if let Some(n) = vars.get(&cooldown_key).and_then(|s| s.parse::<u32>().ok()) {
        if n > 0 {
            let remaining = n - 1;
            if remaining == 0 {
                vars.delete(&cooldown_key);
            } else {
                vars.set(&cooldown_key, remaining.to_string());
            }
            return (false, true);
        }
    }

    if entry.delay.is_some() {
        let existing = vars.get(&delay_key).and_then(|s| s.parse::<u32>().ok());
        let remaining = existing.unwrap_or_else(|| entry.delay.unwrap());
        if remaining > 0 {
            let next = remaining - 1;
            if next == 0 {
                vars.delete(&delay_key);
            } else {
                vars.set(&delay_key, next.to_string());
            }
            return (false, true);
        }
    }

    (false, false)
}

fn start_sticky_if_configured(entry: &LoreEntry, vars: &dyn ChatVariableStore) {
    if let Some(n) = entry.sticky {
        let key = format!("{LORE_STICKY_PREFIX}{}", entry.uid);
        if vars.get(&key).is_none() && n > 0 {
            vars.set(&key, n.to_string());
        }
    }
}

struct Candidate<'a> {
    book: &'a LoreBook,
    entry: &'a LoreEntry,
}

fn evaluate_pass<'a>(
    books: &'a [LoreBook],
    base_haystack: &str,
    extra_haystack: &str,
    forced: &[String],
    ctx: &ScanContext,
    vars: &dyn ChatVariableStore,
    rng: &mut StdRng,
    already_active: &std::collections::HashSet<String>,
    gated: &mut HashMap<String, (bool, bool)>,
) -> Vec<Candidate<'a>> {
    let mut activated = Vec::new();
    for book in books {
        for entry in &book.entries {
            if already_active.contains(&entry.uid) {
                continue;
            }

            // Sticky/cooldown/delay counters advance once per `run()`, not
            // once per recursion pass; cache the gate result per uid.
            let (sticky_forced, suppressed) = *gated
                .entry(entry.uid.clone())
                .or_insert_with(|| lifecycle_gate(entry, vars));
            if suppressed {
                continue;
            }

            let mut active = entry.constant || forced.contains(&entry.uid) || sticky_forced;

            if !active {
                let window = build_window(entry, book, &base_haystack.lines().map(str::to_string).collect::<Vec<_>>());
                let haystack = format!("{window}\n{extra_haystack}");
                active = keys_activate(entry, &haystack) || character_scope_matches(entry, ctx);
            }

            if active && !entry.constant && !forced.contains(&entry.uid) && !sticky_forced {
                if entry.probability < 100.0 {
                    let roll: f64 = rng.gen_range(0.0..100.0);
                    if roll >= entry.probability {
                        active = false;
                    }
                }
            }

            if active {
                start_sticky_if_configured(entry, vars);
                activated.push(Candidate { book, entry });
            }
        }
    }
    activated
}

/// Runs the full activation → recursion → min-activations backfill →
/// budget-selection pipeline described for the Lore Engine.
pub fn run(input: LoreEngineInput<'_>) -> (LoreResult, Vec<Warning>) {
    let mut warnings = Vec::new();
    let books = dedup_books(input.books, &mut warnings);

    let base_haystack = input.scan_messages.join("\n");
    let mut extra_haystack = input.scan_injects.join("\n");
    extra_haystack.push('\n');
    extra_haystack.push_str(&input.scan_context.identity.values().cloned().collect::<Vec<_>>().join("\n"));
    extra_haystack.push('\n');
    extra_haystack.push_str(&input.scan_context.character_fields.values().cloned().collect::<Vec<_>>().join("\n"));

    let mut active_uids: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut activated: Vec<(String, String)> = Vec::new(); // (uid, book name) preserved order of first activation

    let rng = input.rng;
    let mut recursion_extra = extra_haystack.clone();
    let mut gated: HashMap<String, (bool, bool)> = HashMap::new();

    for _ in 0..MAX_RECURSION_PASSES {
        let pass = evaluate_pass(
            &books,
            &base_haystack,
            &recursion_extra,
            &input.forced_activations,
            &input.scan_context,
            input.vars,
            rng,
            &active_uids,
            &mut gated,
        );
        if pass.is_empty() {
            break;
        }

        let mut grew = false;
        for c in &pass {
            if active_uids.insert(c.entry.uid.clone()) {
                activated.push((c.entry.uid.clone(), c.book.name.clone()));
                grew = true;
                if c.book.recursive_scanning {
                    recursion_extra.push('\n');
                    recursion_extra.push_str(&c.entry.content);
                }
            }
        }
        if !grew {
            break;
        }
    }

    // Min-activations backfill.
    if activated.len() < input.min_activations && input.scan_messages.len() <= input.min_activations_depth_max {
        let mut candidates: Vec<&LoreEntry> = books
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|e| !active_uids.contains(&e.uid))
            .collect();
        candidates.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.insertion_order.cmp(&b.insertion_order))
        });
        for e in candidates {
            if activated.len() >= input.min_activations {
                break;
            }
            if active_uids.insert(e.uid.clone()) {
                activated.push((e.uid.clone(), e.book_name.clone()));
            }
        }
    }

    let mut entries: Vec<LoreEntry> = books
        .iter()
        .flat_map(|b| b.entries.iter())
        .filter(|e| active_uids.contains(&e.uid))
        .cloned()
        .collect();

    let sort_key = |e: &LoreEntry| (!e.constant, e.insertion_order, e.uid.clone());
    match input.character_lore_insertion_strategy {
        CharacterLoreStrategy::Interleaved => {
            entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        }
        CharacterLoreStrategy::CharacterLast => {
            entries.sort_by(|a, b| {
                let a_char = a.source == LoreSource::Character;
                let b_char = b.source == LoreSource::Character;
                a_char.cmp(&b_char).then_with(|| sort_key(a).cmp(&sort_key(b)))
            });
        }
    }

    let mut cumulative = 0usize;
    let mut selected: Vec<LoreEntry> = Vec::new();
    let mut dropped = Vec::new();
    for entry in entries {
        let cost = input.estimator.estimate(&entry.content);
        if cumulative + cost <= input.token_budget {
            cumulative += cost;
            selected.push(entry);
        } else {
            dropped.push(LoreDrop {
                uid: entry.uid,
                reason: "budget_exceeded".to_string(),
            });
        }
    }

    let mut outlets: HashMap<String, String> = HashMap::new();
    for entry in &selected {
        if let Some(outlet) = &entry.outlet {
            outlets
                .entry(outlet.clone())
                .and_modify(|v| {
                    v.push('\n');
                    v.push_str(&entry.content);
                })
                .or_insert_with(|| entry.content.clone());
        }
    }

    let mut selected_by_position: BTreeMap<LorePosition, Vec<LoreEntry>> = BTreeMap::new();
    for entry in selected {
        selected_by_position.entry(entry.position).or_default().push(entry);
    }

    tracing::debug!(
        activated = active_uids.len(),
        dropped = dropped.len(),
        "lore engine: activation pass complete"
    );

    (
        LoreResult {
            selected_by_position,
            outlets,
            dropped,
        },
        warnings,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::CharsPerTokenEstimator;
    use crate::vars::InMemoryChatVariableStore;
    use rand::SeedableRng;

    fn entry(uid: &str, keys: &[&str], content: &str) -> LoreEntry {
        LoreEntry {
            uid: uid.to_string(),
            book_name: "book".to_string(),
            source: LoreSource::Global,
            primary_keys: keys.iter().map(|s| s.to_string()).collect(),
            secondary_keys: vec![],
            logic: LoreLogic::AndAny,
            constant: false,
            depth: 0,
            scan_depth_override: None,
            position: LorePosition::AfterCharDefs,
            role: Role::System,
            insertion_order: 0,
            probability: 100.0,
            sticky: None,
            cooldown: None,
            delay: None,
            content: content.to_string(),
            case_sensitive: false,
            whole_word: false,
            character_filter: None,
            outlet: None,
        }
    }

    fn book(entries: Vec<LoreEntry>) -> LoreBook {
        LoreBook {
            name: "book".to_string(),
            scan_depth: 5,
            token_budget: 1000,
            recursive_scanning: false,
            source: LoreSource::Global,
            entries,
        }
    }

    fn base_input<'a>(
        books: Vec<LoreBook>,
        estimator: &'a dyn TokenEstimator,
        vars: &'a dyn ChatVariableStore,
        rng: &'a mut StdRng,
    ) -> LoreEngineInput<'a> {
        LoreEngineInput {
            books,
            scan_messages: vec!["the dragon appears".to_string()],
            scan_context: ScanContext::default(),
            scan_injects: vec![],
            token_budget: 10_000,
            min_activations: 0,
            min_activations_depth_max: 0,
            character_lore_insertion_strategy: CharacterLoreStrategy::Interleaved,
            forced_activations: vec![],
            estimator,
            vars,
            rng,
        }
    }

    #[test]
    fn keyword_match_activates_entry() {
        let e = entry("e1", &["dragon"], "A dragon lore entry.");
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let input = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 1);
    }

    #[test]
    fn non_matching_entry_is_not_activated() {
        let e = entry("e1", &["kraken"], "A kraken lore entry.");
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let input = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 0);
    }

    #[test]
    fn constant_entry_always_activates() {
        let mut e = entry("e1", &[], "always present");
        e.constant = true;
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let input = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 1);
    }

    #[test]
    fn forced_activation_by_uid() {
        let e = entry("forced-1", &["nonmatching"], "forced content");
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        input.forced_activations.push("forced-1".to_string());
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 1);
    }

    #[test]
    fn and_all_logic_requires_all_secondary_keys() {
        let mut e = entry("e1", &["dragon"], "content");
        e.logic = LoreLogic::AndAll;
        e.secondary_keys = vec!["fire".to_string(), "scales".to_string()];
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        input.scan_messages = vec!["the dragon breathes fire".to_string()];
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 0, "missing 'scales' should block AND_ALL");
    }

    #[test]
    fn not_any_logic_blocks_on_secondary_match() {
        let mut e = entry("e1", &["dragon"], "content");
        e.logic = LoreLogic::NotAny;
        e.secondary_keys = vec!["friendly".to_string()];
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        input.scan_messages = vec!["a friendly dragon".to_string()];
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 0);
    }

    #[test]
    fn budget_selection_drops_entries_exceeding_budget() {
        let e1 = entry("e1", &["dragon"], &"x".repeat(40));
        let e2 = entry("e2", &["dragon"], &"y".repeat(40));
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = base_input(vec![book(vec![e1, e2])], &estimator, &vars, &mut rng);
        input.token_budget = 10;
        let (result, _) = run(input);
        let total_selected: usize = result.selected_by_position.values().flatten().count();
        assert!(total_selected < 2);
        assert!(!result.dropped.is_empty());
        assert_eq!(result.dropped[0].reason, "budget_exceeded");
    }

    #[test]
    fn outlets_collect_matching_entry_content() {
        let mut e = entry("e1", &["dragon"], "dragon lore");
        e.outlet = Some("lore_outlet".to_string());
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let input = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        assert_eq!(result.outlets.get("lore_outlet"), Some(&"dragon lore".to_string()));
    }

    #[test]
    fn min_activations_backfill_meets_floor() {
        let e1 = entry("e1", &["nonmatching1"], "a");
        let e2 = entry("e2", &["nonmatching2"], "b");
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = base_input(vec![book(vec![e1, e2])], &estimator, &vars, &mut rng);
        input.min_activations = 1;
        input.min_activations_depth_max = 10;
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 1);
    }

    #[test]
    fn dedup_keeps_higher_precedence_source() {
        let e = entry("e1", &["dragon"], "global content");
        let mut global_book = book(vec![e.clone()]);
        global_book.source = LoreSource::Global;
        let mut char_book = book(vec![e]);
        char_book.source = LoreSource::Character;

        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let input = base_input(vec![global_book, char_book], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        let selected: Vec<&LoreEntry> = result.selected_by_position.values().flatten().collect();
        assert_eq!(selected.len(), 1, "identical books should dedup to one entry");
        assert_eq!(selected[0].source, LoreSource::Global);
    }

    #[test]
    fn character_last_strategy_sorts_character_entries_after_others() {
        let mut char_entry = entry("c1", &[], "char content");
        char_entry.constant = true;
        char_entry.source = LoreSource::Character;
        char_entry.insertion_order = -100;

        let mut global_entry = entry("g1", &[], "global content");
        global_entry.constant = true;
        global_entry.insertion_order = 100;

        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = base_input(vec![book(vec![char_entry, global_entry])], &estimator, &vars, &mut rng);
        input.character_lore_insertion_strategy = CharacterLoreStrategy::CharacterLast;
        let (result, _) = run(input);
        let selected: Vec<&LoreEntry> = result.selected_by_position.values().flatten().collect();
        assert_eq!(selected.last().unwrap().source, LoreSource::Character);
    }

    #[test]
    fn recursive_scanning_activates_via_chained_content() {
        let mut first = entry("e1", &["dragon"], "a wizard guards the dragon");
        first.constant = false;
        let second = entry("e2", &["wizard"], "wizard lore");

        let mut b = book(vec![first, second]);
        b.recursive_scanning = true;

        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let input = base_input(vec![b], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 2, "second entry should activate via first entry's content");
    }

    #[test]
    fn sticky_counter_keeps_entry_active_without_keyword() {
        let mut e = entry("e1", &["dragon"], "content");
        e.sticky = Some(2);
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        // First call activates normally and starts the sticky counter.
        let input = base_input(vec![book(vec![e.clone()])], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 1);

        // Second call: no keyword match, but sticky should keep it active.
        let mut input2 = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        input2.scan_messages = vec!["unrelated text".to_string()];
        let (result2, _) = run(input2);
        assert_eq!(result2.selected_by_position.values().flatten().count(), 1);
    }

    #[test]
    fn cooldown_suppresses_reactivation_after_sticky_expires() {
        let mut e = entry("e1", &["dragon"], "content");
        e.sticky = Some(1);
        e.cooldown = Some(1);
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        // Activates and starts sticky(1).
        let input = base_input(vec![book(vec![e.clone()])], &estimator, &vars, &mut rng);
        let _ = run(input);

        // Sticky counter expires to 0 here, starting cooldown(1).
        let mut input2 = base_input(vec![book(vec![e.clone()])], &estimator, &vars, &mut rng);
        input2.scan_messages = vec!["dragon again".to_string()];
        let (result2, _) = run(input2);
        assert_eq!(result2.selected_by_position.values().flatten().count(), 0, "cooldown should suppress reactivation");

        // Cooldown has now expired; keyword match activates again.
        let mut input3 = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        input3.scan_messages = vec!["dragon once more".to_string()];
        let (result3, _) = run(input3);
        assert_eq!(result3.selected_by_position.values().flatten().count(), 1);
    }

    #[test]
    fn delay_blocks_activation_until_counter_expires() {
        let mut e = entry("e1", &["dragon"], "content");
        e.delay = Some(1);
        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let input = base_input(vec![book(vec![e.clone()])], &estimator, &vars, &mut rng);
        let (result, _) = run(input);
        assert_eq!(result.selected_by_position.values().flatten().count(), 0, "delay(1) blocks the first call");

        let input2 = base_input(vec![book(vec![e])], &estimator, &vars, &mut rng);
        let (result2, _) = run(input2);
        assert_eq!(result2.selected_by_position.values().flatten().count(), 1, "delay counter should have expired");
    }

    #[test]
    fn delay_counter_decrements_once_per_run_even_across_recursion_passes() {
        let trigger = entry("trigger", &["dragon"], "a dragon appears");
        let mut blocked = entry("blocked", &[], "content");
        blocked.delay = Some(3);

        let estimator = CharsPerTokenEstimator::default();
        let vars = InMemoryChatVariableStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let input = base_input(vec![book(vec![trigger, blocked])], &estimator, &vars, &mut rng);
        let (result, _) = run(input);

        assert_eq!(result.selected_by_position.values().flatten().count(), 1, "only the keyword match activates");
        let delay_key = format!("{LORE_DELAY_PREFIX}blocked");
        assert_eq!(vars.get(&delay_key).as_deref(), Some("2"), "the second recursion pass must not re-decrement an entry already gated this run");
    }

    #[test]
    fn canonical_signature_ignores_source_and_book_name() {
        let e = entry("e1", &["x"], "y");
        let mut a = book(vec![e.clone()]);
        a.name = "book-a".to_string();
        a.source = LoreSource::Global;
        let mut b = book(vec![e]);
        b.name = "book-b".to_string();
        b.source = LoreSource::Character;
        assert_eq!(canonical_signature(&a).unwrap(), canonical_signature(&b).unwrap());
    }
}
