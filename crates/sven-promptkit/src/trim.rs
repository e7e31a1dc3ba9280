// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Trimmer (C8): three-phase hard eviction down to `max_input_tokens`.
//!
//! Eviction sets `enabled = false` in place rather than removing blocks, so
//! the Plan remains a faithful audit trail of what was built and what was
//! cut.

use crate::block::{Block, BudgetGroup};
use crate::estimator::TokenEstimator;

/// Mirrors the Preset knob of the same name; kept local to this crate so it
/// has no dependency on the config crate that owns the full Preset type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamplesBehavior {
    Disabled,
    GraduallyPushOut,
    Trim,
    AlwaysKeep,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TrimReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub removed_example_groups: Vec<String>,
    pub removed_lore_uids: Vec<String>,
    pub removed_history_count: usize,
    pub fits: bool,
}

fn total_tokens(blocks: &[Block], estimator: &dyn TokenEstimator, message_token_overhead: usize) -> usize {
    blocks
        .iter()
        .filter(|b| b.enabled)
        .map(|b| estimator.estimate(&b.content) + message_token_overhead)
        .sum()
}

/// Evicts blocks from `blocks` (mutated in place) until the enabled-block
/// total is within `max_input_tokens`, or there is nothing left to cut.
pub fn trim(
    blocks: &mut [Block],
    estimator: &dyn TokenEstimator,
    max_input_tokens: usize,
    message_token_overhead: usize,
    examples_behavior: ExamplesBehavior,
) -> TrimReport {
    let tokens_before = total_tokens(blocks, estimator, message_token_overhead);

    let mut report = TrimReport {
        tokens_before,
        tokens_after: tokens_before,
        removed_example_groups: Vec::new(),
        removed_lore_uids: Vec::new(),
        removed_history_count: 0,
        fits: true,
    };

    if tokens_before <= max_input_tokens {
        return report;
    }

    let budget = max_input_tokens;

    // Phase 1: examples.
    match examples_behavior {
        ExamplesBehavior::Disabled => {
            for b in blocks.iter_mut() {
                if b.token_budget_group == BudgetGroup::Examples && b.enabled {
                    if let Some(group) = b.metadata.get("example_block").and_then(|v| v.as_str()) {
                        report.removed_example_groups.push(group.to_string());
                    }
                    b.enabled = false;
                }
            }
        }
        ExamplesBehavior::GraduallyPushOut | ExamplesBehavior::Trim => {
            evict_example_groups(blocks, estimator, message_token_overhead, budget, &mut report);
        }
        ExamplesBehavior::AlwaysKeep => {}
    }

    if total_tokens(blocks, estimator, message_token_overhead) > budget {
        evict_lore(blocks, estimator, message_token_overhead, budget, &mut report);
    }

    if total_tokens(blocks, estimator, message_token_overhead) > budget {
        evict_history(blocks, estimator, message_token_overhead, budget, &mut report);
    }

    let tokens_after = total_tokens(blocks, estimator, message_token_overhead);
    report.tokens_after = tokens_after;
    report.fits = tokens_after <= budget;

    if !report.fits {
        tracing::warn!(
            tokens_after,
            max_input_tokens,
            "trimmer could not fit the plan within budget after evicting everything it is allowed to"
        );
    }

    report
}

fn evict_example_groups(
    blocks: &mut [Block],
    estimator: &dyn TokenEstimator,
    overhead: usize,
    budget: usize,
    report: &mut TrimReport,
) {
    use std::collections::HashMap;

    let mut groups: HashMap<String, (i32, i64)> = HashMap::new();
    for b in blocks.iter() {
        if b.token_budget_group == BudgetGroup::Examples && b.enabled {
            if let Some(group) = b.metadata.get("example_block").and_then(|v| v.as_str()) {
                let entry = groups.entry(group.to_string()).or_insert((b.priority, b.order));
                entry.0 = entry.0.max(b.priority);
                entry.1 = entry.1.min(b.order);
            }
        }
    }

    let mut ordered: Vec<(String, i32, i64)> = groups.into_iter().map(|(k, (p, o))| (k, p, o)).collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    for (group, _, _) in ordered {
        if total_tokens(blocks, estimator, overhead) <= budget {
            break;
        }
        for b in blocks.iter_mut() {
            if b.enabled
                && b.token_budget_group == BudgetGroup::Examples
                && b.metadata.get("example_block").and_then(|v| v.as_str()) == Some(group.as_str())
            {
                b.enabled = false;
            }
        }
        report.removed_example_groups.push(group);
    }
}

fn evict_lore(blocks: &mut [Block], estimator: &dyn TokenEstimator, overhead: usize, budget: usize, report: &mut TrimReport) {
    loop {
        if total_tokens(blocks, estimator, overhead) <= budget {
            break;
        }
        let victim_idx = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.enabled && b.token_budget_group == BudgetGroup::Lore)
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.order.cmp(&a.order)))
            .map(|(i, _)| i);

        match victim_idx {
            Some(i) => {
                blocks[i].enabled = false;
                report.removed_lore_uids.push(blocks[i].id.to_string());
            }
            None => break,
        }
    }
}

fn evict_history(blocks: &mut [Block], estimator: &dyn TokenEstimator, overhead: usize, budget: usize, report: &mut TrimReport) {
    let mut history_order: Vec<usize> = blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.enabled && b.token_budget_group == BudgetGroup::History && b.slot != "user_message")
        .map(|(i, _)| i)
        .collect();
    history_order.sort_by_key(|&i| blocks[i].order);

    for i in history_order {
        if total_tokens(blocks, estimator, overhead) <= budget {
            break;
        }
        blocks[i].enabled = false;
        report.removed_history_count += 1;
    }
}
