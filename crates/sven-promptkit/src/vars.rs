// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Chat Variables Store (C3): scratch key/value storage for macros, scoped
//! to one conversation and never shared across conversations (spec §5).
//!
//! Also backs the Lore Engine's sticky/cooldown/delay counters under
//! namespaced keys (`__lore_sticky__<uid>`, etc.) so they persist across
//! Plan builds within a conversation (spec §4.2).

use std::collections::HashMap;
use std::sync::RwLock;

pub const LORE_STICKY_PREFIX: &str = "__lore_sticky__";
pub const LORE_COOLDOWN_PREFIX: &str = "__lore_cooldown__";
pub const LORE_DELAY_PREFIX: &str = "__lore_delay__";

/// Synchronous key/value contract — the pipeline is synchronous and
/// non-blocking (spec §5), so the store it reads/writes through is too.
pub trait ChatVariableStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn delete(&self, key: &str);
    fn keys(&self) -> Vec<String>;
    fn snapshot(&self) -> HashMap<String, String>;
    fn restore(&self, data: HashMap<String, String>);
}

/// Default in-memory store backing one conversation.
#[derive(Debug, Default)]
pub struct InMemoryChatVariableStore {
    inner: RwLock<HashMap<String, String>>,
}

impl InMemoryChatVariableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatVariableStore for InMemoryChatVariableStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.inner.write().unwrap().insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.inner.write().unwrap().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    fn snapshot(&self) -> HashMap<String, String> {
        self.inner.read().unwrap().clone()
    }

    fn restore(&self, data: HashMap<String, String>) {
        *self.inner.write().unwrap() = data;
    }
}
