// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Macro Engine (C2): expands `{{name}}`, `{{name::arg1::arg2}}`, and (v2
//! only) conditional `{{if cond}}...{{/if}}` tokens against a variable
//! environment.
//!
//! The conditional grammar is an open question in the source spec
//! (implementers are told to document the subset they support rather than
//! guess). The subset implemented here is: `{{if VAR}}...{{/if}}` and
//! `{{if VAR}}...{{else}}...{{/if}}`, where `VAR` is truthy iff it resolves
//! to a non-empty string other than the literal `"false"`. Nested
//! conditionals are not supported; a nested `{{if}}` is left verbatim and
//! produces a warning rather than being guessed at.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::error::Warning;

/// Maximum number of literal-substitution passes before giving up — guards
/// the cycle case where a macro's expansion introduces another macro token.
const MAX_PASSES: usize = 10;

/// A registered macro value: a literal string, a lazily-invoked zero-arg
/// producer, or a producer that receives `::`-separated arguments.
pub enum MacroValue {
    Static(String),
    Producer(Arc<dyn Fn() -> String + Send + Sync>),
    Parameterized(Arc<dyn Fn(&[String]) -> String + Send + Sync>),
}

impl std::fmt::Debug for MacroValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroValue::Static(s) => f.debug_tuple("Static").field(s).finish(),
            MacroValue::Producer(_) => f.write_str("Producer(..)"),
            MacroValue::Parameterized(_) => f.write_str("Parameterized(..)"),
        }
    }
}

impl Clone for MacroValue {
    fn clone(&self) -> Self {
        match self {
            MacroValue::Static(s) => MacroValue::Static(s.clone()),
            MacroValue::Producer(f) => MacroValue::Producer(f.clone()),
            MacroValue::Parameterized(f) => MacroValue::Parameterized(f.clone()),
        }
    }
}

/// Registered identifier → value mapping. Identifiers are matched
/// case-insensitively; keys are normalized to lowercase on insert and
/// lookup.
#[derive(Debug, Clone, Default)]
pub struct MacroEnv {
    values: HashMap<String, MacroValue>,
}

impl MacroEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_static(&mut self, name: &str, value: impl Into<String>) {
        self.values
            .insert(name.to_lowercase(), MacroValue::Static(value.into()));
    }

    pub fn set_producer<F>(&mut self, name: &str, producer: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.values
            .insert(name.to_lowercase(), MacroValue::Producer(Arc::new(producer)));
    }

    pub fn set_parameterized<F>(&mut self, name: &str, producer: F)
    where
        F: Fn(&[String]) -> String + Send + Sync + 'static,
    {
        self.values.insert(
            name.to_lowercase(),
            MacroValue::Parameterized(Arc::new(producer)),
        );
    }

    fn resolve(&self, name: &str, args: &[String]) -> Option<String> {
        match self.values.get(name)? {
            MacroValue::Static(s) => Some(s.clone()),
            MacroValue::Producer(f) => Some(f()),
            MacroValue::Parameterized(f) => Some(f(args)),
        }
    }

    fn is_truthy(&self, name: &str) -> bool {
        match self.resolve(&name.to_lowercase(), &[]) {
            Some(v) => !v.is_empty() && v.to_lowercase() != "false",
            None => false,
        }
    }
}

/// The two macro-grammar variants. `V1` skips conditional expansion
/// entirely; `V2` additionally supports the documented `{{if}}` subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroEngine {
    V1,
    V2,
}

impl MacroEngine {
    /// Expand `text` against `env`. `allow_outlets` gates `{{outlet.KEY}}`
    /// resolution against the Plan's outlet map; when `false` every outlet
    /// token resolves to the empty string regardless of `outlets`' contents.
    pub fn expand(
        &self,
        text: &str,
        env: &MacroEnv,
        allow_outlets: bool,
        outlets: &HashMap<String, String>,
    ) -> (String, Vec<Warning>) {
        let mut warnings = Vec::new();
        let mut current = if *self == MacroEngine::V2 {
            expand_conditionals(text, env, &mut warnings)
        } else {
            text.to_string()
        };

        for _ in 0..MAX_PASSES {
            let next = substitute_once(&current, env, allow_outlets, outlets);
            if next == current {
                break;
            }
            current = next;
        }

        (current, warnings)
    }
}

fn expand_conditionals(text: &str, env: &MacroEnv, warnings: &mut Vec<Warning>) -> String {
    let re_if_else =
        Regex::new(r"(?s)\{\{if\s+([A-Za-z0-9_]+)\}\}(.*?)\{\{else\}\}(.*?)\{\{/if\}\}").unwrap();
    let stage1 = re_if_else
        .replace_all(text, |caps: &regex::Captures| {
            let var = &caps[1];
            let then_branch = &caps[2];
            let else_branch = &caps[3];
            if then_branch.contains("{{if ") || else_branch.contains("{{if ") {
                warnings.push(Warning::new(
                    "nested_conditional_unsupported",
                    format!("nested {{{{if}}}} inside {{{{if {var}}}}} left verbatim"),
                ));
                caps[0].to_string()
            } else if env.is_truthy(var) {
                then_branch.to_string()
            } else {
                else_branch.to_string()
            }
        })
        .into_owned();

    let re_if = Regex::new(r"(?s)\{\{if\s+([A-Za-z0-9_]+)\}\}(.*?)\{\{/if\}\}").unwrap();
    re_if
        .replace_all(&stage1, |caps: &regex::Captures| {
            let var = &caps[1];
            let body = &caps[2];
            if body.contains("{{if ") {
                warnings.push(Warning::new(
                    "nested_conditional_unsupported",
                    format!("nested {{{{if}}}} inside {{{{if {var}}}}} left verbatim"),
                ));
                caps[0].to_string()
            } else if env.is_truthy(var) {
                body.to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn substitute_once(
    text: &str,
    env: &MacroEnv,
    allow_outlets: bool,
    outlets: &HashMap<String, String>,
) -> String {
    let re = Regex::new(r"\{\{([^{}]+)\}\}").unwrap();
    re.replace_all(text, |caps: &regex::Captures| {
        let token = caps[1].trim();
        let lower = token.to_lowercase();

        if let Some(key) = token.strip_prefix("outlet.").or_else(|| {
            if lower.starts_with("outlet.") {
                Some(&token[7..])
            } else {
                None
            }
        }) {
            return if allow_outlets {
                outlets.get(key).cloned().unwrap_or_default()
            } else {
                String::new()
            };
        }

        let mut parts = token.split("::");
        let name = parts.next().unwrap_or("").to_lowercase();
        let args: Vec<String> = parts.map(|s| s.to_string()).collect();

        match env.resolve(&name, &args) {
            Some(value) => value,
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}
