// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod role;
mod schema;

pub use loader::{load, load_lore_book, load_preset};
pub use role::Role;
pub use schema::*;
