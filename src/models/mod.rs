// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod credential;
pub mod records;

pub use credential::StoredCredential;
pub use records::{Cycle, DomainRecord, Recovery, ResourceStream, ScoreState, Sleep, Workout};
