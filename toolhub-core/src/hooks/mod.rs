//! Conditional post-processing of successful tool results
//!
//! Rules are evaluated in priority order against each result; the first
//! matching rule invokes its composer tool through the execution core with
//! hooks disabled, so a composer's own output is never post-processed.

pub mod config;
pub mod manager;

pub use config::{ExecutionOrder, HookConfig, HookKind, HookRule, HookSettings, TriggerConditions};
pub use manager::{ComposerInvoker, HookCall, HookManager, HookOutcome};
