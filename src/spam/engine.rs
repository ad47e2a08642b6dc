//! Spam rule evaluation.
//!
//! The engine works on a snapshot of the rules. Rebuild it with
//! [`SpamRuleEngine::load`] after the rule set changes.

use serde::Serialize;
use tracing::{debug, warn};

use super::types::{RuleAction, RuleType, SpamRule};
use crate::db::DualStoreMerger;
use crate::mailbox::domain_of;
use crate::Result;

/// Outcome of evaluating a message against the rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "delay_minutes", rename_all = "snake_case")]
pub enum SpamVerdict {
    /// No rule matched.
    Allow,
    /// Drop the message before storage.
    Block,
    /// Store the message and delete it after this many minutes.
    DeferredDelete(i64),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: SpamRule,
    subject: Option<String>,
    sender: Option<String>,
    verdict: SpamVerdict,
}

impl CompiledRule {
    /// Compile a rule, or `None` when it has no usable verdict. Only rows
    /// written without validation (e.g. in the historical store) can lack one.
    fn compile(rule: SpamRule) -> Option<Self> {
        let verdict = match (rule.action, rule.delay_minutes) {
            (RuleAction::Block, _) => SpamVerdict::Block,
            (RuleAction::DeferredDelete, Some(minutes)) if minutes > 0 => {
                SpamVerdict::DeferredDelete(minutes)
            }
            (RuleAction::DeferredDelete, delay) => {
                warn!(
                    "Skipping spam rule {} ({}): deferred_delete with delay {:?}",
                    rule.id, rule.name, delay
                );
                return None;
            }
        };
        Some(Self {
            subject: rule.subject_pattern.as_deref().map(str::to_lowercase),
            sender: rule.sender_pattern.as_deref().map(str::to_lowercase),
            verdict,
            rule,
        })
    }

    fn subject_matches(&self, subject: &str) -> bool {
        self.subject
            .as_deref()
            .is_some_and(|pattern| subject.contains(pattern))
    }

    fn sender_matches(&self, sender: &str) -> bool {
        let Some(pattern) = self.sender.as_deref() else {
            return false;
        };
        sender.contains(pattern) || domain_of(sender).is_some_and(|domain| domain.contains(pattern))
    }

    /// Both arguments are already lowercase.
    fn matches(&self, sender: &str, subject: &str) -> bool {
        match self.rule.rule_type {
            RuleType::Subject => self.subject_matches(subject),
            RuleType::Sender => self.sender_matches(sender),
            RuleType::Both => self.subject_matches(subject) && self.sender_matches(sender),
        }
    }
}

/// Ordered first-match spam rule evaluator.
#[derive(Debug, Clone, Default)]
pub struct SpamRuleEngine {
    rules: Vec<CompiledRule>,
}

impl SpamRuleEngine {
    /// Build an engine from rules. Disabled rules and rules without a usable
    /// verdict are dropped; the rest are ordered by creation.
    pub fn new(rules: Vec<SpamRule>) -> Self {
        let mut rules: Vec<SpamRule> = rules.into_iter().filter(|r| r.enabled).collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Self {
            rules: rules.into_iter().filter_map(CompiledRule::compile).collect(),
        }
    }

    /// Build an engine from the rules visible through the merged stores.
    pub async fn load(merger: &DualStoreMerger<'_>) -> Result<Self> {
        let rules: Vec<SpamRule> = merger.get_all().await?;
        let engine = Self::new(rules);
        debug!("Loaded {} enabled spam rules", engine.len());
        Ok(engine)
    }

    /// Number of participating rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check whether no rule participates.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The first enabled rule matching the message, if any.
    pub fn matching_rule(&self, sender: &str, subject: &str) -> Option<&SpamRule> {
        let sender = sender.to_lowercase();
        let subject = subject.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&sender, &subject))
            .map(|compiled| &compiled.rule)
    }

    /// Evaluate a message. First match wins.
    pub fn evaluate(&self, sender: &str, subject: &str) -> SpamVerdict {
        let sender = sender.to_lowercase();
        let subject = subject.to_lowercase();
        match self.rules.iter().find(|rule| rule.matches(&sender, &subject)) {
            Some(rule) => {
                debug!("Spam rule {} ({}) matched", rule.rule.id, rule.rule.name);
                rule.verdict
            }
            None => SpamVerdict::Allow,
        }
    }
}
