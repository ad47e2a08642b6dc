//! Spam rules for tempbox.
//!
//! Rules are stored like any other record and evaluated in creation order
//! by [`SpamRuleEngine`]; the first enabled match decides the verdict.

mod engine;
mod repository;
mod types;

pub use engine::{SpamRuleEngine, SpamVerdict};
pub use repository::SpamRuleRepository;
pub use types::{
    NewSpamRule, RuleAction, RuleType, SpamRule, MAX_PATTERN_LENGTH, MAX_RULE_NAME_LENGTH,
};
