//! Keyword rules engine: picks the reply for an inbound message.
//!
//! Rules are filtered by `enabled` and message kind, ordered by priority
//! (highest first, declaration order breaks ties) and evaluated until the
//! first match. No match means "defer to the default/AI reply".

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::types::{Message, MessageType};

/// How a keyword is compared with the message text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    StartsWith,
    EndsWith,
    Regex,
}

/// How multiple keywords combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLogic {
    And,
    #[default]
    Or,
}

/// A single auto-reply rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub match_logic: MatchLogic,
    #[serde(default = "MessageType::all")]
    pub applicable_message_types: Vec<MessageType>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Literal reply. Empty means the reply is generated.
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub use_ai: bool,
    /// Lead tool sent after the reply when this rule fires.
    #[serde(default)]
    pub lead_tool: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Where the reply text of a matched rule comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySource<'a> {
    Literal(&'a str),
    Generated,
}

impl Rule {
    /// Convenience constructor with permissive defaults.
    pub fn new(id: impl Into<String>, priority: i32, keywords: &[&str]) -> Self {
        Self {
            id: id.into(),
            priority,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            match_type: MatchType::default(),
            match_logic: MatchLogic::default(),
            applicable_message_types: MessageType::all(),
            enabled: true,
            response: String::new(),
            use_ai: false,
            lead_tool: None,
        }
    }

    pub fn with_match(mut self, match_type: MatchType, logic: MatchLogic) -> Self {
        self.match_type = match_type;
        self.match_logic = logic;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    pub fn with_types(mut self, types: &[MessageType]) -> Self {
        self.applicable_message_types = types.to_vec();
        self
    }

    pub fn with_lead_tool(mut self, tool_ref: impl Into<String>) -> Self {
        self.lead_tool = Some(tool_ref.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Literal text, or generated when `use_ai` is set or the response is empty.
    pub fn reply_source(&self) -> ReplySource<'_> {
        if self.use_ai || self.response.trim().is_empty() {
            ReplySource::Generated
        } else {
            ReplySource::Literal(&self.response)
        }
    }
}

/// A rule with its regex keywords compiled once.
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: Rule,
    /// One entry per keyword for regex rules; `None` marks a malformed pattern.
    patterns: Vec<Option<Regex>>,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Self {
        let patterns = if rule.match_type == MatchType::Regex {
            rule.keywords
                .iter()
                .map(|k| match RegexBuilder::new(k).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        debug!(rule = %rule.id, pattern = %k, error = %e, "Malformed rule pattern");
                        None
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        Self { rule, patterns }
    }

    fn applies_to(&self, kind: MessageType) -> bool {
        self.rule.enabled && self.rule.applicable_message_types.contains(&kind)
    }

    fn matches(&self, text: &str) -> bool {
        if self.rule.keywords.is_empty() {
            return false;
        }
        let mut results = self
            .rule
            .keywords
            .iter()
            .enumerate()
            .map(|(i, keyword)| self.keyword_matches(i, keyword, text));
        match self.rule.match_logic {
            MatchLogic::And => results.all(|m| m),
            MatchLogic::Or => results.any(|m| m),
        }
    }

    fn keyword_matches(&self, index: usize, keyword: &str, text: &str) -> bool {
        if self.rule.match_type == MatchType::Regex {
            return self
                .patterns
                .get(index)
                .and_then(Option::as_ref)
                .is_some_and(|re| re.is_match(text));
        }

        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return false;
        }
        let text = text.trim().to_lowercase();
        match self.rule.match_type {
            MatchType::Contains => text.contains(&keyword),
            MatchType::Exact => text == keyword,
            MatchType::StartsWith => text.starts_with(&keyword),
            MatchType::EndsWith => text.ends_with(&keyword),
            MatchType::Regex => false,
        }
    }
}

/// Priority-ordered rules engine.
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    /// Sorted by priority desc; stable so declaration order breaks ties.
    rules: Vec<CompiledRule>,
}

impl RulesEngine {
    /// Engine with no rules (every message defers to the default reply).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from rules in declaration order.
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut engine = Self::empty();
        for rule in rules {
            engine.add_rule(rule);
        }
        engine
    }

    /// Parse a JSON array of rules.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        let rules: Vec<Rule> =
            serde_json::from_str(raw).map_err(|e| PipelineError::Rules(e.to_string()))?;
        Ok(Self::new(rules))
    }

    /// Append a rule; it sorts after existing rules of equal priority.
    pub fn add_rule(&mut self, rule: Rule) {
        let compiled = CompiledRule::compile(rule);
        let position = self
            .rules
            .iter()
            .position(|r| r.rule.priority < compiled.rule.priority)
            .unwrap_or(self.rules.len());
        self.rules.insert(position, compiled);
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|r| &r.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First applicable matching rule, or `None` to defer to the default reply.
    pub fn evaluate(&self, message: &Message) -> Option<&Rule> {
        let text = message.matchable_text();
        let matched = self
            .rules
            .iter()
            .filter(|r| r.applies_to(message.message_type))
            .find(|r| r.matches(text))
            .map(|r| &r.rule);

        match matched {
            Some(rule) => debug!(
                id = %message.id,
                rule = %rule.id,
                priority = rule.priority,
                "Message matched rule"
            ),
            None => debug!(id = %message.id, "No rule matched"),
        }
        matched
    }
}
