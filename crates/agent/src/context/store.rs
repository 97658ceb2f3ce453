//! The context store and its pruning algorithm.
//!
//! # Pruning
//!
//! `optimize()` runs after every mutation. Nothing happens while the total
//! is within `target_tokens`; otherwise, in order, re-checking the total
//! between steps:
//!
//! 1. If the article block alone is over half the window, condense it.
//! 2. If there are more than three messages:
//!    keep every system instruction, the newest current question and the
//!    two newest messages in `[RecentExchange, CurrentQuestion)`.
//! 3. If still over, rank by `(priority desc, timestamp desc)`, keep every
//!    critical message, and fill what is left of the budget greedily until
//!    the next message would overflow it.
//!
//! Messages are held in timestamp order at all times, so everything handed
//! out (and rendered) is chronological. Pruning never fails: if critical
//! messages alone are over budget the result is over budget.

use crate::context::article::{ArticleContext, ArticleContextInfo};
use crate::context::message::{ContextMessage, Priority};
use crate::context::prompt::PromptBuilder;
use crate::context::token::total_tokens;
use marginalia_config::ContextConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How many messages step 2 keeps from the exchange band.
const RECENT_EXCHANGE_KEEP: usize = 2;

/// Step 2 only runs above this many messages.
const PREFILTER_MIN_MESSAGES: usize = 3;

/// Token budget for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    /// Size of the whole context window.
    pub max_tokens: usize,
    /// Held back for the model's answer.
    pub reserve_buffer: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            reserve_buffer: 800,
        }
    }
}

impl ContextBudget {
    pub fn new(max_tokens: usize, reserve_buffer: usize) -> Self {
        Self {
            max_tokens,
            reserve_buffer,
        }
    }

    /// `max_tokens - reserve_buffer`.
    pub fn target_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserve_buffer)
    }
}

impl From<&ContextConfig> for ContextBudget {
    fn from(config: &ContextConfig) -> Self {
        Self::new(config.max_tokens, config.reserve_buffer)
    }
}

/// Read-only copy of a store's settled state.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub article: Option<ContextMessage>,
    /// Chronological.
    pub messages: Vec<ContextMessage>,
}

/// What the last `optimize()` did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub messages_dropped: usize,
    pub tokens_dropped: usize,
    pub article_condensed: bool,
    /// Messages dropped by the pre-filter (step 2).
    pub prefiltered: usize,
    /// Messages dropped by priority-then-recency (step 3).
    pub priority_pruned: usize,
}

/// Budget usage of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    pub message_count: usize,
    pub conversation_tokens: usize,
    pub article_tokens: usize,
    pub total_tokens: usize,
    pub target_tokens: usize,
    pub max_tokens: usize,
    /// `total_tokens / target_tokens` in percent.
    pub utilization_pct: f32,
    pub over_budget: bool,
}

/// Prioritized messages plus one article block, kept within budget.
///
/// Owned by a single conversation. Every mutation settles (including
/// pruning) before it returns, so readers only ever see a settled state.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    budget: ContextBudget,
    messages: Vec<ContextMessage>,
    article: Option<ArticleContext>,
    last_prune: PruneReport,
}

impl ContextStore {
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    pub fn budget(&self) -> ContextBudget {
        self.budget
    }

    /// Add a message, then optimize.
    pub fn add_message(&mut self, mut message: ContextMessage) {
        message.ensure_token_count();
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
        self.optimize();
    }

    /// Replace the article block with freshly cleaned content, then optimize.
    pub fn set_article_context(
        &mut self,
        title: &str,
        raw_content: &str,
        url: Option<&str>,
        language: Option<&str>,
    ) {
        let article = ArticleContext::new(title, raw_content, url, language);
        debug!(
            title = %title,
            kind = ?article.kind(),
            tokens = article.token_count(),
            "Article context set"
        );
        self.article = Some(article);
        self.optimize();
    }

    pub fn has_article_context(&self) -> bool {
        self.article.is_some()
    }

    pub fn article_context_info(&self) -> Option<ArticleContextInfo> {
        self.article.as_ref().map(ArticleContext::info)
    }

    /// Retained conversation messages, chronological.
    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    /// Same as [`messages`](Self::messages), as an owned copy.
    pub fn optimized_context(&self) -> Vec<ContextMessage> {
        self.messages.clone()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            article: self.article.as_ref().map(|a| a.message().clone()),
            messages: self.messages.clone(),
        }
    }

    /// Render with the default [`PromptBuilder`].
    pub fn build_prompt(&self, system_instructions: Option<&str>) -> String {
        self.build_prompt_with(&PromptBuilder::default(), system_instructions)
    }

    pub fn build_prompt_with(
        &self,
        builder: &PromptBuilder,
        system_instructions: Option<&str>,
    ) -> String {
        builder.render(&self.snapshot(), system_instructions)
    }

    /// Drop every message, keep the article.
    pub fn clear_conversation(&mut self) {
        self.messages.clear();
    }

    /// Drop everything.
    pub fn reset_session(&mut self) {
        self.messages.clear();
        self.article = None;
        self.last_prune = PruneReport::default();
    }

    fn conversation_tokens(&self) -> usize {
        total_tokens(self.messages.iter().map(|m| &m.token_count))
    }

    fn article_tokens(&self) -> usize {
        self.article.as_ref().map_or(0, ArticleContext::token_count)
    }

    pub fn total_tokens(&self) -> usize {
        self.conversation_tokens() + self.article_tokens()
    }

    pub fn stats(&self) -> ContextStats {
        let conversation_tokens = self.conversation_tokens();
        let article_tokens = self.article_tokens();
        let total_tokens = conversation_tokens + article_tokens;
        let target_tokens = self.budget.target_tokens();
        let utilization_pct = if target_tokens > 0 {
            (total_tokens as f32 / target_tokens as f32) * 100.0
        } else {
            0.0
        };

        ContextStats {
            message_count: self.messages.len(),
            conversation_tokens,
            article_tokens,
            total_tokens,
            target_tokens,
            max_tokens: self.budget.max_tokens,
            utilization_pct,
            over_budget: total_tokens > target_tokens,
        }
    }

    pub fn last_prune(&self) -> &PruneReport {
        &self.last_prune
    }

    /// Bring the store within budget as far as priorities allow.
    pub fn optimize(&mut self) -> &PruneReport {
        let tokens_before = self.total_tokens();
        let count_before = self.messages.len();
        let target = self.budget.target_tokens();
        let mut report = PruneReport {
            tokens_before,
            ..PruneReport::default()
        };

        if self.total_tokens() > target {
            // Step 1
            if let Some(article) = self.article.as_mut() {
                if article.token_count() * 2 > self.budget.max_tokens
                    && article.condense(self.budget.max_tokens)
                {
                    debug!(
                        title = %article.title(),
                        tokens = article.token_count(),
                        "Condensed article context"
                    );
                    report.article_condensed = true;
                }
            }

            // Step 2
            if self.total_tokens() > target && self.messages.len() > PREFILTER_MIN_MESSAGES {
                report.prefiltered = self.prefilter();
            }

            // Step 3
            if self.total_tokens() > target {
                report.priority_pruned = self.prune_by_priority(target);
            }
        }

        report.tokens_after = self.total_tokens();
        report.messages_dropped = count_before - self.messages.len();
        report.tokens_dropped = tokens_before.saturating_sub(report.tokens_after);

        if report.messages_dropped > 0 || report.article_condensed {
            debug!(
                dropped = report.messages_dropped,
                tokens_before = report.tokens_before,
                tokens_after = report.tokens_after,
                target,
                "Context pruned"
            );
        }

        self.last_prune = report;
        &self.last_prune
    }

    /// Step 2. Returns how many messages were dropped.
    fn prefilter(&mut self) -> usize {
        let newest_question = self
            .messages
            .iter()
            .rposition(|m| m.priority == Priority::CurrentQuestion);

        let band = Priority::RecentExchange.value()..Priority::CurrentQuestion.value();
        let recent: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| band.contains(&m.priority.value()))
            .take(RECENT_EXCHANGE_KEEP)
            .map(|(i, _)| i)
            .collect();

        let before = self.messages.len();
        let mut index = 0;
        self.messages.retain(|m| {
            let i = index;
            index += 1;
            m.priority == Priority::SystemInstruction
                || Some(i) == newest_question
                || recent.contains(&i)
        });
        before - self.messages.len()
    }

    /// Step 3. Returns how many messages were dropped.
    ///
    /// Works on positions rather than ids, so two messages sharing an id
    /// are still ranked and kept independently.
    fn prune_by_priority(&mut self, target: usize) -> usize {
        let budget = target.saturating_sub(self.article_tokens());
        let messages = &self.messages;

        let mut ranked: Vec<usize> = (0..messages.len()).collect();
        ranked.sort_by(|&a, &b| {
            let (a, b) = (&messages[a], &messages[b]);
            b.priority
                .value()
                .cmp(&a.priority.value())
                .then(b.timestamp.cmp(&a.timestamp))
        });

        let (critical, rest): (Vec<usize>, Vec<usize>) = ranked
            .into_iter()
            .partition(|&i| messages[i].priority.is_critical());

        let mut keep = vec![false; messages.len()];
        let mut used = 0;
        for &i in &critical {
            keep[i] = true;
            used += messages[i].token_count;
        }

        for i in rest {
            let tokens = messages[i].token_count;
            if used + tokens > budget {
                break;
            }
            used += tokens;
            keep[i] = true;
        }

        let before = self.messages.len();
        let mut index = 0;
        self.messages.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        before - self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_core::message::Role;

    /// A message of exactly `tokens` estimated tokens.
    fn sized(priority: Priority, role: Role, tokens: usize, ts: i64) -> ContextMessage {
        ContextMessage::new(role, "x".repeat(tokens * 4), priority).with_timestamp(ts)
    }

    fn small_store() -> ContextStore {
        ContextStore::new(ContextBudget::new(1000, 200))
    }

    #[test]
    fn under_budget_keeps_everything() {
        let mut store = ContextStore::new(ContextBudget::default());
        store.add_message(ContextMessage::system_instruction("X").with_timestamp(1));
        for i in 0..5 {
            store.add_message(ContextMessage::question(format!("q{i}")).with_timestamp(10 + i));
        }
        assert_eq!(store.messages().len(), 6);
        assert_eq!(store.last_prune().messages_dropped, 0);
    }

    #[test]
    fn scenario_prefilter_keeps_system_latest_question_and_two_recent() {
        let mut store = ContextStore::new(ContextBudget::default()); // target 3200
        store.add_message(ContextMessage::system_instruction("X").with_timestamp(1));
        for i in 0..5 {
            let ts = 10 + i * 2;
            store.add_message(sized(Priority::CurrentQuestion, Role::User, 800, ts));
            store.add_message(sized(Priority::RecentExchange, Role::Assistant, 800, ts + 1));
        }

        let context = store.optimized_context();
        let timestamps: Vec<i64> = context.iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![1, 17, 18, 19]);
        assert_eq!(context[0].priority, Priority::SystemInstruction);
        assert_eq!(context[0].content, "X");
        assert_eq!(context[2].priority, Priority::CurrentQuestion);
        assert_eq!(
            context
                .iter()
                .filter(|m| m.priority == Priority::RecentExchange)
                .count(),
            2
        );
        assert!(store.total_tokens() <= store.budget().target_tokens());
    }

    #[test]
    fn priority_pruning_fills_by_priority_then_recency() {
        let mut store = small_store(); // target 800
        store.add_message(sized(Priority::CurrentQuestion, Role::User, 300, 5));
        store.add_message(sized(Priority::PeripheralInfo, Role::User, 200, 1));
        store.add_message(sized(Priority::CodeContext, Role::User, 300, 2));

        // 800 tokens: fits exactly.
        assert_eq!(store.messages().len(), 3);

        // Three messages only, so no pre-filter; priority pass drops the
        // peripheral message first.
        store.clear_conversation();
        store.add_message(sized(Priority::CurrentQuestion, Role::User, 300, 5));
        store.add_message(sized(Priority::PeripheralInfo, Role::User, 200, 1));
        store.add_message(sized(Priority::CodeContext, Role::User, 400, 2));

        let priorities: Vec<Priority> = store.messages().iter().map(|m| m.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::CodeContext, Priority::CurrentQuestion]
        );
        assert_eq!(store.last_prune().priority_pruned, 1);
    }

    #[test]
    fn greedy_fill_stops_at_first_overflow() {
        let mut store = small_store(); // target 800
        store.add_message(sized(Priority::CurrentQuestion, Role::User, 100, 10));
        store.add_message(sized(Priority::PeripheralInfo, Role::User, 50, 2));
        store.add_message(sized(Priority::CodeContext, Role::User, 720, 4));

        // The code block overflows, and the smaller peripheral message
        // ranked after it is not considered.
        let timestamps: Vec<i64> = store.messages().iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![10]);
        assert_eq!(store.last_prune().priority_pruned, 2);
    }

    #[test]
    fn critical_messages_survive_even_over_budget() {
        let mut store = small_store(); // target 800
        store.add_message(sized(Priority::SystemInstruction, Role::System, 900, 1));
        store.add_message(sized(Priority::CurrentQuestion, Role::User, 50, 2));
        store.add_message(sized(Priority::RecentExchange, Role::Assistant, 10, 3));

        let priorities: Vec<Priority> = store.messages().iter().map(|m| m.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::SystemInstruction, Priority::CurrentQuestion]
        );
        assert!(store.stats().over_budget);
    }

    #[test]
    fn chronological_order_regardless_of_insertion() {
        let mut store = ContextStore::new(ContextBudget::default());
        for ts in [50, 10, 40, 20, 30, 20] {
            store.add_message(ContextMessage::question(format!("t{ts}")).with_timestamp(ts));
        }
        let timestamps: Vec<i64> = store.messages().iter().map(|m| m.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        let prompt = store.build_prompt(None);
        let positions: Vec<usize> = ["t10", "t20", "t30", "t40", "t50"]
            .iter()
            .map(|t| prompt.find(&format!("User: {t}")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn chronological_order_survives_pruning() {
        let mut store = small_store();
        let inserts = [
            (Priority::RecentExchange, 9),
            (Priority::SystemInstruction, 1),
            (Priority::CurrentQuestion, 8),
            (Priority::RecentExchange, 3),
            (Priority::RecentExchange, 7),
            (Priority::CurrentQuestion, 2),
        ];
        for (priority, ts) in inserts {
            store.add_message(sized(priority, Role::User, 200, ts));
        }
        let timestamps: Vec<i64> = store.messages().iter().map(|m| m.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
        assert!(timestamps.contains(&1));
        assert!(timestamps.contains(&8));
    }

    #[test]
    fn visible_content_scenario() {
        let mut store = ContextStore::new(ContextBudget::default());
        store.set_article_context("Current View", "<p>Hi</p>", None, None);

        let info = store.article_context_info().unwrap();
        assert_eq!(info.kind, Priority::VisibleContent);
        assert!(!info.condensed);

        let prompt = store.build_prompt(None);
        assert!(prompt.contains("ARTICLE CONTEXT:\nArticle Title: Current View\n\nHi\n\n"));
        assert!(!prompt.contains("<p>"));
    }

    #[test]
    fn setting_article_twice_is_idempotent() {
        let raw = format!("<article>{}</article>", "Sentence number one. ".repeat(900));
        let mut once = ContextStore::new(ContextBudget::default());
        once.add_message(ContextMessage::question("Q").with_timestamp(1));
        once.set_article_context("Essay", &raw, Some("https://e.test"), Some("en"));

        let mut twice = ContextStore::new(ContextBudget::default());
        twice.add_message(ContextMessage::question("Q").with_timestamp(1));
        twice.set_article_context("Essay", &raw, Some("https://e.test"), Some("en"));
        twice.set_article_context("Essay", &raw, Some("https://e.test"), Some("en"));

        assert!(once.article_context_info().unwrap().condensed);
        assert_eq!(once.total_tokens(), twice.total_tokens());
        assert_eq!(once.build_prompt(Some("I")), twice.build_prompt(Some("I")));
        assert_eq!(once.article_context_info(), twice.article_context_info());
    }

    #[test]
    fn repeated_optimize_is_stable() {
        let raw = "word ".repeat(3000);
        let mut store = ContextStore::new(ContextBudget::default());
        store.set_article_context("Long", &raw, None, None);
        let prompt = store.build_prompt(None);

        store.optimize();
        store.optimize();
        assert_eq!(store.build_prompt(None), prompt);
        assert!(!store.last_prune().article_condensed);
    }

    #[test]
    fn large_article_is_condensed_and_reported() {
        let raw = "word ".repeat(3000); // ~3750 tokens, over half of 4000
        let mut store = ContextStore::new(ContextBudget::default());
        store.set_article_context("Long", &raw, None, None);

        let report = store.last_prune();
        assert!(report.article_condensed);
        assert!(report.tokens_after < report.tokens_before);

        let prompt = store.build_prompt(None);
        assert!(prompt.contains("BEGINNING:"));
        assert!(prompt.contains("MIDDLE SECTION:"));
        assert!(prompt.contains("ENDING:"));
        assert!(prompt.contains("14999 characters"));
    }

    #[test]
    fn article_under_target_is_left_whole() {
        // ~2500 tokens: over half the window, but the store is within target.
        let mut store = ContextStore::new(ContextBudget::default());
        store.set_article_context("Plain", &"abcd".repeat(2500), None, None);

        let info = store.article_context_info().unwrap();
        assert!(!info.condensed);
        assert!(info.content_length >= 10_000);
        assert!(!store.last_prune().article_condensed);
        assert!(!store.build_prompt(None).contains("MIDDLE SECTION:"));
    }

    #[test]
    fn shared_ids_do_not_stretch_the_budget() {
        let mut store = small_store(); // target 800
        store.add_message(sized(Priority::CurrentQuestion, Role::User, 100, 10));
        let mut code = sized(Priority::CodeContext, Role::User, 400, 5);
        code.id = "dup".into();
        store.add_message(code);
        let mut aside = sized(Priority::PeripheralInfo, Role::User, 400, 1);
        aside.id = "dup".into();
        store.add_message(aside);

        let timestamps: Vec<i64> = store.messages().iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![5, 10]);
        assert_eq!(store.last_prune().priority_pruned, 1);
        assert!(store.total_tokens() <= store.budget().target_tokens());
    }

    #[test]
    fn article_tokens_shrink_conversation_budget() {
        let mut store = small_store(); // max 1000, target 800
        store.set_article_context("Notes", &"n".repeat(1600), None, None); // ~404 tokens
        store.add_message(sized(Priority::CurrentQuestion, Role::User, 100, 10));
        store.add_message(sized(Priority::CodeContext, Role::User, 200, 5));
        store.add_message(sized(Priority::CodeContext, Role::User, 200, 6));

        // Budget for conversation is 800 - article; only one code block fits.
        let timestamps: Vec<i64> = store.messages().iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![6, 10]);
    }

    #[test]
    fn clear_conversation_keeps_article() {
        let mut store = ContextStore::new(ContextBudget::default());
        store.set_article_context("Doc", "Body", None, None);
        store.add_message(ContextMessage::question("Q"));
        store.clear_conversation();

        assert!(store.messages().is_empty());
        assert!(store.has_article_context());
    }

    #[test]
    fn reset_session_drops_everything() {
        let mut store = ContextStore::new(ContextBudget::default());
        store.set_article_context("Doc", "Body", None, None);
        store.add_message(ContextMessage::question("Q"));
        store.reset_session();

        assert!(store.messages().is_empty());
        assert!(!store.has_article_context());
        assert_eq!(store.total_tokens(), 0);
        assert_eq!(store.build_prompt(None), "Assistant:");
    }

    #[test]
    fn stats_report_budget_use() {
        let mut store = small_store();
        store.add_message(sized(Priority::CurrentQuestion, Role::User, 400, 1));
        let stats = store.stats();

        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.total_tokens, 400);
        assert_eq!(stats.target_tokens, 800);
        assert!((stats.utilization_pct - 50.0).abs() < 0.01);
        assert!(!stats.over_budget);
    }

    #[test]
    fn budget_from_config() {
        let config = ContextConfig {
            max_tokens: 8000,
            reserve_buffer: 1000,
        };
        assert_eq!(ContextBudget::from(&config).target_tokens(), 7000);
    }
}
