//! Token-budgeted conversation context.
//!
//! A [`ContextStore`] holds prioritized conversation messages plus at most
//! one article (or visible-content) block, and prunes them to fit the budget.
//! [`PromptBuilder`] renders a settled snapshot into a provider-ready prompt.
//!
//! # Priorities (higher survives longer)
//!
//! | Priority | Value |
//! |----------|-------|
//! | System instruction | 10 |
//! | Current question | 9 |
//! | Article metadata / visible content | 8 |
//! | Article content | 7 |
//! | Recent exchange | 6 |
//! | Code context | 5 |
//! | Historical exchange | 3 |
//! | Peripheral info | 1 |

pub mod article;
pub mod message;
pub mod prompt;
pub mod store;
pub mod token;

pub use article::{ArticleContext, ArticleContextInfo};
pub use message::{ContextMessage, Priority};
pub use prompt::PromptBuilder;
pub use store::{ContextBudget, ContextSnapshot, ContextStats, ContextStore, PruneReport};
pub use token::estimate_tokens;
