//! `marginalia prompt`: render the optimized prompt offline.
//!
//! No network access and no API key needed. Useful for checking what the
//! budget keeps before spending tokens on it.

use super::read_article;
use marginalia_agent::{ContextBudget, ContextMessage, ContextStats, ContextStore, DEFAULT_INSTRUCTIONS};
use marginalia_config::AppConfig;
use std::path::PathBuf;

pub struct PromptArgs {
    pub article: PathBuf,
    pub questions: Vec<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub language: Option<String>,
    pub max_tokens: Option<usize>,
    pub json: bool,
}

/// The rendered prompt and the store's stats after optimization.
pub fn render(
    budget: ContextBudget,
    title: &str,
    content: &str,
    url: Option<&str>,
    language: Option<&str>,
    questions: &[String],
) -> (String, ContextStats, ContextStore) {
    let mut store = ContextStore::new(budget);
    store.set_article_context(title, content, url, language);
    for question in questions {
        store.add_message(ContextMessage::question(question.as_str()));
    }
    let prompt = store.build_prompt(Some(DEFAULT_INSTRUCTIONS));
    let stats = store.stats();
    (prompt, stats, store)
}

pub async fn run(args: PromptArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let article = read_article(&args.article, args.title)?;

    let mut budget = ContextBudget::from(&config.context);
    if let Some(max_tokens) = args.max_tokens {
        if max_tokens <= budget.reserve_buffer {
            return Err(format!(
                "--max-tokens must be larger than the reserve buffer ({})",
                budget.reserve_buffer
            )
            .into());
        }
        budget.max_tokens = max_tokens;
    }

    let (prompt, stats, store) = render(
        budget,
        &article.title,
        &article.content,
        args.url.as_deref(),
        args.language.as_deref(),
        &args.questions,
    );

    if args.json {
        let report = serde_json::json!({
            "prompt": prompt,
            "stats": stats,
            "article": store.article_context_info(),
            "last_prune": store.last_prune(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{prompt}");
    eprintln!();
    eprintln!(
        "  Tokens:    {} / {} target ({:.0}%)",
        stats.total_tokens, stats.target_tokens, stats.utilization_pct
    );
    eprintln!("  Article:   {} tokens", stats.article_tokens);
    eprintln!("  Messages:  {} ({} tokens)", stats.message_count, stats.conversation_tokens);
    if let Some(info) = store.article_context_info().filter(|i| i.condensed) {
        eprintln!("  Condensed: yes ({} characters kept)", info.content_length);
    }
    if stats.over_budget {
        eprintln!("  Warning:   critical content alone is over budget");
    }

    Ok(())
}
