//! `marginalia summarize`: one non-streaming summary of an article file.

use super::{load_config_with_key, read_article};
use marginalia_agent::context::article::clean_content;
use marginalia_agent::{model_settings, summarize_text};
use std::path::Path;

pub async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_with_key()?;
    let article = read_article(path, None)?;
    let provider = marginalia_providers::build_from_config(&config);

    eprint!("  Summarizing...");
    let summary = summarize_text(
        provider.as_ref(),
        &clean_content(&article.content),
        &model_settings(&config),
    )
    .await;
    eprint!("\r                \r");

    println!("{}", summary?);
    Ok(())
}
