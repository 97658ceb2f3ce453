pub mod ask;
pub mod config_cmd;
pub mod prompt;
pub mod summarize;

use marginalia_config::AppConfig;
use std::path::Path;

/// Load the configuration and insist on an API key.
pub fn load_config_with_key() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    MARGINALIA_API_KEY   (generic)");
        eprintln!("    OPENROUTER_API_KEY   (recommended)");
        eprintln!("    OPENAI_API_KEY       (for OpenAI direct)");
        eprintln!("    ANTHROPIC_API_KEY    (for Anthropic direct)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    Ok(config)
}

/// An article file: its content, and a title defaulting to the file stem.
pub struct ArticleFile {
    pub title: String,
    pub content: String,
}

pub fn read_article(path: &Path, title: Option<String>) -> Result<ArticleFile, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;

    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    });

    Ok(ArticleFile { title, content })
}
