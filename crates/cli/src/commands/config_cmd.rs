//! `marginalia config`: configuration management commands.

use marginalia_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Provider:  {}", config.provider);
            println!("   Model:     {}", config.model);
            println!(
                "   Context:   {} tokens ({} reserved)",
                config.context.max_tokens, config.context.reserve_buffer
            );
            println!(
                "   Timeouts:  bridge {}s, direct {}s",
                config.stream.bridge_timeout_secs, config.stream.direct_timeout_secs
            );
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Problems that do not stop loading but will bite later.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if !config.has_api_key() {
        warnings.push("No API key set (set MARGINALIA_API_KEY or OPENROUTER_API_KEY)");
    }

    if config.context.reserve_buffer * 2 > config.context.max_tokens {
        warnings.push("reserve_buffer takes more than half the context window");
    }

    if config.stream.bridge_timeout_secs > config.stream.direct_timeout_secs {
        warnings.push("bridge timeout is longer than the direct timeout");
    }

    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn default_toml() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}
