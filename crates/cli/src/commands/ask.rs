//! `marginalia ask`: stream answers about an article.

use super::{load_config_with_key, read_article};
use marginalia_agent::{
    BridgeTransport, ProviderTransport, ReadingAssistant, StreamTransport, model_settings,
};
use marginalia_bridge::{BridgeExecutor, ChannelBridge};
use marginalia_config::AppConfig;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

pub struct AskArgs {
    pub article: PathBuf,
    pub question: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub language: Option<String>,
    pub direct: bool,
}

/// Build the transport the session will stream through.
///
/// Without `direct`, an in-process bridge is started with an executor that
/// holds the provider; the session side never sees the credentials.
pub fn build_transport(config: &AppConfig, direct: bool) -> Arc<dyn StreamTransport> {
    let provider = marginalia_providers::build_from_config(config);
    let settings = model_settings(config);
    debug!(provider = %provider.name(), model = %settings.model, direct, "Building stream transport");

    if direct {
        return Arc::new(
            ProviderTransport::new(provider, settings).with_timeout(config.stream.direct_timeout()),
        );
    }

    let (bridge, incoming) = ChannelBridge::new(config.stream.channel_capacity);
    BridgeExecutor::new(provider, settings).spawn(incoming);
    Arc::new(BridgeTransport::new(bridge).with_timeout(config.stream.bridge_timeout()))
}

pub async fn run(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_with_key()?;
    let article = read_article(&args.article, args.title)?;

    let transport = build_transport(&config, args.direct);
    let mut assistant = ReadingAssistant::from_config(Arc::clone(&transport), &config);
    assistant.set_article(
        &article.title,
        &article.content,
        args.url.as_deref(),
        args.language.as_deref(),
    );

    if let Some(question) = args.question {
        return ask_once(&mut assistant, &question).await;
    }

    // Interactive mode
    let info = assistant.store().article_context_info();
    println!();
    println!("  Article:    {}", article.title);
    if let Some(info) = info {
        println!(
            "  Context:    ~{} tokens{}",
            info.token_count,
            if info.condensed { " (condensed)" } else { "" }
        );
    }
    println!("  Provider:   {}", config.provider);
    println!("  Model:      {}", config.model);
    println!("  Transport:  {}", transport.name());
    println!();
    println!("  Ask a question and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        print!("  Assistant > ");
        if let Err(e) = ask_once(&mut assistant, question).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    Ok(())
}

async fn ask_once(
    assistant: &mut ReadingAssistant,
    question: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = assistant
        .ask(question, |chunk| {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();

    if let Some(err) = output.interruption {
        eprintln!();
        eprintln!("  [Answer incomplete: {err}]");
        if err.is_retryable() {
            eprintln!("  Ask again to retry.");
        }
    }

    Ok(())
}
