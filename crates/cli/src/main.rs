//! marginalia CLI: the main entry point.
//!
//! Commands:
//! - `ask`: Stream answers about an article (bridge or `--direct`)
//! - `summarize`: One-shot summary of an article
//! - `prompt`: Render the optimized prompt offline
//! - `config`: Show, validate or locate the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "marginalia",
    about = "marginalia: a reading assistant that answers questions about articles",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask questions about an article file
    Ask {
        /// Article file (HTML or plain text)
        article: PathBuf,

        /// Ask a single question instead of entering interactive mode
        question: Option<String>,

        /// Article title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Source URL, added to the article header
        #[arg(long)]
        url: Option<String>,

        /// Content language, added to the article header
        #[arg(long)]
        language: Option<String>,

        /// Talk to the provider directly instead of through the bridge
        #[arg(long)]
        direct: bool,
    },

    /// Summarize an article file in one request
    Summarize {
        /// Article file (HTML or plain text)
        article: PathBuf,
    },

    /// Render the prompt that would be sent, without sending it
    Prompt {
        /// Article file (HTML or plain text)
        article: PathBuf,

        /// Questions to add to the conversation, oldest first
        #[arg(short, long = "question")]
        questions: Vec<String>,

        /// Article title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Source URL, added to the article header
        #[arg(long)]
        url: Option<String>,

        /// Content language, added to the article header
        #[arg(long)]
        language: Option<String>,

        /// Override the context window size in tokens
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Print prompt, stats and prune report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
    /// Print a default configuration file
    Default,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            article,
            question,
            title,
            url,
            language,
            direct,
        } => {
            commands::ask::run(commands::ask::AskArgs {
                article,
                question,
                title,
                url,
                language,
                direct,
            })
            .await?
        }
        Commands::Summarize { article } => commands::summarize::run(&article).await?,
        Commands::Prompt {
            article,
            questions,
            title,
            url,
            language,
            max_tokens,
            json,
        } => {
            commands::prompt::run(commands::prompt::PromptArgs {
                article,
                questions,
                title,
                url,
                language,
                max_tokens,
                json,
            })
            .await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Default => commands::config_cmd::default_toml().await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_parses_direct_flag_and_question() {
        let cli = Cli::try_parse_from(["marginalia", "ask", "a.html", "Why?", "--direct"]).unwrap();
        match cli.command {
            Commands::Ask {
                article,
                question,
                direct,
                ..
            } => {
                assert_eq!(article, PathBuf::from("a.html"));
                assert_eq!(question.as_deref(), Some("Why?"));
                assert!(direct);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn prompt_collects_repeated_questions() {
        let cli = Cli::try_parse_from(["marginalia", "prompt", "a.html", "-q", "One?", "-q", "Two?"])
            .unwrap();
        match cli.command {
            Commands::Prompt { questions, .. } => assert_eq!(questions, vec!["One?", "Two?"]),
            _ => panic!("expected prompt"),
        }
    }
}
