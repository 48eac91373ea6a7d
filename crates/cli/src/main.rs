//! Task extraction CLI
//!
//! A thin wrapper around todo-extract-core that provides the command-line interface.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use todo_extract_core::{
    default_tags, extract_task_rules, tag_names, ExtractionFacade, KnownTag, TagColor, TaskDraft,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "todo-extract")]
#[command(about = "Extract structured tasks from free-form text")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose debug output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze text for a live task preview
    Analyze {
        /// Task description in natural language
        text: String,

        /// Comma-separated known tags (defaults to 工作,学习,生活,重要)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Skip the model and use the rule engine only
        #[arg(long = "rules-only")]
        rules_only: bool,

        /// Print the task draft (with resolved dates) instead of the raw analysis
        #[arg(long)]
        draft: bool,
    },

    /// Extract a complete task record in one shot
    Import {
        /// Task description in natural language
        text: String,

        /// Comma-separated known tags (defaults to 工作,学习,生活,重要)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Resolve a weekday/time phrase into a start or due instant
    Resolve {
        /// Phrase such as "下周三下午3点截止"
        text: String,
    },
}

// ============================================================================
// Helpers
// ============================================================================

fn known_tags(names: &[String]) -> Vec<KnownTag> {
    let names: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();

    if names.is_empty() {
        return default_tags();
    }
    names
        .into_iter()
        .map(|name| KnownTag::new(name, TagColor::default()))
        .collect()
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    let facade = ExtractionFacade::from_env();

    match args.command {
        Command::Analyze {
            text,
            tags,
            rules_only,
            draft,
        } => {
            let tags = known_tags(&tags);
            let result = if rules_only {
                tracing::debug!("Using rule engine only");
                extract_task_rules(&text, &tag_names(&tags))
            } else {
                facade.analyze(&text, &tags).await?
            };

            if draft {
                print_json(&TaskDraft::from_analysis(&result, &chrono::Local::now()))?;
            } else {
                print_json(&result)?;
            }
        }
        Command::Import { text, tags } => {
            let draft = facade.import(&text, &known_tags(&tags)).await?;
            print_json(&draft)?;
        }
        Command::Resolve { text } => {
            let resolution = facade.resolve(&text);
            if resolution.is_empty() {
                tracing::debug!("No weekday phrase found in {:?}", text);
            }
            print_json(&resolution)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_default() {
        let tags = known_tags(&[]);
        assert_eq!(tag_names(&tags), vec!["工作", "学习", "生活", "重要"]);
    }

    #[test]
    fn test_known_tags_custom() {
        let tags = known_tags(&["旅行".to_string(), " ".to_string(), "读书 ".to_string()]);
        assert_eq!(tag_names(&tags), vec!["旅行", "读书"]);
    }

    #[test]
    fn test_parse_analyze_args() {
        let args = Args::try_parse_from([
            "todo-extract",
            "analyze",
            "周四开会",
            "--tags",
            "工作,生活",
            "--rules-only",
            "-v",
        ])
        .unwrap();

        assert!(args.verbose);
        match args.command {
            Command::Analyze {
                text,
                tags,
                rules_only,
                draft,
            } => {
                assert_eq!(text, "周四开会");
                assert_eq!(tags, vec!["工作", "生活"]);
                assert!(rules_only);
                assert!(!draft);
            }
            other => panic!("Expected analyze, got {:?}", other),
        }
    }
}
