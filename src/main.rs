use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod assign;
mod db;
mod engine;
mod error;
mod export;
mod models;
mod report;
mod rubric;
mod stats;

use crate::engine::Engine;
use crate::models::{EvaluationInput, Feedback, RatingInput};
use crate::rubric::Dimension;

#[derive(Parser)]
#[command(name = "rubric-eval")]
#[command(about = "Human rubric evaluation of recorded LLM responses", long_about = None)]
struct Cli {
    /// SQLite database to read and write
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://rubric-eval.db",
        global = true
    )]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the built-in sample responses if none exist
    Seed,
    /// Import responses from a CSV file (prompt,response,model_name)
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List every response available for evaluation
    Responses,
    /// Show one response
    Response {
        #[arg(long)]
        id: i64,
    },
    /// Start an evaluation session
    Start {
        #[arg(long)]
        evaluator: String,
    },
    /// Show the next response a session should evaluate
    Next {
        #[arg(long)]
        session: i64,
    },
    /// Record ratings and feedback for a response
    Submit(SubmitArgs),
    /// Mark a session completed
    Complete {
        #[arg(long)]
        session: i64,
    },
    /// List sessions, newest first
    Sessions,
    /// Show a session and its evaluations
    Show {
        #[arg(long)]
        session: i64,
    },
    /// Delete a session together with its evaluations
    Delete {
        #[arg(long)]
        session: i64,
    },
    /// Print session statistics as JSON
    Stats {
        #[arg(long)]
        session: i64,
    },
    /// Print global totals and recent sessions as JSON
    Overview,
    /// Export a session as a JSON document
    Export {
        #[arg(long)]
        session: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown report for a session
    Report {
        #[arg(long)]
        session: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SubmitArgs {
    #[arg(long)]
    session: i64,
    #[arg(long)]
    response: i64,
    #[arg(long)]
    helpfulness: Option<i64>,
    #[arg(long)]
    correctness: Option<i64>,
    #[arg(long)]
    coherence: Option<i64>,
    #[arg(long)]
    empathy_tone: Option<i64>,
    #[arg(long)]
    safety: Option<i64>,
    #[arg(long)]
    overall: Option<i64>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    suggestions: Option<String>,
    #[arg(long)]
    safety_concerns: Option<String>,
    #[arg(long)]
    hallucinations: Option<String>,
    #[arg(long, default_value_t = false)]
    requires_revision: bool,
}

impl From<SubmitArgs> for EvaluationInput {
    fn from(args: SubmitArgs) -> Self {
        Self {
            session_id: args.session,
            response_id: args.response,
            ratings: RatingInput {
                helpfulness: args.helpfulness,
                correctness: args.correctness,
                coherence: args.coherence,
                empathy_tone: args.empathy_tone,
                safety: args.safety,
                overall: args.overall,
            },
            feedback: Feedback {
                evaluator_notes: args.notes,
                improvement_suggestions: args.suggestions,
                safety_concerns: args.safety_concerns,
                hallucination_flags: args.hallucinations,
            },
            requires_revision: args.requires_revision,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let pool = db::connect(&cli.database_url)
        .await
        .with_context(|| format!("failed to open database {}", cli.database_url))?;
    db::init_db(&pool)
        .await
        .context("failed to apply schema migrations")?;
    let engine = Engine::new(pool);

    match cli.command {
        Commands::InitDb => {
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(engine.pool()).await?;
            if inserted == 0 {
                println!("Sample data already present.");
            } else {
                println!("Inserted {inserted} sample responses.");
            }
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(engine.pool(), &csv)
                .await
                .with_context(|| format!("failed to import {}", csv.display()))?;
            println!("Inserted {inserted} responses from {}.", csv.display());
        }
        Commands::Responses => {
            let responses = db::list_responses(engine.pool()).await?;
            if responses.is_empty() {
                println!("No responses loaded. Run `seed` or `import` first.");
                return Ok(());
            }
            for response in responses {
                println!(
                    "- #{} [{}] {}",
                    response.id,
                    response.model_name.as_deref().unwrap_or("unknown model"),
                    response.prompt
                );
            }
        }
        Commands::Response { id } => {
            let response = db::get_response(engine.pool(), id).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Start { evaluator } => {
            let session = engine.start_session(&evaluator).await?;
            println!(
                "Session {} started for {}.",
                session.id, session.evaluator_name
            );
        }
        Commands::Next { session } => match engine.next_response(session).await? {
            Some(next) => {
                let response = next.response;
                println!(
                    "Response #{} ({}), {} remaining",
                    response.id,
                    response.model_name.as_deref().unwrap_or("unknown model"),
                    next.remaining
                );
                println!();
                println!("Prompt:\n{}", response.prompt);
                println!();
                println!("Response:\n{}", response.response);
            }
            None => {
                println!("No more responses to evaluate in session {session}.");
            }
        },
        Commands::Submit(args) => {
            let evaluation = engine.submit(EvaluationInput::from(args)).await?;
            println!(
                "Evaluation {} recorded: average {:.2}, risk {}.",
                evaluation.id,
                evaluation.average_rating(),
                evaluation.risk_level()
            );
        }
        Commands::Complete { session } => {
            let session = engine.complete_session(session).await?;
            println!("Session {} completed.", session.id);
        }
        Commands::Sessions => {
            let sessions = db::list_sessions(engine.pool()).await?;
            if sessions.is_empty() {
                println!("No sessions yet.");
                return Ok(());
            }
            for session in sessions {
                println!(
                    "- #{} {} ({}), started {}",
                    session.id,
                    session.evaluator_name,
                    session.status.as_str(),
                    session.created_at.to_rfc3339()
                );
            }
        }
        Commands::Show { session } => {
            let (session, evaluations) = engine.session_detail(session).await?;
            let summary = stats::session_stats(&evaluations);
            println!(
                "Session {}: {} ({})",
                session.id,
                session.evaluator_name,
                session.status.as_str()
            );
            println!(
                "{} evaluations, mean rating {:.2}, {} high risk",
                summary.total_evaluations,
                summary.mean_average_rating,
                summary.risk_distribution.high
            );
            for evaluation in evaluations {
                println!();
                println!(
                    "Evaluation {} of response #{} (risk {}{})",
                    evaluation.id,
                    evaluation.response_id,
                    evaluation.risk_level(),
                    if evaluation.requires_revision {
                        ", needs revision"
                    } else {
                        ""
                    }
                );
                for dimension in Dimension::ALL {
                    match evaluation.ratings.get(dimension) {
                        Some(rating) => println!(
                            "  {}: {} - {}",
                            dimension.title(),
                            rating,
                            dimension.label(rating)
                        ),
                        None => println!("  {}: not rated", dimension.title()),
                    }
                }
            }
        }
        Commands::Delete { session } => {
            let removed = engine.delete_session(session).await?;
            println!("Session {session} deleted with {removed} evaluations.");
        }
        Commands::Stats { session } => {
            let stats = engine.session_stats(session).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Overview => {
            let overview = engine.overview().await?;
            println!("{}", serde_json::to_string_pretty(&overview)?);
        }
        Commands::Export { session, out } => {
            let document = engine.export(session).await?;
            let json = serde_json::to_string_pretty(&document)?;
            let out = out.unwrap_or_else(|| PathBuf::from(export::default_file_name(session)));
            std::fs::write(&out, json)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Export written to {}.", out.display());
        }
        Commands::Report { session, out } => {
            let report = engine.report(session).await?;
            match out {
                Some(out) => {
                    std::fs::write(&out, report)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!("Report written to {}.", out.display());
                }
                None => print!("{report}"),
            }
        }
    }

    Ok(())
}
