//! `replan`: run a goal through the adaptive plan/execute/revise engine.
//!
//! The engine talks to a configured generator command and tool commands (see
//! `replan.toml`). Every run writes its artifacts and `events.jsonl` under
//! `<out>/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use replan::agents::AgentContext;
use replan::core::obstacle::KeywordClassifier;
use replan::core::types::TerminalState;
use replan::events::{FanoutSink, JsonlSink, TracingSink};
use replan::exit_codes;
use replan::io::config::{AgentConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use replan::io::generator::CommandGenerator;
use replan::io::prompt::PromptEngine;
use replan::io::run_log::{create_run_dir, run_id, write_run};
use replan::io::tools::build_gateway;
use replan::logging;
use replan::report::render_summary;
use replan::run::{CancelFlag, run_task};

#[derive(Parser)]
#[command(
    name = "replan",
    version,
    about = "Adaptive plan/execute/revise agent engine"
)]
struct Cli {
    /// Log engine progress at info level (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Plan, execute, and synthesize an artifact for a goal.
    Run {
        /// Goal text.
        #[arg(long, required_unless_present = "goal_file", conflicts_with = "goal_file")]
        goal: Option<String>,
        /// Read the goal from a file.
        #[arg(long)]
        goal_file: Option<PathBuf>,
        /// Directory that receives one subdirectory per run.
        #[arg(long, default_value = "runs")]
        out: PathBuf,
    },
    /// List the tools registered from the config.
    Tools,
    /// Load and validate the config.
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            goal,
            goal_file,
            out,
        } => {
            let goal = read_goal(goal, goal_file.as_deref())?;
            cmd_run(&cli.config, &goal, &out)
        }
        Command::Tools => cmd_tools(&cli.config),
        Command::CheckConfig => cmd_check_config(&cli.config),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &AgentConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn read_goal(goal: Option<String>, goal_file: Option<&Path>) -> Result<String> {
    let goal = match (goal, goal_file) {
        (Some(goal), _) => goal,
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read goal {}", path.display()))?
        }
        (None, None) => bail!("one of --goal or --goal-file is required"),
    };
    let goal = goal.trim().to_string();
    if goal.is_empty() {
        bail!("goal must not be empty");
    }
    Ok(goal)
}

fn cmd_run(config_path: &Path, goal: &str, out: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let generator = CommandGenerator::from_config(&config.generator)?;
    let gateway = build_gateway(&config.tools)?;
    let classifier = KeywordClassifier::new(config.obstacles.clone());
    let prompts = PromptEngine::new()?;

    let paths = create_run_dir(out, &run_id(goal, Utc::now()))?;
    let sink = FanoutSink::new()
        .with(Box::new(TracingSink))
        .with(Box::new(JsonlSink::create(&paths.events_path)?));
    let ctx = AgentContext {
        generator: &generator,
        gateway: &gateway,
        classifier: &classifier,
        events: &sink,
        prompts: &prompts,
        config: &config,
    };

    let report = run_task(&ctx, goal, &CancelFlag::new())
        .with_context(|| format!("run failed; events in {}", paths.events_path.display()))?;
    write_run(&paths, &report)?;

    print!("{}", render_summary(&report));
    println!("\nrun dir: {}", paths.dir.display());
    Ok(match report.terminal_state {
        TerminalState::Completed => exit_codes::OK,
        TerminalState::Aborted { .. } => exit_codes::ABORTED,
        TerminalState::Cancelled => exit_codes::CANCELLED,
    })
}

fn cmd_tools(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let gateway = build_gateway(&config.tools)?;
    for spec in gateway.specs() {
        let required: Vec<&str> = spec.required.iter().map(|f| f.name.as_str()).collect();
        println!(
            "{}\t{}\t(required: {})",
            spec.name,
            spec.description,
            if required.is_empty() {
                "none".to_string()
            } else {
                required.join(", ")
            }
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_check_config(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let gateway = build_gateway(&config.tools)?;
    if config.generator.command.is_empty() {
        eprintln!("warning: generator.command is empty; `replan run` needs one");
    }
    println!(
        "config ok: {} ({} tools)",
        config_path.display(),
        gateway.names().len()
    );
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["replan", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_run_with_goal_and_global_flags() {
        let cli = Cli::parse_from([
            "replan",
            "run",
            "--goal",
            "write a 3-step outline",
            "-v",
            "--config",
            "custom.toml",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        match cli.command {
            Command::Run { goal, out, .. } => {
                assert_eq!(goal.as_deref(), Some("write a 3-step outline"));
                assert_eq!(out, PathBuf::from("runs"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_goal_source() {
        assert!(Cli::try_parse_from(["replan", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["replan", "run", "--goal", "a", "--goal-file", "b"]).is_err()
        );
    }

    #[test]
    fn goal_file_is_trimmed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("goal.md");
        fs::write(&path, "\n  write a poem \n").expect("write");
        assert_eq!(read_goal(None, Some(&path)).expect("goal"), "write a poem");
        assert!(read_goal(Some("   ".to_string()), None).is_err());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        assert!(cmd_init(&path, false).is_err());
        assert_eq!(cmd_init(&path, true).expect("force"), exit_codes::OK);
        assert_eq!(load_config(&path).expect("load"), AgentConfig::default());
    }
}
