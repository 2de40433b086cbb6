use std::collections::HashSet;

use anyhow::{bail, Result};
use tracing::info;

use crate::config;
use crate::model::Ticket;
use crate::providers;
use crate::store::FsStore;
use crate::sync::{PullOutcome, Selection, SyncOptions, SyncSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Check,
    List,
    /// Remote ids of the top-level items to pull. Empty means all of them.
    Pull(Vec<String>),
    Push,
    Help,
}

/// Parse the arguments after the program name.
///
/// Supported forms:
///   reqsync check
///   reqsync list
///   reqsync pull
///   reqsync pull EPIC-1 EPIC-7
///   reqsync push
///   reqsync help
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };
    let command = match command.as_str() {
        "check" => Command::Check,
        "list" | "ls" => Command::List,
        "pull" => {
            let ids: Vec<String> = rest
                .iter()
                .flat_map(|a| a.split(','))
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect();
            if let Some(flag) = ids.iter().find(|a| a.starts_with('-')) {
                bail!("Unknown flag for pull: {flag}");
            }
            return Ok(Command::Pull(ids));
        }
        "push" => Command::Push,
        "help" | "-h" | "--help" => Command::Help,
        other => bail!("Unknown command: {other}\n\nRun `reqsync help` for usage."),
    };
    if let Some(extra) = rest.first() {
        bail!("Unexpected argument: {extra}");
    }
    Ok(command)
}

/// Run one command against the configured provider and project.
pub async fn run(args: &[String]) -> Result<()> {
    let command = parse_args(args)?;
    if command == Command::Help {
        print_help();
        return Ok(());
    }

    let config = config::load_config()?;
    let provider = providers::create_provider(&config)?;
    let root = config.project_root();
    let store = FsStore::new(&root);
    let session = SyncSession::new(&store, provider.as_ref(), SyncOptions::from(&config.sync));
    info!(provider = provider.name(), root = %root.display(), "starting");

    match command {
        Command::Check => {
            provider.validate_credentials().await?;
            println!("{} credentials OK", provider.name());
        }
        Command::List => {
            let tree = session.fetch_hierarchy().await?;
            if tree.is_empty() {
                println!("No remote items found");
            }
            for top in &tree {
                print_tree(top, 0);
            }
        }
        Command::Pull(ids) => {
            let tree = session.fetch_hierarchy().await?;
            let selection = if ids.is_empty() {
                Selection::all(&tree)
            } else {
                let chosen: HashSet<String> = ids.into_iter().collect();
                let missing: Vec<&String> = chosen
                    .iter()
                    .filter(|id| !tree.iter().any(|t| t.remote_id() == Some(id.as_str())))
                    .collect();
                if !missing.is_empty() {
                    let mut missing: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
                    missing.sort_unstable();
                    bail!("Not found among top-level items: {}", missing.join(", "));
                }
                Selection::from_hierarchy(&tree, Some(&chosen))
            };
            let outcome = session.pull(&selection).await?;
            println!("{outcome}");
            if let PullOutcome::Done(summary) = &outcome {
                for path in &summary.written {
                    println!("  {path}");
                }
            }
        }
        Command::Push => {
            let report = session.push().await?;
            println!("{report}");
        }
        Command::Help => print_help(),
    }
    Ok(())
}

fn print_tree(ticket: &Ticket, depth: usize) {
    let marker = match (&ticket.local_id, ticket.is_update) {
        (Some(local), true) => format!(" [{local}]"),
        _ => " [new]".to_string(),
    };
    println!(
        "{:indent$}{} {} — {}{marker}",
        "",
        ticket.remote_kind,
        ticket.remote_id().unwrap_or("?"),
        ticket.title,
        indent = depth * 2
    );
    for child in &ticket.children {
        print_tree(child, depth + 1);
    }
}

pub fn print_help() {
    println!("reqsync — sync requirement documents with Jira or Azure DevOps\n");
    println!("USAGE:");
    println!("  reqsync check             Validate the configured provider credentials");
    println!("  reqsync list              Show the remote hierarchy and what is already imported");
    println!("  reqsync pull [ID ...]     Import all top-level items, or only the given ones");
    println!("  reqsync push              Create or update every local item remotely");
    println!("  reqsync help              Show this message");
    println!();
    println!("CONFIG:");
    println!("  {}", config::data_dir().join("config.toml").display());
    println!();
    println!("EXAMPLES:");
    println!("  reqsync pull PROJ-12 PROJ-40");
    println!("  RUST_LOG=debug reqsync push");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_is_help() {
        assert_eq!(parse_args(&args(&[])).unwrap(), Command::Help);
        assert_eq!(parse_args(&args(&["--help"])).unwrap(), Command::Help);
    }

    #[test]
    fn parse_simple_commands() {
        assert_eq!(parse_args(&args(&["check"])).unwrap(), Command::Check);
        assert_eq!(parse_args(&args(&["ls"])).unwrap(), Command::List);
        assert_eq!(parse_args(&args(&["push"])).unwrap(), Command::Push);
    }

    #[test]
    fn parse_pull_without_ids_pulls_all() {
        assert_eq!(parse_args(&args(&["pull"])).unwrap(), Command::Pull(vec![]));
    }

    #[test]
    fn parse_pull_ids_space_or_comma_separated() {
        let cmd = parse_args(&args(&["pull", "EPIC-1,EPIC-2", "EPIC-7"])).unwrap();
        assert_eq!(
            cmd,
            Command::Pull(vec!["EPIC-1".into(), "EPIC-2".into(), "EPIC-7".into()])
        );
    }

    #[test]
    fn parse_pull_rejects_flags() {
        let result = parse_args(&args(&["pull", "--all"]));
        assert!(result.unwrap_err().to_string().contains("Unknown flag"));
    }

    #[test]
    fn parse_unknown_command_fails() {
        let result = parse_args(&args(&["sync"]));
        assert!(result.unwrap_err().to_string().contains("Unknown command"));
    }

    #[test]
    fn parse_extra_argument_fails() {
        let result = parse_args(&args(&["push", "now"]));
        assert!(result.unwrap_err().to_string().contains("Unexpected argument"));
    }
}
