//! CLI parse tests.

use super::{Cli, CliCommand, ResumeCommand};
use clap::Parser;
use std::path::PathBuf;

fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

const ID: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

#[test]
fn cli_parse_run_default_config() {
    match parse(&["dirseed", "run"]) {
        CliCommand::Run { config } => assert!(config.is_none()),
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_with_config() {
    match parse(&["dirseed", "run", "--config", "/etc/dirseed.toml"]) {
        CliCommand::Run { config } => {
            assert_eq!(config, Some(PathBuf::from("/etc/dirseed.toml")))
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_scan() {
    match parse(&["dirseed", "scan"]) {
        CliCommand::Scan { config } => assert!(config.is_none()),
        _ => panic!("expected Scan"),
    }
}

#[test]
fn cli_parse_resume_list() {
    match parse(&["dirseed", "resume", "list", "--config", "c.toml"]) {
        CliCommand::Resume(ResumeCommand::List { config }) => {
            assert_eq!(config, Some(PathBuf::from("c.toml")))
        }
        _ => panic!("expected Resume List"),
    }
}

#[test]
fn cli_parse_resume_remove() {
    match parse(&["dirseed", "resume", "remove", ID]) {
        CliCommand::Resume(ResumeCommand::Remove { id, config }) => {
            assert_eq!(id.to_hex(), ID);
            assert!(config.is_none());
        }
        _ => panic!("expected Resume Remove"),
    }
}

#[test]
fn cli_rejects_bad_content_id() {
    assert!(Cli::try_parse_from(["dirseed", "resume", "remove", "xyz"]).is_err());
}

#[test]
fn cli_requires_subcommand() {
    assert!(Cli::try_parse_from(["dirseed"]).is_err());
    assert!(Cli::try_parse_from(["dirseed", "resume"]).is_err());
}
