//! Argument parsing tests for the `bini` command line.

use crate::cli::{parse_header, Cli, Commands};
use clap::Parser;
use std::path::PathBuf;

#[test]
fn test_dev_command_with_flags() {
    let cli = Cli::try_parse_from(["bini", "dev", "--port", "4000", "--verbose"]).unwrap();
    assert_eq!(cli.root, PathBuf::from("."));
    match cli.command {
        Commands::Dev { port, verbose } => {
            assert_eq!(port, Some(4000));
            assert!(verbose);
        }
        _ => panic!("Expected Dev command"),
    }
}

#[test]
fn test_global_root_after_subcommand() {
    let cli = Cli::try_parse_from(["bini", "start", "--root", "/srv/app"]).unwrap();
    assert_eq!(cli.root, PathBuf::from("/srv/app"));
    assert!(matches!(cli.command, Commands::Start { port: None }));
}

#[test]
fn test_build_api_command() {
    let cli = Cli::try_parse_from(["bini", "build-api", "--target", "vercel,netlify", "--out", "out"]).unwrap();
    match cli.command {
        Commands::BuildApi { target, out } => {
            assert_eq!(target.as_deref(), Some("vercel,netlify"));
            assert_eq!(out, Some(PathBuf::from("out")));
        }
        _ => panic!("Expected BuildApi command"),
    }
}

#[test]
fn test_invoke_command_collects_headers() {
    let cli = Cli::try_parse_from([
        "bini",
        "invoke",
        "users/list",
        "-X",
        "POST",
        "--data",
        r#"{"a":1}"#,
        "-H",
        "x-team: core",
        "--header",
        "authorization:Bearer t",
    ]);
    // -X is not a flag; the method is --method / -m
    assert!(cli.is_err());

    let cli = Cli::try_parse_from([
        "bini",
        "invoke",
        "users/list",
        "-m",
        "POST",
        "--data",
        r#"{"a":1}"#,
        "-H",
        "x-team: core",
        "--header",
        "authorization:Bearer t",
    ])
    .unwrap();
    match cli.command {
        Commands::Invoke {
            route,
            event,
            method,
            data,
            headers,
        } => {
            assert_eq!(route, "users/list");
            assert!(event.is_none());
            assert_eq!(method, "POST");
            assert_eq!(data.as_deref(), Some(r#"{"a":1}"#));
            assert_eq!(
                headers,
                vec![
                    ("x-team".to_string(), "core".to_string()),
                    ("authorization".to_string(), "Bearer t".to_string()),
                ]
            );
        }
        _ => panic!("Expected Invoke command"),
    }
}

#[test]
fn test_parse_header_rejects_missing_colon() {
    assert!(parse_header("no-colon").is_err());
    assert!(parse_header(":value").is_err());
    assert_eq!(
        parse_header("a: b:c").unwrap(),
        ("a".to_string(), "b:c".to_string())
    );
}

#[test]
fn test_routes_command() {
    let cli = Cli::try_parse_from(["bini", "routes"]).unwrap();
    assert!(matches!(cli.command, Commands::Routes));
}
