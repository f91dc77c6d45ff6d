//! crm-admin: operator tool for the telecaller CRM.
//!
//! Usage:
//!   crm-admin --db crm.db --seed-demo 12 --seed 7
//!   crm-admin --db crm.db --audit
//!   crm-admin --db crm.db < commands.jsonl
//!
//! Without `--seed-demo` or `--audit` it reads one JSON command per line
//! from stdin and answers each with one JSON line on stdout.

mod commands;
mod demo_roster;

use anyhow::Result;
use std::env;
use std::io::{self, BufRead, Write};
use telecrm_core::{
    clock::CrmClock, config::CrmConfig, engine::CrmEngine, notifier::LogNotifier, store::CrmStore,
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = match find_arg(&args, "--config") {
        Some(path) => CrmConfig::load(path)?,
        None => CrmConfig::default(),
    };
    let db = find_arg(&args, "--db").unwrap_or(config.database.as_str()).to_string();
    let seed = parse_arg(&args, "--seed", 42u64);

    let store = CrmStore::open(&db)?;
    store.migrate()?;
    let engine = CrmEngine::new(store, config, CrmClock::System, Box::new(LogNotifier));

    if args.iter().any(|a| a == "--seed-demo") {
        let telecallers = parse_arg(&args, "--seed-demo", 8usize);
        let summary = demo_roster::seed_demo(&engine, telecallers, seed)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if args.iter().any(|a| a == "--audit") {
        let violations = engine.audit_teams()?;
        for violation in &violations {
            println!("{}", serde_json::to_string(violation)?);
        }
        if !violations.is_empty() {
            log::warn!("{} team invariant violation(s) in {db}", violations.len());
            std::process::exit(1);
        }
        println!("team invariants hold");
        return Ok(());
    }

    run_command_loop(&engine)
}

fn run_command_loop(engine: &CrmEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<commands::Request>(&buffer) {
            Ok(request) if request.is_quit() => break,
            Ok(request) => commands::respond(engine, request),
            Err(e) => serde_json::json!({ "error": e.to_string(), "status": 400 }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn find_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    find_arg(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
