//! Mock docker-compose binary for integration testing
//!
//! Understands just enough of the compose CLI for compose-suite to drive it.
//! State lives in the directory named by `MOCK_COMPOSE_STATE`:
//! - `calls.log`: one line per invocation, `<project> <subcommand> <args>`
//! - `<project>.log`: the project's aggregated "container" logs
//!
//! Services log `<service> listening on 80` when started. `run` understands
//! a few commands: `echo <words>` (stdout, also logged), `warn <words>`
//! (stderr), `sleep <secs>`, `fail`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

fn main() {
    let state = std::env::var_os("MOCK_COMPOSE_STATE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("mock-compose"));
    std::fs::create_dir_all(&state).ok();

    let mut args = std::env::args().skip(1);
    let mut project = String::from("default");
    let mut rest = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--file" | "-f" => {
                args.next();
            }
            "--project-name" | "-p" => {
                project = args.next().unwrap_or_default();
            }
            _ => {
                rest.push(arg);
                rest.extend(args.by_ref());
            }
        }
    }

    let Some((subcommand, params)) = rest.split_first() else {
        eprintln!("mock-compose: missing subcommand");
        std::process::exit(2);
    };

    let call = format!("{} {} {}", project, subcommand, params.join(" "));
    append(&state.join("calls.log"), call.trim_end());

    let log_path = state.join(format!("{}.log", project));
    let services: Vec<&String> = params.iter().filter(|p| !p.starts_with('-')).collect();

    let code = match subcommand.as_str() {
        "pull" | "build" | "kill" | "rm" => 0,
        "up" => {
            for service in services {
                append(&log_path, &format!("{}_1 | {} listening on 80", service, service));
            }
            println!("Starting {}", project);
            0
        }
        "stop" => {
            for service in services {
                append(&log_path, &format!("{}_1 | {} exited", service, service));
            }
            0
        }
        "logs" => {
            print!("{}", std::fs::read_to_string(&log_path).unwrap_or_default());
            0
        }
        "down" => {
            std::fs::remove_file(&log_path).ok();
            0
        }
        "run" => run(params, &log_path),
        other => {
            eprintln!("mock-compose: unsupported subcommand '{}'", other);
            2
        }
    };

    std::io::stdout().flush().ok();
    std::process::exit(code);
}

fn run(params: &[String], log_path: &PathBuf) -> i32 {
    let mut iter = params.iter();
    let mut service = None;
    while let Some(param) = iter.next() {
        if param == "-e" {
            if let Some(var) = iter.next() {
                eprintln!("env {}", var);
            }
            continue;
        }
        service = Some(param.clone());
        break;
    }
    let Some(service) = service else {
        eprintln!("mock-compose: run needs a service");
        return 2;
    };

    let command: Vec<&String> = iter.collect();
    let words = command
        .iter()
        .skip(1)
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    match command.first().map(|s| s.as_str()) {
        Some("echo") => {
            println!("{}", words);
            append(log_path, &format!("{}_run | {}", service, words));
            0
        }
        Some("warn") => {
            eprintln!("{}", words);
            0
        }
        Some("sleep") => {
            let secs: u64 = words.parse().unwrap_or(1);
            std::thread::sleep(Duration::from_secs(secs));
            0
        }
        Some("fail") => 1,
        _ => 0,
    }
}

fn append(path: &PathBuf, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        writeln!(file, "{}", line).ok();
    }
}
