// Copyright (c) 2024-present, levelkv contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Command dispatcher for the single-letter DSL described in spec.md §6:
//! `p K V` (put), `g K` (get), `r LO HI` (range), `d K` (delete),
//! `l FILE` (load), `s` (stat), `q` (quit). This binary is an external
//! collaborator of the core tree — it only ever calls through
//! [`levelkv::Tree`]'s public API.

use clap::Parser;
use levelkv::{Config, Int, Tree};
use rustyline::DefaultEditor;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lsmctl", about = "Drive a levelkv tree with the put/get/range DSL")]
struct Args {
    /// Tree name; disk level files are named `<name>.level<i>.bin`.
    #[arg(long, default_value = "lsmctl")]
    name: String,

    /// Directory holding disk-level files.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Comma-separated per-level capacities, shallow to deep.
    #[arg(long, value_delimiter = ',', default_values_t = vec![4, 7, 13, 10])]
    capacities: Vec<usize>,

    /// Count of in-memory levels at the shallow end.
    #[arg(long, default_value_t = 4)]
    main_levels: usize,

    /// Read commands from FILE instead of starting an interactive REPL.
    #[arg(short = 'f', long)]
    script: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let tree = match Config::new(args.name, args.data_dir)
        .levels(args.capacities)
        .main_levels(args.main_levels)
        .open()
    {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("failed to open tree: {e}");
            std::process::exit(1);
        }
    };

    let code = match args.script {
        Some(path) => run_script(&tree, &path),
        None => run_repl(&tree),
    };

    std::process::exit(code);
}

fn run_script(tree: &Tree, path: &std::path::Path) -> i32 {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("cannot open script {}: {e}", path.display());
            return 1;
        }
    };

    for line in std::io::BufReader::new(file).lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("read error: {e}");
                return 1;
            }
        };

        match dispatch(tree, &line) {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Quit) => return 0,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    0
}

fn run_repl(tree: &Tree) -> i32 {
    if !std::io::stdin().is_terminal() {
        // Not a tty (piped input): behave like run_script against stdin.
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            match dispatch(tree, &line) {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Quit) => return 0,
                Err(e) => eprintln!("error: {e}"),
            }
        }
        return 0;
    }

    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to start line editor: {e}");
            return 1;
        }
    };

    loop {
        match editor.readline("lsmctl> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                match dispatch(tree, &line) {
                    Ok(Outcome::Continue) => {}
                    Ok(Outcome::Quit) => return 0,
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(_) => return 0, // Ctrl-D / Ctrl-C
        }
    }
}

enum Outcome {
    Continue,
    Quit,
}

fn dispatch(tree: &Tree, line: &str) -> Result<Outcome, String> {
    let mut tokens = line.split_whitespace();
    let Some(cmd) = tokens.next() else {
        return Ok(Outcome::Continue);
    };

    match cmd {
        "p" => {
            let (k, v) = (parse_int(tokens.next())?, parse_int(tokens.next())?);
            tree.put(k, v).map_err(|e| e.to_string())?;
        }
        "g" => {
            let k = parse_int(tokens.next())?;
            match tree.get(k).map_err(|e| e.to_string())? {
                Some(v) => println!("{v}"),
                None => println!(),
            }
        }
        "r" => {
            let (lo, hi) = (parse_int(tokens.next())?, parse_int(tokens.next())?);
            let mut results = tree.range(lo, hi).map_err(|e| e.to_string())?;
            results.sort_unstable();
            let line = results
                .into_iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
        "d" => {
            let k = parse_int(tokens.next())?;
            tree.delete(k).map_err(|e| e.to_string())?;
        }
        "l" => {
            let path = tokens.next().ok_or("l requires a FILE argument")?;
            tree.load(path).map_err(|e| e.to_string())?;
        }
        "s" => {
            print!("{}", tree.stat().map_err(|e| e.to_string())?);
        }
        "q" => return Ok(Outcome::Quit),
        other => return Err(format!("unrecognized command {other:?}")),
    }

    Ok(Outcome::Continue)
}

fn parse_int(token: Option<&str>) -> Result<Int, String> {
    token
        .ok_or_else(|| "missing argument".to_string())?
        .parse::<Int>()
        .map_err(|e| format!("invalid integer: {e}"))
}
