use anyhow::{bail, Context, Result};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table as ComfyTable};
use regex::Regex;
use std::time::Instant;
use tracing::info;

use tree_chain::config::ChainOptions;
use tree_chain::data::{ChainBuilder, Filter};
use tree_chain::source::ExtensionEngine;
use tree_chain::utils::format::format_rate;
use tree_chain::utils::logging::init_tracing;

const USAGE: &str = "\
Usage: tree-scan [OPTIONS] TABLE FILE...

Options:
  --config FILE       read chain options from FILE
  --max N             stop after N accepted rows
  --show COLUMN       print COLUMN for each accepted row (repeatable)
  --head N            print at most N rows (default 20)
  --cut EXPR          keep rows where EXPR holds, e.g. 'pt>20' (repeatable)
  --eager             read every column of every row
  --generate-config   write a commented config to the default location
";

struct Args {
    table: String,
    files: Vec<String>,
    config: Option<String>,
    max: Option<u64>,
    show: Vec<String>,
    head: usize,
    cuts: Vec<String>,
    eager: bool,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        table: String::new(),
        files: Vec::new(),
        config: None,
        max: None,
        show: Vec::new(),
        head: 20,
        cuts: Vec::new(),
        eager: false,
    };
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{flag} expects a value"))
        };
        match arg.as_str() {
            "--config" => parsed.config = Some(value("--config")?),
            "--max" => parsed.max = Some(value("--max")?.parse().context("--max expects a number")?),
            "--show" => parsed.show.push(value("--show")?),
            "--head" => parsed.head = value("--head")?.parse().context("--head expects a number")?,
            "--cut" => parsed.cuts.push(value("--cut")?),
            "--eager" => parsed.eager = true,
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n\n{USAGE}"),
            _ => positional.push(arg.clone()),
        }
    }
    if positional.len() < 2 {
        bail!("expected a table name and at least one file\n\n{USAGE}");
    }
    parsed.table = positional.remove(0);
    parsed.files = positional;
    Ok(parsed)
}

/// Build a filter from `column<op>number`
fn parse_cut(expr: &str) -> Result<Filter> {
    let pattern = Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(<=|>=|==|!=|<|>)\s*(-?[0-9.eE+-]+)\s*$")?;
    let caps = pattern
        .captures(expr)
        .with_context(|| format!("cannot parse cut `{expr}`"))?;
    let column = caps[1].to_string();
    let op = caps[2].to_string();
    let threshold: f64 = caps[3]
        .parse()
        .with_context(|| format!("bad number in cut `{expr}`"))?;

    Ok(Filter::from_fn(expr.trim(), move |row| {
        let value = row.get_f64(&column)?;
        Ok(match op.as_str() {
            "<" => value < threshold,
            "<=" => value <= threshold,
            ">" => value > threshold,
            ">=" => value >= threshold,
            "==" => value == threshold,
            _ => value != threshold,
        })
    }))
}

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--generate-config") {
        let path = ChainOptions::get_config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, ChainOptions::create_default_with_comments())?;
        println!("Configuration file created at: {:?}", path);
        return Ok(());
    }
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print!("{USAGE}");
        return Ok(());
    }

    let args = parse_args(&args)?;
    let mut options = match &args.config {
        Some(path) => ChainOptions::load(path)?,
        None => ChainOptions::load_default()?,
    };
    if let Some(max) = args.max {
        options.max_events = Some(max);
    }
    if args.eager {
        options.read_on_demand = false;
    }

    let mut builder = ChainBuilder::new(&args.table, ExtensionEngine::new()).options(options);
    for cut in &args.cuts {
        builder = builder.filter(parse_cut(cut)?);
    }
    let mut chain = builder
        .files(args.files.iter().cloned())
        .with_context(|| format!("Failed to open `{}`", args.table))?;

    let mut display = ComfyTable::new();
    display
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    let mut header = vec!["entry".to_string()];
    header.extend(args.show.iter().cloned());
    display.set_header(header);

    let started = Instant::now();
    let mut shown = 0;
    while let Some(row) = chain.next_row()? {
        if shown >= args.head || args.show.is_empty() {
            continue;
        }
        let mut cells = vec![row.entry().to_string()];
        for column in &args.show {
            cells.push(row.get(column)?.to_string());
        }
        display.add_row(cells);
        shown += 1;
    }

    let stats = chain.stats().clone();
    info!(
        "{}",
        format_rate(stats.rows_read, started.elapsed().as_secs_f64())
    );
    if shown > 0 {
        println!("{display}");
    }
    println!(
        "{} files opened, {} skipped, {} rows read, {} accepted",
        stats.files_opened, stats.files_skipped, stats.rows_read, stats.rows_passed
    );
    if !chain.filters().is_empty() {
        println!("{}", chain.filters().cutflow_table());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(&strings(&[
            "--max", "5", "--show", "pt", "events", "a.json", "b.json",
        ]))
        .unwrap();
        assert_eq!(args.table, "events");
        assert_eq!(args.files, vec!["a.json", "b.json"]);
        assert_eq!(args.max, Some(5));
        assert_eq!(args.show, vec!["pt"]);
        assert!(parse_args(&strings(&["events"])).is_err());
        assert!(parse_args(&strings(&["--bogus", "events", "a.json"])).is_err());
    }

    #[test]
    fn test_parse_cut() {
        assert_eq!(parse_cut("pt > 20").unwrap().name(), "pt > 20");
        assert!(parse_cut("pt ~ 20").is_err());
    }
}
