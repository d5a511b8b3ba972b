use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use trigon::{
    plan, Column, Constraint, ConstraintOp, OrderBy, RocksStorage, Table, TableOptions, Value,
};

#[derive(Parser, Debug)]
pub struct Cli {
    #[clap(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index a file, or every file under a directory
    Add(AddArgs),
    /// Delete a row by id
    Rm(RmArgs),
    /// Print a row's text by id
    Get(GetArgs),
    /// Query with substr:/regexp: patterns
    Search(SearchArgs),
    /// Print table size statistics
    Stats(StatsArgs),
}

#[derive(Parser, Debug)]
pub struct AddArgs {
    pub db: PathBuf,
    pub path: PathBuf,
    #[clap(long, default_value = "docs")]
    pub table: String,
}

#[derive(Parser, Debug)]
pub struct RmArgs {
    pub db: PathBuf,
    pub id: i64,
    #[clap(long, default_value = "docs")]
    pub table: String,
}

#[derive(Parser, Debug)]
pub struct GetArgs {
    pub db: PathBuf,
    pub id: i64,
    #[clap(long, default_value = "docs")]
    pub table: String,
}

#[derive(Parser, Debug)]
pub struct SearchArgs {
    pub db: PathBuf,
    /// Patterns such as `substr:foo` or `regexp:a[bc]d`; several patterns
    /// combine by AND
    #[clap(required = true)]
    pub patterns: Vec<String>,
    #[clap(long, default_value = "docs")]
    pub table: String,
    /// Return ids in descending order
    #[clap(long)]
    pub desc: bool,
    /// Error out instead of scanning the whole table when a pattern has no
    /// trigram filter
    #[clap(long)]
    pub forbid_full_scan: bool,
}

#[derive(Parser, Debug)]
pub struct StatsArgs {
    pub db: PathBuf,
    #[clap(long, default_value = "docs")]
    pub table: String,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    match args.cmd {
        Command::Add(a) => add(a),
        Command::Rm(a) => rm(a),
        Command::Get(a) => get(a),
        Command::Search(a) => search(a),
        Command::Stats(a) => stats(a),
    }
}

fn open(db: &PathBuf, table: &str, options: TableOptions) -> Result<Table<RocksStorage>> {
    let store =
        RocksStorage::open(db, table).with_context(|| format!("open database {:?}", db))?;
    Ok(Table::new(store, options))
}

fn add(args: AddArgs) -> Result<()> {
    let mut table = open(&args.db, &args.table, TableOptions::default())?;

    let files: Vec<PathBuf> = if args.path.is_dir() {
        WalkDir::new(&args.path)
            .into_iter()
            .filter_map(|d| d.ok())
            .filter(|d| d.file_type().is_file())
            .map(|d| d.into_path())
            .collect()
    } else {
        vec![args.path.clone()]
    };

    table.begin()?;
    for file in files {
        let contents = match fs::read(&file) {
            Ok(contents) => contents,
            Err(e) => {
                println!("skipping {:?}: {}", file, e);
                continue;
            }
        };
        let id = table.insert(None, &contents)?;
        println!("{}\t{}", id, file.display());
    }
    table.commit()?;
    Ok(())
}

fn rm(args: RmArgs) -> Result<()> {
    let mut table = open(&args.db, &args.table, TableOptions::default())?;
    table.begin()?;
    table.delete(args.id)?;
    table.commit()?;
    Ok(())
}

fn get(args: GetArgs) -> Result<()> {
    let table = open(&args.db, &args.table, TableOptions::default())?;
    match table.store().read_row(args.id)? {
        Some(text) => io::stdout().write_all(&text)?,
        None => println!("no row with id {}", args.id),
    }
    Ok(())
}

fn search(args: SearchArgs) -> Result<()> {
    let table = open(
        &args.db,
        &args.table,
        TableOptions {
            forbid_full_match_scan: args.forbid_full_scan,
            ..TableOptions::default()
        },
    )?;

    let constraints: Vec<Constraint> = args
        .patterns
        .iter()
        .map(|_| Constraint {
            column: Column::Text,
            op: ConstraintOp::Match,
            usable: true,
        })
        .collect();
    let order = [OrderBy {
        column: Column::Id,
        desc: args.desc,
    }];
    let query = plan(&constraints, &order);
    let values: Vec<Value> = args
        .patterns
        .iter()
        .map(|p| Value::Text(p.clone().into_bytes()))
        .collect();

    let start = Instant::now();
    let mut cursor = table.cursor();
    cursor.filter(&query, &values)?;
    let mut count = 0usize;
    while !cursor.eof() {
        if let Some(id) = cursor.rowid() {
            if cursor.extents().is_empty() {
                println!("{}", id);
            } else {
                let spans: Vec<String> = cursor
                    .extents()
                    .iter()
                    .map(|(start, end)| format!("{}..{}", start, end))
                    .collect();
                println!("{}\t{}", id, spans.join(" "));
            }
        }
        count += 1;
        cursor.next()?;
    }
    println!("{} results in {:0.2?}", count, start.elapsed());
    Ok(())
}

fn stats(args: StatsArgs) -> Result<()> {
    let table = open(&args.db, &args.table, TableOptions::default())?;
    let stats = table.stats()?;
    println!("rows:            {}", stats.num_rows);
    println!("row bytes:       {}", bytefmt::format(stats.row_bytes as u64));
    println!("unique trigrams: {}", stats.unique_trigrams);
    println!(
        "doclist bytes:   {}",
        bytefmt::format(stats.doclist_bytes as u64)
    );
    println!(
        "pending bytes:   {}",
        bytefmt::format(stats.pending_bytes as u64)
    );
    Ok(())
}
