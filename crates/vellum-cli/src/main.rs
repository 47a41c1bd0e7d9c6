//! Vellum command-line client.
//!
//! Drives a [`FileSystem`] backed by the local store, or by a real
//! directory when `--root` is given.
//!
//! Usage:
//!   # Memory mode (files live in the SQLite store)
//!   vellum write notes.txt "remember the milk"
//!   vellum tree
//!
//!   # Disk-backed mode (files live in the bound directory)
//!   vellum --root ./project status

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use vellum_vfs::{FileSystem, LocalDirectoryHandle, Node, PathState, VfsConfig};

/// Virtual file system with a local store and optional disk binding.
#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(about = "Inspect and edit a vellum virtual file system")]
struct Args {
    /// Config file (default: ~/.config/vellum/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite store, overriding config and VELLUM_DB
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Bind this directory and load it before running the command
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the whole tree
    Tree,
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Print a file
    Cat { path: String },
    /// Write a file (content from the argument, or stdin)
    Write {
        path: String,
        content: Option<String>,
    },
    /// Create an empty file
    Touch { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file or directory
    Rm { path: String },
    /// Move a file to another directory
    Mv { source: String, target: String },
    /// Rename a file or directory in place
    Rename { path: String, new_name: String },
    /// Show where every file is stored
    Status {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn load_config(args: &Args) -> Result<VfsConfig> {
    let mut config = match &args.config {
        Some(path) => VfsConfig::load(path)?,
        None => VfsConfig::load_default()?,
    };
    if let Some(db) = &args.db {
        config.store_path = Some(db.clone());
    }
    if let Some(root) = &args.root {
        config.root = Some(root.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let fs = Arc::new(FileSystem::open(&config)?);
    fs.init().await?;

    if let Some(root) = &config.root {
        let handle = LocalDirectoryHandle::open(root)
            .with_context(|| format!("cannot bind {}", root.display()))?;
        let files = fs.open_directory(Arc::new(handle)).await?;
        tracing::info!(root = %root.display(), files, "bound directory");
    }

    run(&fs, args.command).await
}

async fn run(fs: &FileSystem, command: Command) -> Result<()> {
    match command {
        Command::Tree => print_tree(&fs.get_tree(), 0),
        Command::Ls { path } => {
            let mut node = fs
                .get_file(&path)
                .with_context(|| format!("no such path: {path}"))?;
            if node.is_file() {
                println!("{}", node.name());
                return Ok(());
            }
            node.sort_children();
            for child in node.children() {
                let suffix = if child.is_dir() { "/" } else { "" };
                println!("{}{suffix}", child.name());
            }
        }
        Command::Cat { path } => {
            let node = fs
                .get_file(&path)
                .with_context(|| format!("no such file: {path}"))?;
            match node.content() {
                Some(content) => print!("{content}"),
                None => bail!("{path} is a directory"),
            }
        }
        Command::Write { path, content } => {
            let content = match content {
                Some(content) => content,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            if fs.get_file(&path).is_some() {
                let outcome = fs.update_file(&path, &content).await?;
                if let Some(e) = outcome.disk_error.as_ref().or(outcome.store_error.as_ref()) {
                    bail!("{path} saved in memory only: {e}");
                }
            } else {
                fs.create_file(&path, &content).await?;
            }
        }
        Command::Touch { path } => {
            fs.create_file(&path, "").await?;
        }
        Command::Mkdir { path } => {
            fs.create_directory(&path).await?;
        }
        Command::Rm { path } => {
            if fs.get_file(&path).is_none() {
                bail!("no such path: {path}");
            }
            if fs.directory_handle().is_some() {
                match fs.delete_file_from_disk(&path).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            fs.delete_file(&path);
        }
        Command::Mv { source, target } => {
            fs.move_file(&source, &target).await?;
        }
        Command::Rename { path, new_name } => {
            let new_path = fs.rename_entry(&path, &new_name).await?;
            println!("{new_path}");
        }
        Command::Status { json } => {
            let files: Vec<(String, PathState)> = fs
                .get_all_files()
                .iter()
                .map(|node| (node.path().to_string(), fs.state_of(node.path())))
                .collect();
            if json {
                let map: serde_json::Map<String, serde_json::Value> = files
                    .into_iter()
                    .map(|(path, state)| serde_json::to_value(state).map(|v| (path, v)))
                    .collect::<Result<_, _>>()?;
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (path, state) in files {
                    let label = match state {
                        PathState::DiskBacked => "disk",
                        PathState::MemoryOnly => "store",
                        PathState::Unbound => "-",
                    };
                    println!("{label:>5}  {path}");
                }
            }
        }
    }
    Ok(())
}

fn print_tree(node: &Node, depth: usize) {
    if depth > 0 {
        let suffix = if node.is_dir() { "/" } else { "" };
        println!("{}{}{suffix}", "  ".repeat(depth - 1), node.name());
    }
    for child in node.children() {
        print_tree(child, depth + 1);
    }
}
