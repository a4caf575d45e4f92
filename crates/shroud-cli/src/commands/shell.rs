//! Shell command - interactive navigation and editing of a store's
//! manifest.
//!
//! All mutations go through the manifest's public operations and are
//! committed immediately, so the on-disk store is consistent after every
//! command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use shroud_core::manifest::{DirectoryListing, LogicalPath, Manifest, PathError};
use shroud_core::StoreKey;

#[derive(ClapArgs)]
pub struct Args {
    /// Store root to browse
    pub store: PathBuf,
}

pub fn execute(args: &Args, key: &StoreKey) -> Result<()> {
    let manifest = Manifest::open(&args.store, key)
        .with_context(|| format!("failed to open store at {}", args.store.display()))?;
    println!("Found {} files in the store", manifest.file_count());

    let mut editor = DefaultEditor::new()?;
    let mut current = LogicalPath::root();
    let mut previous = LogicalPath::root();

    loop {
        let line = match editor.readline("shroud> ") {
            Ok(line) => line,
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = editor.add_history_entry(&line);

        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let arg = parts.next();

        match command {
            "exit" | "quit" => {
                println!("Bye!");
                break;
            }
            "pwd" => println!("You are at: {current}"),
            "ls" => match manifest.find_directory(&current) {
                Some(listing) => print_listing(&listing),
                None => println!("Current directory no longer exists"),
            },
            "cd" => {
                let Some(destination) = arg else {
                    println!("Usage: cd <dir> | cd .. | cd - | cd .");
                    continue;
                };
                change_directory(&manifest, &mut current, &mut previous, destination);
            }
            "mkdir" => {
                let Some(name) = arg else {
                    println!("Usage: mkdir <dir>");
                    continue;
                };
                match resolve(&current, name) {
                    Ok(path) => {
                        manifest.create_directory_if_absent(&path);
                        commit(&manifest, key)?;
                        println!("Created directory {path}");
                    }
                    Err(e) => println!("Invalid path: {e}"),
                }
            }
            "rm" => {
                let recursive = arg == Some("-r");
                let target = if recursive { parts.next() } else { arg };
                let Some(target) = target else {
                    println!("Usage: rm <file> | rm -r <dir>");
                    continue;
                };
                match resolve(&current, target) {
                    Ok(path) => remove(&manifest, key, &path, recursive)?,
                    Err(e) => println!("Invalid path: {e}"),
                }
            }
            "clean" | "commit" => {
                let result = commit(&manifest, key)?;
                println!(
                    "Quarantined {} orphaned files, dropped {} dangling entries",
                    result.orphaned, result.dangling
                );
            }
            _ => println!("Unknown command: {command}"),
        }
    }
    Ok(())
}

fn print_listing(listing: &DirectoryListing) {
    for dir in &listing.directories {
        println!("[{dir}]");
    }
    for file in &listing.files {
        println!("{}", file.name);
    }
}

fn change_directory(
    manifest: &Manifest,
    current: &mut LogicalPath,
    previous: &mut LogicalPath,
    destination: &str,
) {
    let target = match destination {
        "-" => previous.clone(),
        "." => return,
        ".." => match current.parent() {
            Some(parent) => parent,
            None => {
                println!("You are already at the root");
                return;
            }
        },
        raw => match resolve(current, raw) {
            Ok(path) => path,
            Err(e) => {
                println!("Invalid path: {e}");
                return;
            }
        },
    };
    if manifest.find_directory(&target).is_none() {
        println!("Destination {target} does not exist");
        return;
    }
    *previous = std::mem::replace(current, target);
    println!("You are at: {current}");
}

fn remove(
    manifest: &Manifest,
    key: &StoreKey,
    path: &LogicalPath,
    recursive: bool,
) -> Result<()> {
    let removed = if recursive {
        manifest.remove_directory(path)
    } else {
        manifest.remove_file(path)
    };
    if removed {
        let result = commit(manifest, key)?;
        println!("Removed {path}");
        if result.orphaned > 0 || result.dangling > 0 {
            println!(
                "Quarantined {} orphaned files, dropped {} dangling entries",
                result.orphaned, result.dangling
            );
        }
    } else if recursive {
        println!("No directory exists at {path}");
    } else {
        println!("No file exists at {path}");
    }
    Ok(())
}

fn commit(manifest: &Manifest, key: &StoreKey) -> Result<shroud_core::CommitResult> {
    manifest.commit(key).context("commit failed")
}

/// Resolve a user-typed path against the current directory: leading `/`
/// restarts at the root, `..` climbs, `.` and empty segments are ignored.
fn resolve(current: &LogicalPath, raw: &str) -> Result<LogicalPath, PathError> {
    let mut out = if raw.starts_with('/') {
        LogicalPath::root()
    } else {
        current.clone()
    };
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => out = out.parent().unwrap_or_else(LogicalPath::root),
            segment => out = out.join(segment)?,
        }
    }
    Ok(out)
}
