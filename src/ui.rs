// UI layer: the list/upload/delete/download workflows. The catalog is
// fetched once at the start of a run and every token is resolved against
// that snapshot; nothing here refreshes it after a remote change.

use crate::api::{ApiClient, RemoteFile};
use crate::catalog::resolve;
use crate::cli::Request;
use anyhow::{bail, Context, Result};
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Answers accepted as "yes" by the delete confirmation (case-insensitive).
pub const AFFIRMATIVE: &[&str] = &["y", "yes", "s", "si", "sí"];

pub const USAGE_HELP: &str = "
Usage:
  booktransfer                    List books (this output)
  booktransfer -g 3               Download book by index
  booktransfer -g \"book.pdf\"      Download book by name
  booktransfer -g 1 -o ~/books    Download to specific directory
  booktransfer -u book.pdf        Upload a file
  booktransfer -u f1.pdf f2.epub  Upload multiple files
  booktransfer -d 5               Delete book by index (asks confirmation)
  booktransfer -d \"book.pdf\"      Delete book by name
  booktransfer -H 192.168.1.196   Skip the network scan
  booktransfer -h                 Show full help
";

/// Source of answers for interactive questions.
pub trait Prompter {
    fn ask(&mut self, prompt: &str) -> Result<String>;
}

/// Asks on the terminal with `dialoguer`; reads a plain line when stdin is
/// piped so `echo y | booktransfer -d 1` works.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        if std::io::stdin().is_terminal() {
            let answer: String = Input::new()
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
                .context("Failed to read answer")?;
            return Ok(answer);
        }
        print!("{}: ", prompt);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read answer")?;
        Ok(line)
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    AFFIRMATIVE.contains(&answer.as_str())
}

/// `  1. name  (size)` per entry, 1-based.
pub fn format_listing(catalog: &[RemoteFile]) -> String {
    let mut out = format!("Books found ({}):\n\n", catalog.len());
    for (i, file) in catalog.iter().enumerate() {
        out.push_str(&format!(
            "  {}. {}  ({})\n",
            i + 1,
            file.display_name(),
            file.display_size()
        ));
    }
    out
}

fn spinner(msg: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Fetch the listing; a failure is reported and treated as an empty catalog.
pub fn load_catalog(api: &ApiClient) -> Vec<RemoteFile> {
    match api.fetch_catalog() {
        Ok(files) => files,
        Err(e) => {
            debug!(error = %e, "catalog fetch failed");
            eprintln!("Error: {:#}", e);
            Vec::new()
        }
    }
}

/// Upload `paths` in order, stopping at the first failure.
pub fn upload_all(api: &ApiClient, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        println!("\nUploading '{}'...", path.display());
        let pb = spinner(format!("Uploading {}", path.display()));
        let res = api.upload_file(path);
        pb.finish_and_clear();
        let name = res?;
        println!("✓ Uploaded: {}", name);
    }
    Ok(())
}

/// Delete the book `token` refers to after the user confirms. Returns
/// whether the delete was carried out; a declined prompt is not an error.
pub fn delete_book(
    api: &ApiClient,
    catalog: &[RemoteFile],
    token: &str,
    prompter: &mut dyn Prompter,
) -> Result<bool> {
    let name = resolve(token, catalog)?;
    let answer = prompter.ask(&format!("\nDelete '{}'? [y/N]", name))?;
    if !is_affirmative(&answer) {
        println!("Cancelled.");
        return Ok(false);
    }
    api.delete_file(name)?;
    println!("✓ Deleted: {}", name);
    Ok(true)
}

/// Download the book `token` refers to into `output`, which must already
/// exist. Returns the saved path.
pub fn download_book(
    api: &ApiClient,
    catalog: &[RemoteFile],
    token: &str,
    output: &Path,
) -> Result<PathBuf> {
    let name = resolve(token, catalog)?;
    if !output.is_dir() {
        bail!("Directory '{}' does not exist.", output.display());
    }
    println!("\nDownloading '{}'...", name);
    let pb = spinner(format!("Downloading {}", name));
    let res = api.download_file(name, output);
    pb.finish_and_clear();
    let path = res?;
    println!("✓ Saved: {}", path.display());
    Ok(path)
}

/// Run one invocation: list, then upload, delete and download as requested.
pub fn run(api: &ApiClient, req: &Request, prompter: &mut dyn Prompter) -> Result<()> {
    println!("Fetching book list from {}...\n", api.base_url());
    let catalog = load_catalog(api);

    if catalog.is_empty() && req.upload.is_empty() {
        bail!("No books found.");
    }
    if !catalog.is_empty() {
        print!("{}", format_listing(&catalog));
        print!("{}", USAGE_HELP);
    }

    upload_all(api, &req.upload)?;

    // Both tokens resolve against the listing fetched above, so a delete
    // earlier in this run is not visible to the download below.
    if let Some(token) = &req.delete {
        delete_book(api, &catalog, token, prompter)?;
    }
    if let Some(token) = &req.download {
        download_book(api, &catalog, token, &req.output)?;
    }
    Ok(())
}
