// CLI surface: flag parsing and the pieces of argument handling that do not
// touch the network (host normalisation, `~` expansion).

use crate::api::DEFAULT_PORT;
use clap::Parser;
use std::path::PathBuf;

/// List, download, upload and delete books on a WiFi Book Transfer appliance.
#[derive(Parser, Debug)]
#[command(name = "booktransfer", version)]
pub struct Cli {
    /// Delete the book given by name or index number (asks for confirmation)
    #[arg(short = 'd', long = "delete", value_name = "NAME_OR_INDEX")]
    pub delete: Option<String>,

    /// Download the book given by name or index number
    #[arg(short = 'g', long = "download", value_name = "NAME_OR_INDEX")]
    pub download: Option<String>,

    /// Directory to save the download into
    #[arg(short = 'o', long = "output", value_name = "DIRECTORY", default_value = ".")]
    pub output: String,

    /// Upload one or more files (e.g. book.pdf or book1.pdf book2.epub)
    #[arg(short = 'u', long = "upload", value_name = "FILE", num_args = 1..)]
    pub upload: Vec<String>,

    /// Appliance address (IP, IP:PORT or URL). Scans the local network when absent
    #[arg(short = 'H', long = "host", value_name = "IP", env = "BOOK_TRANSFER_HOST")]
    pub host: Option<String>,

    /// Service port used for discovery and for a host given without one
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

/// What the workflows need from the command line, with paths expanded.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub delete: Option<String>,
    pub download: Option<String>,
    pub output: PathBuf,
    pub upload: Vec<PathBuf>,
}

impl Cli {
    pub fn request(&self) -> Request {
        Request {
            delete: self.delete.clone(),
            download: self.download.clone(),
            output: expand_home(&self.output),
            upload: self.upload.iter().map(|p| expand_home(p.trim())).collect(),
        }
    }

    /// Base URL for an explicitly given host, if any.
    pub fn base_url(&self) -> Option<String> {
        self.host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|h| base_url_for(h, self.port))
    }
}

/// `10.0.0.2` -> `http://10.0.0.2:<port>`; `10.0.0.2:9000` and full URLs are
/// kept as given.
pub fn base_url_for(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.trim_end_matches('/').to_string();
    }
    if host.contains(':') {
        format!("http://{}", host)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
