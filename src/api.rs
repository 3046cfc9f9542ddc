// API client module: a small blocking HTTP client that talks to the book
// transfer appliance. Every call carries its own time limit because transfers
// go over a local/wireless network with unpredictable latency. Listing and
// delete are bounded end to end; downloads and uploads are bounded by how
// long the connection may go without progress, so a large book on a slow
// link still completes.

use anyhow::{anyhow, bail, Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::debug;

/// Port the appliance listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8080;

pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const CHUNK_SIZE: usize = 8192;

/// Extensions the appliance accepts for upload (matched case-insensitively).
pub const SUPPORTED_FORMATS: &[&str] = &[
    "epub", "txt", "pdf", "mobi", "azw", "azw3", "fb2", "doc", "docx", "htm", "html", "cbz",
    "cbt", "cbr", "jvu", "djvu", "djv", "rtf", "zip", "rar",
];

// Everything but ASCII alphanumerics and `-._~` is escaped in a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// The `fileName` form field keeps `/` as is.
const FORM_VALUE: &AsciiSet = &PATH_SEGMENT.remove(b'/');

/// Time limits per operation. `list` and `delete` cover the whole call;
/// `download` and `upload` are the longest the transfer may sit idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub list: Duration,
    pub download: Duration,
    pub upload: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            list: LIST_TIMEOUT,
            download: DOWNLOAD_TIMEOUT,
            upload: UPLOAD_TIMEOUT,
            delete: DELETE_TIMEOUT,
        }
    }
}

/// One entry of the remote catalog. `size` is whatever the server sent
/// (usually a human string like "1.2 MB", sometimes a number).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: serde_json::Value,
}

impl RemoteFile {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "?"
        } else {
            &self.name
        }
    }

    pub fn display_size(&self) -> String {
        match &self.size {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Blocking client bound to one appliance base URL (`http://host:port`).
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    timeouts: Timeouts,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // No client-wide deadline: the blocking client's default of 30s would
        // otherwise cut off every transfer that takes longer than that.
        let client = Client::builder()
            .timeout(None)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(ApiClient {
            client,
            base_url,
            timeouts: Timeouts::default(),
        })
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base_url, encode_path_segment(name))
    }

    /// GET `/files?<millis>` and parse the JSON array. The timestamp query
    /// keeps intermediary caches from serving a stale listing.
    pub fn fetch_catalog(&self) -> Result<Vec<RemoteFile>> {
        let url = format!("{}?{}", self.files_url(), unix_millis());
        debug!(%url, "fetching catalog");
        let res = self
            .client
            .get(&url)
            .timeout(self.timeouts.list)
            .send()
            .with_context(|| format!("Failed to connect to {}", self.base_url))?
            .error_for_status()
            .with_context(|| format!("Listing request to {} failed", self.base_url))?;
        let files: Vec<RemoteFile> = res.json().context("Failed to parse catalog JSON")?;
        debug!(count = files.len(), "catalog fetched");
        Ok(files)
    }

    /// Stream `/files/<name>` into `dest_dir/name`, replacing any existing
    /// file. The body goes to a temporary file in `dest_dir` that only takes
    /// the final name once the whole body has arrived.
    pub fn download_file(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        if !is_plain_file_name(name) {
            bail!("Refusing to save '{}': not a plain file name", name);
        }
        let url = self.file_url(name);
        debug!(%url, "downloading");
        let idle = self.timeouts.download;
        let failed = || format!("Failed to download '{}'", name);

        let rx = spawn_download(self.client.get(&url));
        let Download::Head(head) = recv_idle(&rx, idle).with_context(failed)? else {
            bail!("Failed to download '{}': no response", name);
        };
        let status = head.with_context(failed)?;
        if !status.is_success() {
            bail!("Failed to download '{}': server answered {}", name, status);
        }

        let path = dest_dir.join(name);
        let save_failed = || format!("Failed to save '{}' to {}", name, path.display());
        let mut tmp = NamedTempFile::new_in(dest_dir).with_context(save_failed)?;
        let mut written = 0u64;
        loop {
            match recv_idle(&rx, idle).with_context(failed)? {
                Download::Data(chunk) => {
                    tmp.write_all(&chunk).with_context(save_failed)?;
                    written += chunk.len() as u64;
                }
                Download::Done => break,
                Download::Failed(e) => return Err(e).with_context(failed),
                Download::Head(_) => bail!("Failed to download '{}': unexpected response", name),
            }
        }
        tmp.persist(&path).with_context(save_failed)?;
        debug!(bytes = written, path = %path.display(), "download finished");
        Ok(path)
    }

    /// Multipart POST to `/files` with the content under `newfile` and the
    /// encoded name under `fileName`. The local checks run before any request.
    pub fn upload_file(&self, local_path: &Path) -> Result<String> {
        let name = validate_upload(local_path)?;
        let failed = || format!("Failed to upload '{}'", name);

        let file = File::open(local_path)
            .with_context(|| format!("Failed to read '{}'", local_path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("Failed to read '{}'", local_path.display()))?
            .len();

        let (tx, rx) = mpsc::sync_channel(1);
        let body = Watched {
            inner: file,
            tx: tx.clone(),
        };
        let part = multipart::Part::reader_with_length(body, len).file_name(name.clone());
        let form = multipart::Form::new()
            .text("fileName", encode_form_value(&name))
            .part("newfile", part);

        debug!(url = %self.files_url(), %name, "uploading");
        let request = self.client.post(self.files_url()).multipart(form);
        thread::spawn(move || {
            let _ = tx.send(Upload::Finished(request.send()));
        });

        let idle = self.timeouts.upload;
        let res = loop {
            match recv_idle(&rx, idle).with_context(failed)? {
                Upload::Progress => continue,
                Upload::Finished(res) => break res.with_context(failed)?,
            }
        };
        if !res.status().is_success() {
            bail!("Failed to upload '{}': server answered {}", name, res.status());
        }
        Ok(name)
    }

    /// POST `_method=delete` to `/files/<name>`; the appliance has no DELETE verb.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let url = self.file_url(name);
        debug!(%url, "deleting");
        let res = self
            .client
            .post(&url)
            .timeout(self.timeouts.delete)
            .form(&[("_method", "delete")])
            .send()
            .with_context(|| format!("Failed to delete '{}'", name))?;
        if !res.status().is_success() {
            bail!("Failed to delete '{}': server answered {}", name, res.status());
        }
        Ok(())
    }
}

// Transfers run on a helper thread that reports through a channel, so the
// caller can give up once nothing has happened for the idle limit. A thread
// left behind after such a timeout ends when its connection does.

enum Download {
    Head(reqwest::Result<StatusCode>),
    Data(Vec<u8>),
    Failed(io::Error),
    Done,
}

enum Upload {
    Progress,
    Finished(reqwest::Result<Response>),
}

fn spawn_download(request: RequestBuilder) -> Receiver<Download> {
    let (tx, rx) = mpsc::sync_channel(16);
    thread::spawn(move || {
        let mut res = match request.send() {
            Ok(res) => res,
            Err(e) => {
                let _ = tx.send(Download::Head(Err(e)));
                return;
            }
        };
        let status = res.status();
        if tx.send(Download::Head(Ok(status))).is_err() || !status.is_success() {
            return;
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let msg = match res.read(&mut buf) {
                Ok(0) => Download::Done,
                Ok(n) => Download::Data(buf[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => Download::Failed(e),
            };
            let last = !matches!(msg, Download::Data(_));
            if tx.send(msg).is_err() || last {
                return;
            }
        }
    });
    rx
}

/// Upload body that signals every read, which is what keeps an upload alive.
struct Watched<R> {
    inner: R,
    tx: SyncSender<Upload>,
}

impl<R: Read> Read for Watched<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        // A full channel already holds a progress mark.
        let _ = self.tx.try_send(Upload::Progress);
        Ok(n)
    }
}

fn recv_idle<T>(rx: &Receiver<T>, idle: Duration) -> Result<T> {
    rx.recv_timeout(idle).map_err(|e| match e {
        RecvTimeoutError::Timeout => anyhow!("no data for {:?}", idle),
        RecvTimeoutError::Disconnected => anyhow!("transfer ended unexpectedly"),
    })
}

/// True for a single normal path component: no separators, no `..`, not
/// absolute. Server-supplied names must pass this before they touch disk.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Checks that `path` is an existing regular file with a supported
/// extension and returns the remote name (its basename).
pub fn validate_upload(path: &Path) -> Result<String> {
    if !path.is_file() {
        bail!("File '{}' does not exist.", path.display());
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("Invalid file name: {}", path.display()))?;
    if !is_supported_format(&name) {
        bail!("Unsupported format: {}", name);
    }
    Ok(name)
}

pub fn is_supported_format(name: &str) -> bool {
    let lower = name.to_lowercase();
    SUPPORTED_FORMATS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{}", ext)))
}

pub fn encode_path_segment(name: &str) -> String {
    utf8_percent_encode(name, PATH_SEGMENT).to_string()
}

pub fn encode_form_value(name: &str) -> String {
    utf8_percent_encode(name, FORM_VALUE).to_string()
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_formats_ignore_case() {
        assert!(is_supported_format("book.pdf"));
        assert!(is_supported_format("Book.EPUB"));
        assert!(is_supported_format("comic.Cbz"));
        assert!(is_supported_format("novel.azw3"));
    }

    #[test]
    fn unsupported_formats_are_rejected() {
        assert!(!is_supported_format("photo.jpg"));
        assert!(!is_supported_format("archive.tar.gz"));
        assert!(!is_supported_format("pdf"));
        assert!(!is_supported_format("notes.pdf.bak"));
    }

    #[test]
    fn path_segment_escapes_everything_but_unreserved() {
        assert_eq!(encode_path_segment("a b.pdf"), "a%20b.pdf");
        assert_eq!(encode_path_segment("x/y"), "x%2Fy");
        assert_eq!(encode_path_segment("a-b_c~d.epub"), "a-b_c~d.epub");
        assert_eq!(encode_path_segment("año.txt"), "a%C3%B1o.txt");
        assert_eq!(encode_path_segment("q?&#.pdf"), "q%3F%26%23.pdf");
    }

    #[test]
    fn form_value_keeps_slash() {
        assert_eq!(encode_form_value("x/y z"), "x/y%20z");
    }

    #[test]
    fn remote_file_accepts_string_or_number_size() {
        let files: Vec<RemoteFile> = serde_json::from_str(
            r#"[{"name":"a.pdf","size":"1MB"},{"name":"b.epub","size":2048},{"size":"3MB"}]"#,
        )
        .unwrap();
        assert_eq!(files[0].display_size(), "1MB");
        assert_eq!(files[1].display_size(), "2048");
        assert_eq!(files[2].display_name(), "?");
    }

    #[test]
    fn missing_upload_file_is_reported() {
        let err = validate_upload(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn plain_file_names() {
        assert!(is_plain_file_name("book.pdf"));
        assert!(is_plain_file_name("my book (2).epub"));
        assert!(!is_plain_file_name("../book.pdf"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("/etc/passwd"));
        assert!(!is_plain_file_name("sub/book.pdf"));
        assert!(!is_plain_file_name(""));
    }

    #[test]
    fn default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.list, Duration::from_secs(10));
        assert_eq!(t.download, Duration::from_secs(30));
        assert_eq!(t.upload, Duration::from_secs(120));
        assert_eq!(t.delete, Duration::from_secs(10));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = ApiClient::new("http://10.0.0.2:8080/").unwrap();
        assert_eq!(api.base_url(), "http://10.0.0.2:8080");
        assert_eq!(api.file_url("a b"), "http://10.0.0.2:8080/files/a%20b");
    }
}
