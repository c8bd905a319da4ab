//! Static log corpora and file helpers used across harnesses.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key/value lines prefixed with a timestamp in the default layout.
pub const CORPUS_KV: &[&str] = &[
    "2023/05/01 12:00:00 user=alice action=login",
    "2023/05/01 12:00:01 user=bob action=view page=home",
    "2023/05/01 12:00:02.250 user=alice action=logout",
    "2023/05/01 12:00:03 level=warn msg=slow latency=412",
];

/// Lines with no timestamp and no key/value pairs.
pub const CORPUS_UNSTRUCTURED: &[&str] = &[
    "Starting application version 2.4.1",
    "Failed to connect to database after 3 retries",
    "GET /api/v1/users 200 47ms",
];

/// Join `lines` into newline-terminated file content.
pub fn lines(lines: &[&str]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Write `content` to `dir/name` and return the path.
pub fn write_log(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Append `content` to an existing file.
pub fn append_log(path: &Path, content: &str) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
