//! `Resolver` backed by the streamlink CLI.
//!
//! `streamlink --json <url>` prints the available variants:
//!
//! ```text
//! { "plugin": "youtube",
//!   "streams": { "360p": { "type": "hls", "url": "https://…/index.m3u8",
//!                          "headers": { "User-Agent": "…" } }, … } }
//! ```
//!
//! or `{ "error": "No plugin can handle URL: …" }`.  A variant is opened with a
//! plain blocking HTTP GET of its url; the response body is the byte stream.
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::probe::{ProbeError, Resolver, Variant, VariantSet};

#[derive(Debug, Deserialize)]
struct StreamlinkOutput {
    #[serde(default)]
    streams: HashMap<String, StreamlinkStream>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamlinkStream {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

pub struct StreamlinkResolver {
    binary: PathBuf,
    timeout: Duration,
}

impl StreamlinkResolver {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Run the CLI with a deadline; kill it if it overstays.  Stdout is
    /// drained on its own thread so a large document cannot fill the pipe
    /// and stall the child.
    fn run_json(&self, url: &str) -> Result<String, ProbeError> {
        let mut child = Command::new(&self.binary)
            .arg("--json")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ProbeError::Resolve(format!("failed to spawn {}: {}", self.binary.display(), e))
            })?;

        let (out_tx, out_rx) = mpsc::channel::<io::Result<String>>();
        if let Some(mut stdout) = child.stdout.take() {
            std::thread::spawn(move || {
                let mut out = String::new();
                let res = stdout.read_to_string(&mut out).map(|_| out);
                let _ = out_tx.send(res);
            });
        } else {
            let _ = out_tx.send(Ok(String::new()));
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("resolver: streamlink exited {} for {}", status, url);
                    break;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!("resolver: streamlink timed out after {:?} for {}", self.timeout, url);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProbeError::Resolve("resolver timed out".to_string()));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProbeError::Resolve(e.to_string()));
                }
            }
        }

        // A leftover grandchild may still hold the pipe open
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(500));
        match out_rx.recv_timeout(remaining) {
            Ok(res) => Ok(res?),
            Err(_) => Err(ProbeError::Resolve("resolver output not closed".to_string())),
        }
    }
}

impl Resolver for StreamlinkResolver {
    fn resolve(&self, url: &str) -> Result<VariantSet, ProbeError> {
        let raw = self.run_json(url)?;
        parse_streamlink_json(&raw, self.timeout)
    }
}

/// Turn `streamlink --json` output into openable variants.  Variants
/// without a direct url (e.g. muxed streams) are skipped.
pub fn parse_streamlink_json(raw: &str, timeout: Duration) -> Result<VariantSet, ProbeError> {
    let parsed: StreamlinkOutput = serde_json::from_str(raw.trim())
        .map_err(|e| ProbeError::Resolve(format!("invalid resolver output: {}", e)))?;

    if let Some(err) = parsed.error {
        return Err(ProbeError::Resolve(err));
    }

    let mut set = VariantSet::new();
    for (label, stream) in parsed.streams {
        let Some(url) = stream.url else {
            debug!("resolver: skipping {} variant {} without url", stream.kind, label);
            continue;
        };
        set.insert(
            label,
            Box::new(HttpVariant {
                timeout,
                url,
                headers: stream.headers,
            }),
        );
    }
    Ok(set)
}

/// The blocking client lives only as long as one open, on the worker thread
/// that runs the probe.
struct HttpVariant {
    timeout: Duration,
    url: String,
    headers: HashMap<String, String>,
}

impl Variant for HttpVariant {
    fn open(&self) -> Result<Box<dyn Read + Send>, ProbeError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProbeError::Open(e.to_string()))?;
        let mut request = client.get(&self.url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProbeError::Open(e.to_string()))?;
        Ok(Box::new(response))
    }
}

/// Render the variants a resolver offers, for logs.
pub fn describe(set: &VariantSet) -> String {
    let mut labels: Vec<&str> = set.keys().map(String::as_str).collect();
    labels.sort();
    labels.join(",")
}
