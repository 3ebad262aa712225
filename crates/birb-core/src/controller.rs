//! Start/stop semantics for the stream proxy on top of one `ProxyProcess`.
//!
//! The controller keeps the `playing` flags of the list in step with the
//! process: at most one entry is flagged, and only while its launch is the
//! current one.
use birb_proto::platform::proxy_url;
use birb_proto::protocol::{StreamEntry, StreamId};
use tracing::{debug, info, warn};

use crate::process::ProxyProcess;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The proxy is starting; `ProxyReady` follows once it listens.
    Started {
        id: StreamId,
        launch: u64,
        /// Entry whose playing flag was cleared to make room.
        stopped: Option<StreamId>,
    },
    /// Nothing was touched.
    Refused { reason: String },
}

#[derive(Debug, Clone, Copy)]
struct Launch {
    launch: u64,
    id: StreamId,
    ready: bool,
}

pub struct StreamProxyController<P: ProxyProcess> {
    process: P,
    port: u16,
    preferences: Vec<String>,
    current: Option<Launch>,
}

impl<P: ProxyProcess> StreamProxyController<P> {
    pub fn new(process: P, port: u16, preferences: Vec<String>) -> Self {
        Self {
            process,
            port,
            preferences,
            current: None,
        }
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    /// Stream being proxied, ready or not.
    pub fn playing(&self) -> Option<StreamId> {
        self.current.map(|l| l.id)
    }

    pub fn is_ready(&self) -> bool {
        self.current.map(|l| l.ready).unwrap_or(false)
    }

    pub fn url(&self) -> String {
        proxy_url(self.port)
    }

    /// Arguments for proxying `url`.  The whole preference list is passed;
    /// the quality the probe settled on is not reused.
    pub fn launch_args(&self, url: &str) -> Vec<String> {
        vec![
            "--player-external-http".to_string(),
            format!("--player-external-http-port={}", self.port),
            url.to_string(),
            self.preferences.join(","),
        ]
    }

    pub async fn start_stream(
        &mut self,
        entries: &mut [StreamEntry],
        id: Option<StreamId>,
    ) -> anyhow::Result<StartOutcome> {
        let Some(id) = id else {
            return Ok(refused("no stream selected"));
        };
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return Ok(refused("stream is no longer listed"));
        };
        match entries[index].status.healthy {
            Some(true) => {}
            Some(false) => return Ok(refused("stream failed validation")),
            None => return Ok(refused("stream has not been validated yet")),
        }

        let stopped = self.stop_stream(entries).await?;

        let args = self.launch_args(&entries[index].descriptor.url);
        entries[index].status.playing = true;
        match self.process.start(&args).await {
            Ok(launch) => {
                info!(
                    "controller: proxying {} ({}) as launch {}",
                    id, entries[index].descriptor.name, launch
                );
                self.current = Some(Launch {
                    launch,
                    id,
                    ready: false,
                });
                Ok(StartOutcome::Started {
                    id,
                    launch,
                    stopped,
                })
            }
            Err(e) => {
                entries[index].status.playing = false;
                Err(e)
            }
        }
    }

    /// Clear the playing flag and stop the process.  Returns the entry that
    /// was flagged, if any.  Safe to call when nothing runs.
    pub async fn stop_stream(
        &mut self,
        entries: &mut [StreamEntry],
    ) -> anyhow::Result<Option<StreamId>> {
        let mut cleared = None;
        for entry in entries.iter_mut().filter(|e| e.status.playing) {
            entry.status.playing = false;
            cleared = Some(entry.id);
        }
        if let Some(launch) = self.current.take() {
            debug!("controller: stopping launch {} ({})", launch.launch, launch.id);
        }
        self.process.stop().await?;
        Ok(cleared)
    }

    /// The proxy printed its marker.  Returns the stream now being served,
    /// once per launch; stale launches are ignored.
    pub fn on_ready(&mut self, launch: u64) -> Option<StreamId> {
        match self.current.as_mut() {
            Some(current) if current.launch == launch && !current.ready => {
                current.ready = true;
                Some(current.id)
            }
            _ => {
                debug!("controller: ignoring ready of launch {}", launch);
                None
            }
        }
    }

    /// The proxy's output closed on its own.  Clears the flag of the current
    /// launch and returns its stream.
    pub fn on_exited(&mut self, entries: &mut [StreamEntry], launch: u64) -> Option<StreamId> {
        let current = self.current.filter(|c| c.launch == launch)?;
        warn!("controller: proxy for {} exited unexpectedly", current.id);
        self.current = None;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == current.id) {
            entry.status.playing = false;
        }
        Some(current.id)
    }
}

fn refused(reason: &str) -> StartOutcome {
    debug!("controller: refusing to start: {}", reason);
    StartOutcome::Refused {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use birb_proto::protocol::{StreamDescriptor, StreamStatus};

    /// Records every lifecycle call and how many children would be alive.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        live: usize,
        max_live: usize,
        launches: u64,
        fail_start: bool,
    }

    impl ProxyProcess for Recorder {
        async fn start(&mut self, args: &[String]) -> anyhow::Result<u64> {
            if self.fail_start {
                anyhow::bail!("spawn refused");
            }
            self.calls.push(format!("start {}", args[2]));
            self.live += 1;
            self.max_live = self.max_live.max(self.live);
            self.launches += 1;
            Ok(self.launches)
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            self.calls.push("stop".to_string());
            self.live = 0;
            Ok(())
        }

        fn is_running(&mut self) -> bool {
            self.live > 0
        }
    }

    fn entry(id: u64, healthy: Option<bool>) -> StreamEntry {
        StreamEntry {
            id: StreamId(id),
            descriptor: StreamDescriptor {
                name: format!("cam{}", id),
                description: String::new(),
                url: format!("https://example.org/{}", id),
            },
            status: StreamStatus {
                healthy,
                quality: None,
                playing: false,
            },
        }
    }

    fn controller() -> StreamProxyController<Recorder> {
        StreamProxyController::new(
            Recorder::default(),
            6969,
            vec!["360p".into(), "480p".into(), "worst".into()],
        )
    }

    fn playing(entries: &[StreamEntry]) -> Vec<StreamId> {
        entries
            .iter()
            .filter(|e| e.status.playing)
            .map(|e| e.id)
            .collect()
    }

    #[tokio::test]
    async fn test_launch_args() {
        let c = controller();
        assert_eq!(
            c.launch_args("https://youtu.be/x"),
            vec![
                "--player-external-http",
                "--player-external-http-port=6969",
                "https://youtu.be/x",
                "360p,480p,worst",
            ]
        );
        assert_eq!(c.url(), "http://127.0.0.1:6969/");
    }

    #[tokio::test]
    async fn test_refuses_without_side_effects() {
        let mut c = controller();
        let mut entries = vec![entry(1, None), entry(2, Some(false))];
        for id in [None, Some(StreamId(1)), Some(StreamId(2)), Some(StreamId(9))] {
            let outcome = c.start_stream(&mut entries, id).await.unwrap();
            assert!(matches!(outcome, StartOutcome::Refused { .. }));
        }
        assert!(c.process().calls.is_empty());
        assert!(playing(&entries).is_empty());
    }

    #[tokio::test]
    async fn test_second_start_stops_first() {
        let mut c = controller();
        let mut entries = vec![entry(1, Some(true)), entry(2, Some(true))];

        c.start_stream(&mut entries, Some(StreamId(1))).await.unwrap();
        let outcome = c
            .start_stream(&mut entries, Some(StreamId(2)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Started {
                id: StreamId(2),
                launch: 2,
                stopped: Some(StreamId(1)),
            }
        );
        assert_eq!(
            c.process().calls,
            vec![
                "stop",
                "start https://example.org/1",
                "stop",
                "start https://example.org/2"
            ]
        );
        assert_eq!(c.process().max_live, 1);
        assert_eq!(playing(&entries), vec![StreamId(2)]);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let mut c = controller();
        let mut entries = vec![entry(1, Some(true))];
        assert_eq!(c.stop_stream(&mut entries).await.unwrap(), None);
        assert_eq!(c.stop_stream(&mut []).await.unwrap(), None);
        assert_eq!(c.playing(), None);
    }

    #[tokio::test]
    async fn test_ready_only_for_current_launch() {
        let mut c = controller();
        let mut entries = vec![entry(1, Some(true)), entry(2, Some(true))];
        c.start_stream(&mut entries, Some(StreamId(1))).await.unwrap();
        c.start_stream(&mut entries, Some(StreamId(2))).await.unwrap();

        assert_eq!(c.on_ready(1), None);
        assert_eq!(c.on_ready(2), Some(StreamId(2)));
        assert_eq!(c.on_ready(2), None);
        assert!(c.is_ready());
    }

    #[tokio::test]
    async fn test_exit_clears_flag() {
        let mut c = controller();
        let mut entries = vec![entry(1, Some(true))];
        c.start_stream(&mut entries, Some(StreamId(1))).await.unwrap();

        assert_eq!(c.on_exited(&mut entries, 7), None);
        assert_eq!(playing(&entries), vec![StreamId(1)]);
        assert_eq!(c.on_exited(&mut entries, 1), Some(StreamId(1)));
        assert!(playing(&entries).is_empty());
        assert_eq!(c.playing(), None);
    }

    #[tokio::test]
    async fn test_failed_spawn_leaves_nothing_playing() {
        let mut c = controller();
        c.process.fail_start = true;
        let mut entries = vec![entry(1, Some(true))];
        assert!(c
            .start_stream(&mut entries, Some(StreamId(1)))
            .await
            .is_err());
        assert!(playing(&entries).is_empty());
        assert_eq!(c.playing(), None);
    }
}
