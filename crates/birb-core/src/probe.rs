//! Blocking health check of one stream: resolve → pick a quality → open →
//! read a small window.  Runs on a pool worker, never on the engine loop.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use birb_proto::protocol::StreamDescriptor;
use tracing::{debug, info};

/// Bytes read from the selected variant to call it healthy.
pub const PROBE_WINDOW: u64 = 8192;

/// A resolved, openable stream variant.
pub trait Variant: Send {
    fn open(&self) -> Result<Box<dyn Read + Send>, ProbeError>;
}

/// Quality label → variant, as offered by the resolver for one URL.
pub type VariantSet = HashMap<String, Box<dyn Variant>>;

/// External capability mapping a stream URL to its available variants.
pub trait Resolver: Send + Sync {
    fn resolve(&self, url: &str) -> Result<VariantSet, ProbeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("resolver failed: {0}")]
    Resolve(String),
    #[error("no preferred quality among {offered:?}")]
    NoPreferredQuality { offered: Vec<String> },
    #[error("could not open variant: {0}")]
    Open(String),
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("stream returned no data")]
    EmptyWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeVerdict {
    pub healthy: bool,
    pub quality: Option<String>,
}

impl ProbeVerdict {
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            quality: None,
        }
    }
}

/// First label of `preferences` present in `offered`.  No fallback to
/// labels outside the list.
pub fn select_quality<'a>(offered: &VariantSet, preferences: &'a [String]) -> Option<&'a str> {
    preferences
        .iter()
        .map(String::as_str)
        .find(|label| offered.contains_key(*label))
}

pub struct HealthProbe {
    resolver: Arc<dyn Resolver>,
    preferences: Vec<String>,
}

impl HealthProbe {
    pub fn new(resolver: Arc<dyn Resolver>, preferences: Vec<String>) -> Self {
        Self {
            resolver,
            preferences,
        }
    }

    /// Probe `stream`.  Failures are logged and reported as unhealthy,
    /// never returned.
    pub fn check(&self, stream: &StreamDescriptor) -> ProbeVerdict {
        match self.try_check(stream) {
            Ok(quality) => {
                debug!("probe: {} healthy at {}", stream.url, quality);
                ProbeVerdict {
                    healthy: true,
                    quality: Some(quality),
                }
            }
            Err(e) => {
                info!("probe: could not get stream {}: {}", stream.url, e);
                ProbeVerdict::unhealthy()
            }
        }
    }

    fn try_check(&self, stream: &StreamDescriptor) -> Result<String, ProbeError> {
        let offered = self.resolver.resolve(&stream.url)?;

        let quality = select_quality(&offered, &self.preferences).ok_or_else(|| {
            let mut labels: Vec<String> = offered.keys().cloned().collect();
            labels.sort();
            ProbeError::NoPreferredQuality { offered: labels }
        })?;
        debug!("probe: found quality {} for {}", quality, stream.url);

        let variant = offered
            .get(quality)
            .ok_or_else(|| ProbeError::Resolve(format!("variant {} vanished", quality)))?;
        let reader = variant.open()?;

        let mut window = Vec::with_capacity(PROBE_WINDOW as usize);
        reader.take(PROBE_WINDOW).read_to_end(&mut window)?;
        if window.is_empty() {
            return Err(ProbeError::EmptyWindow);
        }

        Ok(quality.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Bytes(usize);

    impl Variant for Bytes {
        fn open(&self) -> Result<Box<dyn Read + Send>, ProbeError> {
            Ok(Box::new(Cursor::new(vec![0u8; self.0])))
        }
    }

    struct Refuses;

    impl Variant for Refuses {
        fn open(&self) -> Result<Box<dyn Read + Send>, ProbeError> {
            Err(ProbeError::Open("403 Forbidden".into()))
        }
    }

    struct Offers(Vec<&'static str>);

    impl Resolver for Offers {
        fn resolve(&self, _url: &str) -> Result<VariantSet, ProbeError> {
            let mut set = VariantSet::new();
            for label in &self.0 {
                set.insert(label.to_string(), Box::new(Bytes(16_384)) as Box<dyn Variant>);
            }
            Ok(set)
        }
    }

    struct Broken;

    impl Resolver for Broken {
        fn resolve(&self, url: &str) -> Result<VariantSet, ProbeError> {
            Err(ProbeError::Resolve(format!("no plugin for {}", url)))
        }
    }

    struct Single(Box<dyn Fn() -> Box<dyn Variant> + Send + Sync>);

    impl Resolver for Single {
        fn resolve(&self, _url: &str) -> Result<VariantSet, ProbeError> {
            let mut set = VariantSet::new();
            set.insert("best".to_string(), (self.0)());
            Ok(set)
        }
    }

    /// Never-ending stream that counts what was pulled from it.
    struct Endless(Arc<AtomicUsize>);

    impl Read for Endless {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            buf.fill(0x47);
            self.0.fetch_add(buf.len(), Ordering::SeqCst);
            Ok(buf.len())
        }
    }

    struct Live(Arc<AtomicUsize>);

    impl Variant for Live {
        fn open(&self) -> Result<Box<dyn Read + Send>, ProbeError> {
            Ok(Box::new(Endless(self.0.clone())))
        }
    }

    fn prefs(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn stream() -> StreamDescriptor {
        StreamDescriptor {
            name: "Feeder".into(),
            description: String::new(),
            url: "https://example.org/live".into(),
        }
    }

    #[test]
    fn test_selects_first_offered_preference() {
        let probe = HealthProbe::new(
            Arc::new(Offers(vec!["240p", "480p"])),
            prefs(&["360p", "480p", "worst"]),
        );
        assert_eq!(
            probe.check(&stream()),
            ProbeVerdict {
                healthy: true,
                quality: Some("480p".into())
            }
        );
    }

    #[test]
    fn test_no_preferred_quality_is_unhealthy() {
        let probe = HealthProbe::new(Arc::new(Offers(vec!["1080p"])), prefs(&["360p", "worst"]));
        assert_eq!(probe.check(&stream()), ProbeVerdict::unhealthy());
        let err = probe.try_check(&stream()).unwrap_err();
        assert!(matches!(err, ProbeError::NoPreferredQuality { ref offered } if offered == &["1080p"]));
    }

    #[test]
    fn test_resolver_failure_is_unhealthy() {
        let probe = HealthProbe::new(Arc::new(Broken), prefs(&["worst"]));
        assert_eq!(probe.check(&stream()), ProbeVerdict::unhealthy());
    }

    #[test]
    fn test_open_failure_is_unhealthy() {
        let probe = HealthProbe::new(
            Arc::new(Single(Box::new(|| Box::new(Refuses) as Box<dyn Variant>))),
            prefs(&["best"]),
        );
        assert_eq!(probe.check(&stream()), ProbeVerdict::unhealthy());
    }

    #[test]
    fn test_short_stream_is_healthy_empty_is_not() {
        let short = HealthProbe::new(
            Arc::new(Single(Box::new(|| Box::new(Bytes(100)) as Box<dyn Variant>))),
            prefs(&["best"]),
        );
        assert!(short.check(&stream()).healthy);

        let empty = HealthProbe::new(
            Arc::new(Single(Box::new(|| Box::new(Bytes(0)) as Box<dyn Variant>))),
            prefs(&["best"]),
        );
        assert!(matches!(
            empty.try_check(&stream()),
            Err(ProbeError::EmptyWindow)
        ));
    }

    #[test]
    fn test_live_stream_read_stops_at_window() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let probe = HealthProbe::new(
            Arc::new(Single(Box::new(move || {
                Box::new(Live(counter.clone())) as Box<dyn Variant>
            }))),
            prefs(&["best"]),
        );
        assert!(probe.check(&stream()).healthy);
        assert_eq!(pulled.load(Ordering::SeqCst), PROBE_WINDOW as usize);
    }

    #[test]
    fn test_select_quality_respects_order() {
        let mut offered = VariantSet::new();
        offered.insert("worst".into(), Box::new(Bytes(1)));
        offered.insert("480p".into(), Box::new(Bytes(1)));
        let p = prefs(&["720p", "worst", "480p"]);
        assert_eq!(select_quality(&offered, &p), Some("worst"));
        assert_eq!(select_quality(&offered, &prefs(&["1080p"])), None);
        assert_eq!(select_quality(&VariantSet::new(), &p), None);
    }
}
