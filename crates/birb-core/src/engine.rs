/// Engine: single-owner event loop for all mutable state.
///
/// Front ends, pool workers and proxy readers only ever send `CoreEvent`s
/// into one channel.  The loop owns the stream list, the refresh cycle, the
/// proxy controller and the application state; no other task touches them.
/// Every outward change is broadcast as a `Notification`, after it has been
/// folded into `ApplicationState`.
use birb_proto::protocol::{Command, Notification, StreamEntry, StreamId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::app_state::{ApplicationState, StateEvent};
use crate::controller::{StartOutcome, StreamProxyController};
use crate::event::CoreEvent;
use crate::process::ProxyProcess;
use crate::refresh::RefreshCoordinator;

pub struct Engine<P: ProxyProcess> {
    refresh: RefreshCoordinator,
    proxy: StreamProxyController<P>,
    state: ApplicationState,
    selected: Option<StreamId>,
    notify: broadcast::Sender<Notification>,
    refresh_on_start: bool,
}

impl<P: ProxyProcess> Engine<P> {
    pub fn new(
        refresh: RefreshCoordinator,
        proxy: StreamProxyController<P>,
        notify: broadcast::Sender<Notification>,
        refresh_on_start: bool,
    ) -> Self {
        Self {
            refresh,
            proxy,
            state: ApplicationState::default(),
            selected: None,
            notify,
            refresh_on_start,
        }
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    pub fn selected(&self) -> Option<StreamId> {
        self.selected
    }

    pub fn entries(&self) -> &[StreamEntry] {
        self.refresh.entries()
    }

    pub fn proxy(&self) -> &StreamProxyController<P> {
        &self.proxy
    }

    /// Run until `Shutdown` arrives or every sender is gone, then stop the
    /// proxy.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<CoreEvent>) -> anyhow::Result<()> {
        info!("engine: starting event loop");
        if self.refresh_on_start {
            let notes = self.refresh.refresh();
            self.emit_all(notes);
        }

        loop {
            match events.recv().await {
                None => {
                    info!("engine: event channel closed, shutting down");
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("engine: shutdown requested");
                    break;
                }
                Some(event) => self.handle(event).await,
            }
        }

        self.cleanup().await
    }

    /// Process one event.  `Shutdown` is handled by `run`.
    pub async fn handle(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Command(cmd) => {
                info!("engine: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            CoreEvent::Fetched(done) => {
                let notes = self.refresh.on_fetched(done);
                let replaced = notes
                    .iter()
                    .any(|n| matches!(n, Notification::ListReplaced { .. }));
                self.emit_all(notes);
                if replaced && self.selected.take().is_some() {
                    self.emit(Notification::SelectedChanged {
                        id: None,
                        playable: false,
                    });
                }
            }
            CoreEvent::Probed(done) => {
                let notes = self.refresh.on_probed(done);
                let touched_selection = self.selected.filter(|id| {
                    notes.iter().any(
                        |n| matches!(n, Notification::ItemUpdated { entry } if entry.id == *id),
                    )
                });
                self.emit_all(notes);
                if touched_selection.is_some() {
                    self.emit_selection();
                }
            }
            CoreEvent::ProxyReady { launch } => {
                if let Some(id) = self.proxy.on_ready(launch) {
                    let url = self.proxy.url();
                    self.emit(Notification::ProxyReady { id, url });
                }
            }
            CoreEvent::ProxyExited { launch } => {
                if let Some(id) = self.proxy.on_exited(self.refresh.entries_mut(), launch) {
                    self.emit_entry(id);
                    self.emit(Notification::ProxyExited { id: Some(id) });
                }
            }
            CoreEvent::Shutdown => debug!("engine: shutdown outside run loop ignored"),
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Refresh => {
                let notes = self.refresh.refresh();
                self.emit_all(notes);
            }

            Command::Select { id } => {
                self.selected = id.filter(|id| self.refresh.find(*id).is_some());
                if id.is_some() && self.selected.is_none() {
                    debug!("engine: selection {:?} is not in the current list", id);
                }
                self.emit_selection();
            }

            Command::Play => {
                let outcome = self
                    .proxy
                    .start_stream(self.refresh.entries_mut(), self.selected)
                    .await;
                match outcome {
                    Ok(StartOutcome::Started { id, stopped, .. }) => {
                        if let Some(prev) = stopped.filter(|prev| *prev != id) {
                            self.emit_entry(prev);
                        }
                        self.emit_entry(id);
                        self.emit(Notification::PlayerShown);
                    }
                    Ok(StartOutcome::Refused { reason }) => {
                        self.emit(Notification::NotPlayable { reason });
                    }
                    Err(e) => {
                        error!("engine: could not start proxy: {:#}", e);
                        self.emit(Notification::NotPlayable {
                            reason: format!("proxy failed to start: {}", e),
                        });
                    }
                }
            }

            Command::ShowSettings => {
                match self.proxy.stop_stream(self.refresh.entries_mut()).await {
                    Ok(Some(id)) => self.emit_entry(id),
                    Ok(None) => {}
                    Err(e) => error!("engine: could not stop proxy: {:#}", e),
                }
                self.emit(Notification::SettingsShown);
            }
        }
    }

    fn emit_selection(&mut self) {
        let playable = self
            .selected
            .and_then(|id| self.refresh.find(id))
            .map(|e| e.status.is_playable())
            .unwrap_or(false);
        self.emit(Notification::SelectedChanged {
            id: self.selected,
            playable,
        });
    }

    fn emit_entry(&mut self, id: StreamId) {
        if let Some(entry) = self.refresh.find(id) {
            let entry = entry.clone();
            self.emit(Notification::ItemUpdated { entry });
        }
    }

    fn emit_all(&mut self, notes: Vec<Notification>) {
        for n in notes {
            self.emit(n);
        }
    }

    fn emit(&mut self, n: Notification) {
        if let Some(event) = StateEvent::from_notification(&n) {
            self.state.apply(event);
            debug!("engine: state {} after {}", self.state, event.name());
        }
        // No receivers is fine (headless / tests)
        let _ = self.notify.send(n);
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        info!("engine: cleaning up");
        self.proxy.stop_stream(self.refresh.entries_mut()).await?;
        Ok(())
    }
}
