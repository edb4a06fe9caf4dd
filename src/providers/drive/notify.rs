//! Change notification over the Server-Sent Events stream.
//!
//! One task per subscription holds a single streaming GET open. The
//! poll-interval channel doubles as the control plane: a new interval tunes
//! the degraded reconnect cadence, zero pauses streaming, and a closed channel
//! shuts the task down.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Method;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::api::{ItemKind, StreamEvent};
use super::{drive_log, DriveProvider};
use crate::providers::dir_cache::join_path;
use crate::providers::{check_response, ChangeCallback, ChangeSource, DirCache, EntryKind, ProviderError};

/// Consecutive stream failures after which reconnects wait the poll interval
const DEGRADED_AFTER: u32 = 3;

/// One observation of the poll-interval channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSignal {
    /// New interval; zero pauses notifications
    Update(Duration),
    /// Sender dropped: shut down
    Closed,
    /// Nothing new
    Pending,
}

impl PollSignal {
    fn from_recv(value: Option<Duration>) -> Self {
        match value {
            Some(d) => PollSignal::Update(d),
            None => PollSignal::Closed,
        }
    }

    /// Non-blocking read of the channel
    pub fn try_next(rx: &mut mpsc::Receiver<Duration>) -> Self {
        match rx.try_recv() {
            Ok(d) => PollSignal::Update(d),
            Err(TryRecvError::Empty) => PollSignal::Pending,
            Err(TryRecvError::Disconnected) => PollSignal::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

/// Fold a signal into the loop settings. Returns `false` on shutdown.
fn apply(signal: PollSignal, interval: &mut Duration, paused: &mut bool) -> bool {
    match signal {
        PollSignal::Closed => false,
        PollSignal::Pending => true,
        PollSignal::Update(d) if d.is_zero() => {
            *paused = true;
            true
        }
        PollSignal::Update(d) => {
            *interval = d;
            *paused = false;
            true
        }
    }
}

/// Handle to a running notifier task
#[derive(Debug)]
pub struct ChangeSubscription {
    cancel: CancellationToken,
    state: Arc<Mutex<NotifierState>>,
    handle: JoinHandle<()>,
}

impl ChangeSubscription {
    /// Ask the task to shut down; the stream connection is dropped
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> NotifierState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("[DRIVE] change notifier task failed: {}", e);
        }
    }
}

/// Incremental `text/event-stream` decoder yielding `data` payloads
#[derive(Debug, Default)]
struct SseParser {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comments (":") and event/id/retry fields carry nothing we use
        }
        events
    }
}

/// Paths touched by one event, resolved through the folder cache.
///
/// Folder events also evict the affected subtrees from the cache.
fn changes_for(event: &StreamEvent, cache: &DirCache) -> Vec<(String, EntryKind)> {
    let source = &event.source;
    let kind = match source.kind {
        ItemKind::Folder => EntryKind::Directory,
        ItemKind::File => EntryKind::Object,
    };
    let mut changes: Vec<(String, EntryKind)> = Vec::new();

    if kind == EntryKind::Directory && !source.id.is_empty() {
        if let Some(old) = cache.get_inv(&source.id).filter(|p| !p.is_empty()) {
            cache.flush_dir(&old);
            changes.push((old, kind));
        }
    }

    if source.name.is_empty() {
        return changes;
    }
    let parents = [source.parent_id.as_deref(), source.dest_parent_id.as_deref()];
    for parent in parents.into_iter().flatten() {
        let Some(dir) = cache.get_inv(parent) else {
            debug!("[DRIVE] event for '{}' in uncached folder {}", source.name, parent);
            continue;
        };
        let path = join_path(&dir, &source.name);
        if kind == EntryKind::Directory {
            cache.flush_dir(&path);
        }
        if !changes.iter().any(|(p, _)| *p == path) {
            changes.push((path, kind));
        }
    }
    changes
}

fn dispatch(payload: &str, cache: &DirCache, on_change: &ChangeCallback) {
    let event: StreamEvent = match serde_json::from_str(payload) {
        Ok(e) => e,
        Err(e) => {
            debug!("[DRIVE] ignoring undecodable event: {}", e);
            return;
        }
    };
    for (path, kind) in changes_for(&event, cache) {
        debug!("[DRIVE] {} -> {} ({:?})", event.event_type, path, kind);
        on_change(&path, kind);
    }
}

impl DriveProvider {
    /// Open the event stream after taking a pacer slot
    async fn open_event_stream(&self) -> Result<reqwest::Response, ProviderError> {
        self.pacer.acquire().await;
        let resp = self.request(Method::GET, self.api_url(&["events", "stream"]))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let resp = check_response(resp).await?;
        self.pacer.succeeded();
        Ok(resp)
    }
}

struct Notifier {
    provider: DriveProvider,
    cancel: CancellationToken,
    on_change: ChangeCallback,
    poll_rx: mpsc::Receiver<Duration>,
    state: Arc<Mutex<NotifierState>>,
}

impl Notifier {
    async fn run(self) {
        let Notifier { provider, cancel, on_change, mut poll_rx, state } = self;
        let set_state = |s: NotifierState| {
            *state.lock().unwrap_or_else(|p| p.into_inner()) = s;
        };
        let mut interval = provider.config.poll_interval;
        let mut paused = false;
        let mut failures = 0u32;

        drive_log("Change notifier started");

        'run: loop {
            loop {
                match PollSignal::try_next(&mut poll_rx) {
                    PollSignal::Pending => break,
                    signal => {
                        if !apply(signal, &mut interval, &mut paused) {
                            break 'run;
                        }
                    }
                }
            }

            if paused {
                set_state(NotifierState::Idle);
                tokio::select! {
                    _ = cancel.cancelled() => break 'run,
                    v = poll_rx.recv() => {
                        if !apply(PollSignal::from_recv(v), &mut interval, &mut paused) {
                            break 'run;
                        }
                    }
                }
                continue 'run;
            }

            set_state(NotifierState::Connecting);
            let open = provider.open_event_stream();
            tokio::pin!(open);
            let opened = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'run,
                    v = poll_rx.recv() => {
                        if !apply(PollSignal::from_recv(v), &mut interval, &mut paused) {
                            break 'run;
                        }
                        if paused {
                            continue 'run;
                        }
                    }
                    r = &mut open => break r,
                }
            };

            let failure = match opened {
                Err(e) => e.to_string(),
                Ok(resp) => {
                    set_state(NotifierState::Streaming);
                    drive_log("Change stream connected");
                    let mut body = resp.bytes_stream();
                    let mut parser = SseParser::default();
                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break 'run,
                            v = poll_rx.recv() => {
                                if !apply(PollSignal::from_recv(v), &mut interval, &mut paused) {
                                    break 'run;
                                }
                                if paused {
                                    debug!("[DRIVE] change stream paused");
                                    continue 'run;
                                }
                            }
                            chunk = body.next() => match chunk {
                                Some(Ok(bytes)) => {
                                    failures = 0;
                                    for payload in parser.feed(&bytes) {
                                        dispatch(&payload, &provider.dir_cache, &on_change);
                                    }
                                }
                                Some(Err(e)) => break e.to_string(),
                                None => break "stream ended".to_string(),
                            },
                        }
                    }
                }
            };

            set_state(NotifierState::Reconnecting);
            failures = failures.saturating_add(1);
            provider.pacer.failed(None);
            let wait = if failures >= DEGRADED_AFTER {
                interval
            } else {
                provider.pacer.current_sleep()
            };
            warn!("[DRIVE] change stream dropped ({}), reconnecting in {:?}", failure, wait);

            tokio::select! {
                _ = cancel.cancelled() => break 'run,
                v = poll_rx.recv() => {
                    if !apply(PollSignal::from_recv(v), &mut interval, &mut paused) {
                        break 'run;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        set_state(NotifierState::Closed);
        drive_log("Change notifier stopped");
    }
}

impl ChangeSource for DriveProvider {
    fn change_notify(
        &self,
        cancel: CancellationToken,
        on_change: ChangeCallback,
        poll_interval: mpsc::Receiver<Duration>,
    ) -> ChangeSubscription {
        let cancel = cancel.child_token();
        let state = Arc::new(Mutex::new(NotifierState::Idle));
        let notifier = Notifier {
            provider: self.clone(),
            cancel: cancel.clone(),
            on_change,
            poll_rx: poll_interval,
            state: Arc::clone(&state),
        };
        let handle = tokio::spawn(notifier.run());
        ChangeSubscription { cancel, state, handle }
    }
}
