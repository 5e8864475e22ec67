//! Streaming session
//!
//! A [`StreamSession`] is one participant's membership in one room. It owns
//! the three media sockets, the peer cache, capture pipelines, receive loops
//! and per-sender playback, and tears them down in a fixed order on stop.

pub mod events;
mod inbound;
pub mod state;

pub use events::{SessionEvent, SessionStats};
pub use state::{RoomKind, SessionConfig, SessionState};

use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use self::inbound::{EventSink, InboundHandler};
use crate::audio::{AudioCapture, AudioOutput, CapturedAudio, MicrophoneSource, NullOutput, PlaybackMixer};
use crate::config::AppConfig;
use crate::directory::{spawn_heartbeat_task, CircuitBreaker, PeerCache, PeerDirectory, PeerEndpoint, RefreshOutcome};
use crate::error::{Result, SessionError};
use crate::network::{bind_udp, spawn_receive_loop, MediaSender, MediaSockets, ReceiveCounters, SenderStats};
use crate::protocol::{validate_sender_id, ChatMessageType, FileAssembler, FrameReassembler, MediaKind};
use crate::relay::{Relay, SessionRole};
use crate::video::{CameraLease, CapturedFrame, SharedCamera};

/// Buffers between the microphone thread and the audio send task
const CAPTURE_CHANNEL_CAPACITY: usize = 8;

/// Builds a [`StreamSession`]
pub struct SessionBuilder {
    config: SessionConfig,
    app: AppConfig,
    directory: Arc<dyn PeerDirectory>,
    microphone: Option<Arc<dyn MicrophoneSource>>,
    camera: Option<Arc<SharedCamera>>,
    output: Arc<dyn AudioOutput>,
    shared_chat: Option<Arc<UdpSocket>>,
    bind_ip: Option<IpAddr>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig, directory: Arc<dyn PeerDirectory>) -> Self {
        Self {
            config,
            app: AppConfig::default(),
            directory,
            microphone: None,
            camera: None,
            output: Arc::new(NullOutput),
            shared_chat: None,
            bind_ip: None,
        }
    }

    pub fn app_config(mut self, app: AppConfig) -> Self {
        self.app = app;
        self
    }

    pub fn microphone(mut self, microphone: Arc<dyn MicrophoneSource>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn camera(mut self, camera: Arc<SharedCamera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn audio_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = output;
        self
    }

    /// Use a chat socket owned by a longer-lived component. The session
    /// sends and receives on it but leaves it open on stop.
    pub fn shared_chat_socket(mut self, socket: Arc<UdpSocket>) -> Self {
        self.shared_chat = Some(socket);
        self
    }

    /// Local address to bind the media ports on. Defaults to the unspecified
    /// address of the endpoint's family.
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = Some(ip);
        self
    }

    pub fn build(self) -> StreamSession {
        let role = SessionRole::for_participant(&self.config.local_id, &self.config.hub_id);
        let timeout = self.app.reassembly.timeout();

        StreamSession {
            id: Uuid::new_v4(),
            role,
            frames: Arc::new(FrameReassembler::new(self.app.protocol.max_fragments_per_frame, timeout)),
            files: Arc::new(FileAssembler::new(timeout)),
            config: self.config,
            app: self.app,
            directory: self.directory,
            microphone: self.microphone,
            camera: self.camera,
            output: self.output,
            shared_chat: self.shared_chat,
            bind_ip: self.bind_ip,
            state: Mutex::new(SessionState::Created),
            running: Mutex::new(None),
            muted: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(ReceiveCounters::default()),
            events_dropped: Arc::new(AtomicU64::new(0)),
            final_sender_stats: Mutex::new(SenderStats::default()),
        }
    }
}

/// Handles a capture pipeline needs to send what it captures
#[derive(Clone)]
struct Outbound {
    sender: Arc<MediaSender>,
    relay: Arc<Relay>,
    events: EventSink,
    shutdown: watch::Receiver<bool>,
}

/// Everything that exists only while the session is active
struct Running {
    /// Stops the periodic tasks and the capture send tasks
    background_shutdown: watch::Sender<bool>,
    /// Stops the receive loops, signalled after capture is down
    receive_shutdown: watch::Sender<bool>,
    background: Vec<(&'static str, JoinHandle<()>)>,
    /// One receive loop per media socket
    receivers: Vec<(MediaKind, JoinHandle<()>)>,
    /// Capture thread and the task sending its buffers
    microphone: Option<(AudioCapture, JoinHandle<()>)>,
    /// Camera lease and the task sending its frames
    camera: Option<(CameraLease, JoinHandle<()>)>,
    sockets: MediaSockets,
    sender: Arc<MediaSender>,
    relay: Arc<Relay>,
    playback: Arc<PlaybackMixer>,
    events: EventSink,
    /// Hands queued control events to the consumer
    event_forwarder: JoinHandle<()>,
}

impl Running {
    fn outbound(&self) -> Outbound {
        Outbound {
            sender: self.sender.clone(),
            relay: self.relay.clone(),
            events: self.events.clone(),
            shutdown: self.background_shutdown.subscribe(),
        }
    }
}

/// One participant's membership in one room
pub struct StreamSession {
    /// Unique per session, for logs only
    id: Uuid,
    config: SessionConfig,
    app: AppConfig,
    /// Hub or spoke, fixed at build time from the local and hub ids
    role: SessionRole,
    directory: Arc<dyn PeerDirectory>,
    microphone: Option<Arc<dyn MicrophoneSource>>,
    camera: Option<Arc<SharedCamera>>,
    output: Arc<dyn AudioOutput>,
    /// Chat socket owned by the caller, left open on stop
    shared_chat: Option<Arc<UdpSocket>>,
    bind_ip: Option<IpAddr>,
    state: Mutex<SessionState>,
    /// Present only while active
    running: Mutex<Option<Running>>,
    /// Outgoing audio mute, read by the capture thread and the audio send task
    muted: Arc<AtomicBool>,
    frames: Arc<FrameReassembler>,
    files: Arc<FileAssembler>,
    /// Datagrams received and rejected, kept across stop for stats
    counters: Arc<ReceiveCounters>,
    /// Frames dropped because the event consumer was behind
    events_dropped: Arc<AtomicU64>,
    /// Sender stats captured at teardown
    final_sender_stats: Mutex<SenderStats>,
}

impl StreamSession {
    pub fn builder(config: SessionConfig, directory: Arc<dyn PeerDirectory>) -> SessionBuilder {
        SessionBuilder::new(config, directory)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    fn transition(&self, to: SessionState) {
        let mut state = self.state.lock();
        tracing::info!("Session {} ({}): {} -> {}", self.id, self.config.local_id, *state, to);
        *state = to;
    }

    /// Bring the session up.
    ///
    /// `hub` is the hub's endpoint if the caller already knows it; a spoke
    /// otherwise looks the hub up in the peer cache. Events are delivered on
    /// `events` until the session stops. A failure to resolve the local
    /// endpoint or to bind a socket is fatal: everything bound so far is
    /// released and the session ends `Stopped`.
    pub async fn start(&self, hub: Option<PeerEndpoint>, events: mpsc::Sender<SessionEvent>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Created {
                return Err(SessionError::InvalidState(state.to_string()).into());
            }
            *state = SessionState::Starting;
        }
        tracing::info!(
            "Session {} starting: {} joins room {} as {:?}",
            self.id,
            self.config.local_id,
            self.config.room_id,
            self.role
        );

        let running = match self.bring_up(hub, events).await {
            Ok(running) => running,
            Err(e) => {
                tracing::error!("Session {} failed to start: {}", self.id, e);
                self.transition(SessionState::Stopped);
                return Err(e);
            }
        };

        // A stop() that arrived while starting is honoured now
        let stop_requested = {
            let mut state = self.state.lock();
            if *state == SessionState::Starting {
                *state = SessionState::Active;
                false
            } else {
                true
            }
        };
        if stop_requested {
            self.teardown(running).await;
            self.transition(SessionState::Stopped);
            return Err(SessionError::NotActive.into());
        }

        *self.running.lock() = Some(running);
        tracing::info!("Session {} active", self.id);
        Ok(())
    }

    async fn bring_up(&self, hub: Option<PeerEndpoint>, events: mpsc::Sender<SessionEvent>) -> Result<Running> {
        validate_sender_id(&self.config.local_id)?;

        let local = self
            .directory
            .get_peer(&self.config.local_id)
            .await
            .map_err(|e| {
                tracing::warn!("Directory lookup of {} failed: {}", self.config.local_id, e);
                SessionError::LocalEndpointUnknown(self.config.local_id.clone())
            })?;

        // Bound sockets are plain locals here: any `?` below releases them
        let sockets = self.bind_sockets(&local)?;

        let peers = Arc::new(PeerCache::new(
            self.directory.clone(),
            self.config.room_id.clone(),
            self.config.local_id.clone(),
            CircuitBreaker::new(self.app.directory.failure_threshold, self.app.directory.cooldown()),
        ));
        match peers.refresh(Instant::now()).await {
            RefreshOutcome::Updated => tracing::info!("Room {} has {} other peers", self.config.room_id, peers.snapshot().len()),
            outcome => tracing::warn!("Initial peer refresh for room {}: {:?}", self.config.room_id, outcome),
        }

        let hub = match self.role {
            SessionRole::Hub => None,
            SessionRole::Spoke => hub,
        };
        let relay = Arc::new(
            Relay::new(self.role, self.config.local_id.clone(), self.config.hub_id.clone(), peers.clone())
                .with_hub_endpoint(hub),
        );
        if self.role == SessionRole::Spoke && relay.hub_endpoint().is_none() {
            tracing::warn!("Hub {} not known yet, outgoing media waits for the directory", self.config.hub_id);
        }

        let sender = Arc::new(MediaSender::new(
            self.config.local_id.clone(),
            self.app.protocol.clone(),
            sockets.clone(),
        ));
        let playback = Arc::new(PlaybackMixer::new(self.output.clone(), self.app.audio.clone()));
        let (events, event_forwarder) = EventSink::spawn(events, self.events_dropped.clone());

        let (background_shutdown, background_rx) = watch::channel(false);
        let (receive_shutdown, receive_rx) = watch::channel(false);

        let mut background = vec![
            ("peer-refresh", self.spawn_refresh_task(peers.clone(), events.clone(), background_rx.clone())),
            (
                "heartbeat",
                spawn_heartbeat_task(
                    self.directory.clone(),
                    self.config.local_id.clone(),
                    self.app.directory.heartbeat_interval(),
                    background_rx.clone(),
                ),
            ),
        ];
        background.push(("reassembly-sweep", self.spawn_sweep_task(background_rx)));

        let handler = Arc::new(InboundHandler::new(
            self.config.local_id.clone(),
            relay.clone(),
            sender.clone(),
            self.frames.clone(),
            self.files.clone(),
            playback.clone(),
            events.clone(),
        ));
        let receivers = MediaKind::ALL
            .iter()
            .map(|&kind| {
                let handle = spawn_receive_loop(
                    kind,
                    sockets.get(kind).clone(),
                    handler.clone(),
                    self.app.protocol.recv_buffer_size,
                    receive_rx.clone(),
                    self.counters.clone(),
                );
                (kind, handle)
            })
            .collect();

        let mut running = Running {
            background_shutdown,
            receive_shutdown,
            background,
            receivers,
            microphone: None,
            camera: None,
            sockets,
            sender,
            relay,
            playback,
            events,
            event_forwarder,
        };

        let outbound = running.outbound();
        running.microphone = self.start_microphone(outbound.clone());
        running.camera = self.start_camera(outbound).await;

        Ok(running)
    }

    fn bind_addr(&self, endpoint: &PeerEndpoint, kind: MediaKind) -> SocketAddr {
        let ip = self.bind_ip.unwrap_or(match endpoint.ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        SocketAddr::new(ip, endpoint.port(kind))
    }

    fn bind_sockets(&self, local: &PeerEndpoint) -> Result<MediaSockets> {
        let video = Arc::new(bind_udp(self.bind_addr(local, MediaKind::Video), &self.app.protocol)?);
        let audio = Arc::new(bind_udp(self.bind_addr(local, MediaKind::Audio), &self.app.protocol)?);
        let chat = match &self.shared_chat {
            Some(shared) => {
                tracing::debug!("Using shared chat socket");
                shared.clone()
            }
            None => Arc::new(bind_udp(self.bind_addr(local, MediaKind::Chat), &self.app.protocol)?),
        };
        Ok(MediaSockets { video, audio, chat })
    }

    fn spawn_refresh_task(
        &self,
        peers: Arc<PeerCache>,
        events: EventSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let period = self.app.directory.refresh_interval();
        let watch_hub = self.role == SessionRole::Spoke;
        let hub_id = self.config.hub_id.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut hub_seen = peers.find(&hub_id).is_some();
            let mut hub_departed = false;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if peers.refresh(Instant::now()).await != RefreshOutcome::Updated || !watch_hub {
                            continue;
                        }
                        let present = peers.find(&hub_id).is_some();
                        if present {
                            hub_seen = true;
                        } else if hub_seen && !hub_departed {
                            hub_departed = true;
                            tracing::warn!("Hub {} left the room", hub_id);
                            events.emit(SessionEvent::HubDeparted { hub_id: hub_id.clone() });
                        }
                    }
                }
            }

            tracing::debug!("Peer refresh task exiting");
        })
    }

    fn spawn_sweep_task(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.app.reassembly.sweep_interval();
        let frames = self.frames.clone();
        let files = self.files.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let evicted = frames.sweep(now) + files.sweep(now);
                        if evicted > 0 {
                            tracing::debug!("Evicted {} incomplete frames/files", evicted);
                        }
                    }
                }
            }

            tracing::debug!("Reassembly sweep task exiting");
        })
    }

    fn start_microphone(&self, outbound: Outbound) -> Option<(AudioCapture, JoinHandle<()>)> {
        let source = self.microphone.clone()?;
        if !source.is_available() {
            tracing::warn!("Microphone {} unavailable, audio is receive-only", source.name());
            return None;
        }

        let (tx, mut rx) = mpsc::channel::<CapturedAudio>(CAPTURE_CHANNEL_CAPACITY);
        let capture = match AudioCapture::start(source, &self.app.audio, tx) {
            Ok(capture) => capture,
            Err(e) => {
                tracing::warn!("Microphone capture failed to start: {}", e);
                return None;
            }
        };
        capture.set_muted(self.muted.load(Ordering::SeqCst));

        let Outbound {
            sender,
            relay,
            mut shutdown,
            ..
        } = outbound;
        let muted = self.muted.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    buffer = rx.recv() => {
                        let Some(buffer) = buffer else { break };
                        // Buffers queued before a mute are discarded here
                        if muted.load(Ordering::SeqCst) {
                            continue;
                        }
                        let targets = relay.capture_targets(MediaKind::Audio);
                        sender.send_audio(buffer.timestamp_ms, &buffer.pcm, &targets).await;
                    }
                }
            }
            tracing::debug!("Audio send task exiting");
        });

        Some((capture, task))
    }

    async fn start_camera(&self, outbound: Outbound) -> Option<(CameraLease, JoinHandle<()>)> {
        let camera = self.camera.clone()?;
        if !camera.is_available() {
            tracing::warn!("Camera unavailable, video is receive-only");
            return None;
        }

        let lease = match tokio::task::spawn_blocking(move || camera.acquire()).await {
            Ok(Ok(lease)) => lease,
            Ok(Err(e)) => {
                tracing::warn!("Camera failed to start: {}", e);
                return None;
            }
            Err(e) => {
                tracing::error!("Camera start panicked: {}", e);
                return None;
            }
        };

        let mut frames = lease.subscribe();
        let Outbound {
            sender,
            relay,
            events,
            mut shutdown,
        } = outbound;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    frame = frames.recv() => match frame {
                        Ok(CapturedFrame { timestamp_ms, jpeg, preview }) => {
                            events.emit(SessionEvent::LocalPreview { timestamp_ms, image: preview });
                            let targets = relay.capture_targets(MediaKind::Video);
                            sender.send_video_frame(timestamp_ms, &jpeg, &targets).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!("Video send task skipped {} frames", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Video send task exiting");
        });

        Some((lease, task))
    }

    /// Send a chat text to the room. Returns the number of datagrams sent.
    pub async fn send_chat_text(&self, text: &str) -> Result<usize> {
        let (sender, relay) = self.send_handles()?;
        let targets = relay.capture_targets(MediaKind::Chat);
        Ok(sender.send_chat(ChatMessageType::Text, text.as_bytes(), &targets).await)
    }

    /// Send a file to the room. Returns the number of messages it took.
    pub async fn send_file(&self, file_name: &str, data: &[u8]) -> Result<usize> {
        let (sender, relay) = self.send_handles()?;
        let targets = relay.capture_targets(MediaKind::Chat);
        tracing::info!("Sending {} ({} bytes) to {} targets", file_name, data.len(), targets.len());
        Ok(sender.send_file(file_name, data, &targets).await)
    }

    fn send_handles(&self) -> Result<(Arc<MediaSender>, Arc<Relay>)> {
        let running = self.running.lock();
        let running = running.as_ref().ok_or(SessionError::NotActive)?;
        Ok((running.sender.clone(), running.relay.clone()))
    }

    /// Suppress or resume outgoing audio. The microphone stays open.
    pub fn set_microphone_mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        if let Some((capture, _)) = self.running.lock().as_ref().and_then(|r| r.microphone.as_ref()) {
            capture.set_muted(muted);
        }
        tracing::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
    }

    pub fn is_microphone_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Turn the camera on or off. Returns whether the request was honoured.
    ///
    /// Exam sessions refuse to turn the camera off.
    pub async fn set_camera_active(&self, active: bool) -> bool {
        if !active && self.config.kind == RoomKind::Exam {
            tracing::warn!("Refusing to turn the camera off during exam {}", self.config.room_id);
            return false;
        }

        if !active {
            let camera = self.running.lock().as_mut().and_then(|r| r.camera.take());
            if let Some((lease, task)) = camera {
                task.abort();
                drop_blocking(lease).await;
                tracing::info!("Camera turned off");
            }
            return true;
        }

        let outbound = {
            let running = self.running.lock();
            match running.as_ref() {
                None => return false,
                Some(r) if r.camera.is_some() => return true,
                Some(r) => r.outbound(),
            }
        };
        let Some(camera) = self.start_camera(outbound).await else {
            return false;
        };

        let mut running = self.running.lock();
        match running.as_mut() {
            Some(r) if r.camera.is_none() => {
                r.camera = Some(camera);
                tracing::info!("Camera turned on");
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn is_camera_active(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|r| r.camera.is_some())
    }

    /// Stop the session. Idempotent, callable from any task, bounded by
    /// `session.stop_timeout_ms` per background loop.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Stopped | SessionState::Stopping => return,
                SessionState::Created => {
                    *state = SessionState::Stopped;
                    tracing::info!("Session {} stopped before starting", self.id);
                    return;
                }
                SessionState::Starting => {
                    // start() sees this and tears down what it built
                    *state = SessionState::Stopping;
                    return;
                }
                SessionState::Active => {
                    tracing::info!("Session {} ({}): active -> stopping", self.id, self.config.local_id);
                    *state = SessionState::Stopping;
                }
            }
        }

        let running = self.running.lock().take();
        if let Some(running) = running {
            self.teardown(running).await;
        }
        self.transition(SessionState::Stopped);
    }

    async fn teardown(&self, running: Running) {
        let timeout = self.app.session.stop_timeout();
        let Running {
            background_shutdown,
            receive_shutdown,
            background,
            receivers,
            microphone,
            camera,
            sockets,
            sender,
            relay,
            playback,
            events,
            event_forwarder,
        } = running;

        // 1. Periodic tasks and capture send tasks share this signal
        let _ = background_shutdown.send(true);
        for (name, handle) in background {
            join_task(name, handle, timeout).await;
        }

        // 2. Capture
        if let Some((mut capture, task)) = microphone {
            join_task("audio-send", task, timeout).await;
            let _ = tokio::task::spawn_blocking(move || capture.stop(timeout)).await;
        }
        if let Some((lease, task)) = camera {
            join_task("video-send", task, timeout).await;
            drop_blocking(lease).await;
        }

        // 3. Receive loops
        let _ = receive_shutdown.send(true);
        for (kind, handle) in receivers {
            join_task(kind.as_str(), handle, timeout).await;
        }

        // 4. Sockets
        *self.final_sender_stats.lock() = sender.stats();
        drop(sender);
        drop(relay);
        drop(events);
        if self.shared_chat.is_some() {
            tracing::debug!("Leaving shared chat socket open");
        }
        drop(sockets);
        // Control events still queued go out while the consumer keeps reading
        join_task("event-forwarder", event_forwarder, timeout).await;

        // 5. Playback
        let _ = tokio::task::spawn_blocking(move || playback.stop_all(timeout)).await;

        self.frames.clear();
        self.files.clear();
        tracing::info!("Session {} torn down", self.id);
    }

    pub fn stats(&self) -> SessionStats {
        let running = self.running.lock();
        let (peers, sender, playback_senders, captured, suppressed) = match running.as_ref() {
            Some(r) => (
                r.relay.peers().snapshot().len(),
                r.sender.stats(),
                r.playback.len(),
                r.microphone.as_ref().map_or(0, |(c, _)| c.buffers_captured()),
                r.microphone.as_ref().map_or(0, |(c, _)| c.buffers_suppressed()),
            ),
            None => (0, self.final_sender_stats.lock().clone(), 0, 0, 0),
        };

        SessionStats {
            session_id: self.id,
            state: self.state(),
            role: self.role,
            peers,
            sender,
            receiver: self.counters.snapshot(),
            frames_completed: self.frames.frames_completed(),
            frames_evicted: self.frames.frames_evicted(),
            files_completed: self.files.files_completed(),
            files_evicted: self.files.files_evicted(),
            audio_buffers_captured: captured,
            audio_buffers_suppressed: suppressed,
            playback_senders,
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            tracing::warn!("Session {} dropped while active, signalling loops", self.id);
            let _ = running.background_shutdown.send(true);
            let _ = running.receive_shutdown.send(true);
        }
    }
}

/// Await a task for at most `timeout`, then abort it
async fn join_task(name: &str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => tracing::debug!("{} stopped", name),
        Ok(Err(e)) if e.is_panic() => tracing::error!("{} panicked", name),
        Ok(Err(_)) => {}
        Err(_) => {
            tracing::warn!("{} did not stop within {:?}, aborting", name, timeout);
            handle.abort();
        }
    }
}

/// Drop a camera lease off the runtime; releasing the last one joins the
/// capture thread
async fn drop_blocking(lease: CameraLease) {
    let _ = tokio::task::spawn_blocking(move || drop(lease)).await;
}
