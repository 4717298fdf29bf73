//! Control plane: mode state machine and cassette lifecycle

use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::cassette::{CassetteSerializer, HttpRequest, YamlSerializer};
use crate::config::{Config, Mode};
use crate::network::{empty, full, to_hyper_response, HttpClient, ProxyBody, TrackedBody};
use crate::recording::{event_type, Recorder};
use crate::replay::{Comparator, Replayed, Replayer};
use crate::{PlaybackError, Result};

/// Capacity of the mode change channel; slow subscribers miss older changes
const MODE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
struct ControlState {
    mode: Mode,
    /// Whether the loaded cassette is being recorded; decided at load time
    recording: bool,
    cassette_loaded: bool,
    cassette_dir: PathBuf,
}

/// Snapshot of the control state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Configured mode
    pub mode: Mode,
    /// Whether traffic can flow
    pub cassette_loaded: bool,
    /// Whether the loaded cassette is being recorded rather than replayed
    pub recording: bool,
    /// Root that cassette paths are resolved against
    pub cassette_dir: PathBuf,
}

/// Record/replay proxy server
///
/// Owns the [`Recorder`] and [`Replayer`] and decides which of them sees the
/// traffic, based on the mode and the loaded cassette.
pub struct PlaybackServer {
    recorder: Recorder,
    replayer: Replayer,
    state: Mutex<ControlState>,
    mode_changes: broadcast::Sender<Mode>,
    max_body_size: usize,
}

impl PlaybackServer {
    /// Create a server with the sequential comparator
    ///
    /// Switches to the configured mode, sets the cassette root and loads the
    /// initial cassette if one is configured.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while applying the configuration
    pub async fn new(config: &Config) -> Result<Self> {
        Self::with_comparator(config, Comparator::default()).await
    }

    /// Create a server that replays with `comparator`
    ///
    /// # Errors
    ///
    /// Returns the first error hit while applying the configuration
    pub async fn with_comparator(config: &Config, comparator: Comparator) -> Result<Self> {
        config.validate()?;

        let client = HttpClient::new(config.limits.forward_timeout())?;
        let serializer: Arc<dyn CassetteSerializer> = Arc::new(YamlSerializer);
        let (mode_changes, _) = broadcast::channel(MODE_CHANNEL_CAPACITY);

        let server = Self {
            recorder: Recorder::new(
                config.remote_url.clone(),
                config.webhook_url.clone(),
                client.clone(),
                Arc::clone(&serializer),
            ),
            replayer: Replayer::spawn(
                config.webhook_url.clone(),
                client,
                serializer,
                comparator,
                config.limits.webhook_flush_timeout(),
            ),
            state: Mutex::new(ControlState {
                mode: config.mode,
                recording: false,
                cassette_loaded: false,
                cassette_dir: PathBuf::new(),
            }),
            mode_changes,
            max_body_size: config.limits.max_body_size,
        };

        server.switch_mode(config.mode.as_str()).await?;
        server.set_cassette_dir(&config.cassette_dir).await?;
        if let Some(cassette) = config.initial_cassette() {
            server.load_cassette(cassette).await?;
        }

        Ok(server)
    }

    /// Switch to `mode` and unload the current cassette
    ///
    /// The cassette is unloaded even when `mode` is invalid; the previous mode
    /// then stays in effect. A recording in progress is discarded without
    /// being written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMode` if `mode` is not record, replay or auto
    pub async fn switch_mode(&self, mode: &str) -> Result<Mode> {
        let mut state = self.state.lock().await;

        if state.cassette_loaded {
            if state.recording {
                warn!("Discarding unsaved recording, eject the cassette before switching modes to keep it");
            }
            info!("Unloaded the cassette. Please load a new cassette before recording/replaying any new interactions.");
        }
        state.cassette_loaded = false;
        state.recording = false;

        let mode: Mode = mode.parse()?;
        state.mode = mode;
        drop(state);

        // Nobody may be subscribed
        let _ = self.mode_changes.send(mode);
        info!("Set mode to {}", mode.as_str().to_uppercase());
        Ok(mode)
    }

    /// Set the root that cassette paths are resolved against
    ///
    /// Relative paths are resolved against the working directory.
    ///
    /// # Errors
    ///
    /// Returns error if the path does not exist or is not a directory
    pub async fn set_cassette_dir(&self, dir: &Path) -> Result<PathBuf> {
        let absolute = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };

        match tokio::fs::metadata(&absolute).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(PlaybackError::NotADirectory(absolute)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PlaybackError::DirectoryNotFound(absolute));
            }
            Err(e) => return Err(e.into()),
        }

        self.state.lock().await.cassette_dir.clone_from(&absolute);
        info!("Cassette directory set to \"{}\"", absolute.display());
        Ok(absolute)
    }

    /// Load the cassette at `relative` under the cassette root
    ///
    /// Record mode creates or truncates the file, replay mode reads it fully,
    /// and auto mode picks between the two by whether the file exists.
    /// Returns the absolute path of the cassette.
    ///
    /// # Errors
    ///
    /// Returns error if the path is rejected or the file cannot be created,
    /// opened or decoded; the previous load state is kept in that case
    pub async fn load_cassette(&self, relative: &str) -> Result<PathBuf> {
        validate_cassette_path(relative)?;

        let mut state = self.state.lock().await;
        let path = state.cassette_dir.join(relative);

        let recording = match state.mode {
            Mode::Record => true,
            Mode::Replay => false,
            Mode::Auto => !tokio::fs::try_exists(&path).await?,
        };

        if state.cassette_loaded && state.recording {
            warn!("Discarding unsaved recording, eject the cassette before loading another to keep it");
        }

        if recording {
            let create_error = |source| PlaybackError::CassetteCreate {
                path: path.clone(),
                source,
            };
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(create_error)?;
            }
            let file = tokio::fs::File::create(&path)
                .await
                .map_err(create_error)?
                .into_std()
                .await;
            self.recorder
                .insert_cassette(Box::new(BufWriter::new(file)))
                .await;
            info!("Recording to {}", relative);
        } else {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| PlaybackError::CassetteOpen {
                    path: path.clone(),
                    source,
                })?;
            self.replayer.read_cassette(bytes.as_slice()).await?;
            info!("Replaying from {}", relative);
        }

        state.recording = recording;
        state.cassette_loaded = true;
        Ok(path)
    }

    /// Unload the current cassette, writing it out if it was being recorded
    ///
    /// # Errors
    ///
    /// Returns `NothingToEject` if no cassette is loaded, or the write error;
    /// the cassette is unloaded either way
    pub async fn eject_cassette(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.cassette_loaded {
            return Err(PlaybackError::NothingToEject);
        }

        let result = if state.recording {
            self.recorder.save_and_close().await
        } else {
            Ok(())
        };

        state.cassette_loaded = false;
        state.recording = false;
        drop(state);

        result?;
        info!("Ejected cassette");
        Ok(())
    }

    /// Configured mode
    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    /// Whether the loaded cassette is being recorded
    pub async fn is_recording(&self) -> bool {
        self.state.lock().await.recording
    }

    /// Whether a cassette is loaded
    pub async fn cassette_loaded(&self) -> bool {
        self.state.lock().await.cassette_loaded
    }

    /// Snapshot of mode, load state and cassette root
    pub async fn status(&self) -> Status {
        let state = self.state.lock().await;
        Status {
            mode: state.mode,
            cassette_loaded: state.cassette_loaded,
            recording: state.recording,
            cassette_dir: state.cassette_dir.clone(),
        }
    }

    /// Replay side, for inspecting what is left in the cassette
    #[must_use]
    pub fn replayer(&self) -> &Replayer {
        &self.replayer
    }

    /// Subscribe to successful mode switches
    ///
    /// Switching never waits for subscribers; a lagging receiver misses changes.
    #[must_use]
    pub fn subscribe_mode_changes(&self) -> broadcast::Receiver<Mode> {
        self.mode_changes.subscribe()
    }

    /// Whether traffic goes to the recorder, or why it cannot flow at all
    async fn traffic_target(&self) -> Result<bool> {
        let state = self.state.lock().await;
        if state.cassette_loaded {
            Ok(state.recording)
        } else {
            Err(PlaybackError::NoCassetteLoaded)
        }
    }

    /// Record or replay an application request
    ///
    /// # Errors
    ///
    /// Returns error if no cassette is loaded, the body is too large,
    /// forwarding fails or nothing in the cassette matches
    pub async fn handle_api(&self, request: Request<Incoming>) -> Result<Response<ProxyBody>> {
        let recording = self.traffic_target().await?;
        let request = HttpRequest::from_hyper(request, self.max_body_size).await?;

        if recording {
            let mut response = self.recorder.handle(request).await?;
            let body = full(std::mem::take(&mut response.body));
            return Ok(to_hyper_response(&response, body));
        }

        let Replayed {
            mut response,
            written,
        } = self.replayer.replay(request).await?;
        let body = TrackedBody::new(std::mem::take(&mut response.body), written).boxed_unsync();
        Ok(to_hyper_response(&response, body))
    }

    /// Record an inbound webhook push
    ///
    /// While replaying, webhooks come from the cassette; a live push is logged
    /// and acknowledged with an empty 200.
    ///
    /// # Errors
    ///
    /// Returns error if no cassette is loaded or forwarding to the local
    /// application fails
    pub async fn handle_webhook(&self, request: Request<Incoming>) -> Result<Response<ProxyBody>> {
        let recording = self.traffic_target().await?;
        let request = HttpRequest::from_hyper(request, self.max_body_size).await?;

        if !recording {
            error!(
                "Webhook endpoint should never be called in replay mode, ignoring [{}]",
                event_type(&request.body)
            );
            return Ok(Response::new(empty()));
        }

        let mut response = self.recorder.handle_webhook(request).await?;
        debug!("Webhook acknowledged with {}", response.status_code);
        let body = full(std::mem::take(&mut response.body));
        Ok(to_hyper_response(&response, body))
    }
}

/// Reject cassette paths that are absolute, escape the root or are not YAML
fn validate_cassette_path(relative: &str) -> Result<()> {
    if !relative.to_ascii_lowercase().ends_with(".yaml") {
        return Err(PlaybackError::InvalidCassettePath(format!(
            "{relative} is not a .yaml file"
        )));
    }

    let path = Path::new(relative);
    if path.is_absolute() || relative.starts_with('/') {
        return Err(PlaybackError::InvalidCassettePath(format!(
            "{relative} must be a relative filepath. an absolute filepath was provided"
        )));
    }

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(PlaybackError::InvalidCassettePath(format!(
            "{relative} must stay inside the cassette directory"
        )));
    }

    Ok(())
}
