/// RTSP → HLS side-channel.
///
/// Players cannot open RTSP directly, so each RTSP stream gets an `ffmpeg`
/// process that rewrites it as a short rolling HLS playlist in a scratch
/// directory, plus a small static file server for that directory on the first
/// free port from `base_port`.
///
/// Lifecycle
/// ─────────
/// • `start` reuses a running transcoder for the same stream and URL.
/// • Each transcoder has a supervisor task that owns the child process. It
///   stops everything when ffmpeg exits or when the transcoder is cancelled,
///   then removes the scratch directory.
/// • An unexpected exit is reported on the `TranscoderExit` channel so the
///   bridge can tell the session.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use streamgrid_core::config::RtspConfig;
use streamgrid_core::platform;

const PLAYLIST: &str = "stream.m3u8";
const PORT_SCAN: u16 = 100;

/// A transcoder stopped without being asked to.
#[derive(Debug, Clone)]
pub struct TranscoderExit {
    pub stream_id: String,
    pub message: String,
}

struct Transcoder {
    generation: u64,
    rtsp_url: String,
    playlist_url: String,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

type Transcoders = Arc<Mutex<HashMap<String, Transcoder>>>;

pub struct RtspService {
    config: RtspConfig,
    transcoders: Transcoders,
    exits: mpsc::Sender<TranscoderExit>,
    next_generation: std::sync::atomic::AtomicU64,
}

impl RtspService {
    pub fn new(config: RtspConfig) -> (Self, mpsc::Receiver<TranscoderExit>) {
        let (exits, exit_rx) = mpsc::channel(32);
        let service = Self {
            config,
            transcoders: Arc::new(Mutex::new(HashMap::new())),
            exits,
            next_generation: std::sync::atomic::AtomicU64::new(1),
        };
        (service, exit_rx)
    }

    fn ffmpeg_binary(&self) -> anyhow::Result<PathBuf> {
        match &self.config.ffmpeg_path {
            Some(path) if path.exists() => Ok(path.clone()),
            Some(path) => anyhow::bail!("configured ffmpeg not found at {}", path.display()),
            None => platform::find_ffmpeg_binary().context("ffmpeg not found (set FFMPEG_PATH)"),
        }
    }

    /// `ffmpeg -version` first line.
    pub async fn probe(&self) -> anyhow::Result<String> {
        let ffmpeg = self.ffmpeg_binary()?;
        let output = Command::new(&ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .context("Failed to spawn ffmpeg")?;
        if !output.status.success() {
            anyhow::bail!("ffmpeg -version exited with {}", output.status);
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Start (or reuse) the transcoder for `stream_id` and return its
    /// playlist URL once ffmpeg has had time to write the first segments.
    pub async fn start(&self, stream_id: &str, rtsp_url: &str) -> anyhow::Result<String> {
        {
            let guard = self.transcoders.lock().await;
            if let Some(existing) = guard.get(stream_id) {
                if existing.rtsp_url == rtsp_url {
                    debug!("rtsp: reusing transcoder for {}", stream_id);
                    return Ok(existing.playlist_url.clone());
                }
            }
        }
        self.stop(stream_id).await;

        let ffmpeg = self.ffmpeg_binary()?;
        let output_dir = platform::rtsp_output_dir(stream_id);
        if output_dir.exists() {
            let _ = tokio::fs::remove_dir_all(&output_dir).await;
        }
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let listener = bind_first_free(&self.config.bind_address, self.config.base_port).await?;
        let port = listener.local_addr()?.port();
        let playlist_url = format!("http://{}:{}/{}", self.config.public_host, port, PLAYLIST);

        info!("rtsp: starting ffmpeg for {} → {}", stream_id, output_dir.display());
        let child = Command::new(&ffmpeg)
            .args(ffmpeg_args(rtsp_url, &output_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn ffmpeg")?;

        let generation = self
            .next_generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let server = serve_dir(listener, output_dir.clone(), cancel.clone());
        let supervisor = tokio::spawn(supervise(
            stream_id.to_string(),
            generation,
            child,
            server,
            output_dir,
            cancel.clone(),
            Arc::clone(&self.transcoders),
            self.exits.clone(),
        ));

        self.transcoders.lock().await.insert(
            stream_id.to_string(),
            Transcoder {
                generation,
                rtsp_url: rtsp_url.to_string(),
                playlist_url: playlist_url.clone(),
                cancel,
                supervisor,
            },
        );

        tokio::time::sleep(Duration::from_millis(self.config.startup_delay_ms)).await;

        let alive = self
            .transcoders
            .lock()
            .await
            .get(stream_id)
            .is_some_and(|t| t.generation == generation);
        if !alive {
            anyhow::bail!("ffmpeg exited during startup for {}", rtsp_url);
        }
        info!("rtsp: {} ready at {}", stream_id, playlist_url);
        Ok(playlist_url)
    }

    /// Stop the transcoder for `stream_id`. Returns false if none was running.
    pub async fn stop(&self, stream_id: &str) -> bool {
        let Some(transcoder) = self.transcoders.lock().await.remove(stream_id) else {
            return false;
        };
        transcoder.cancel.cancel();
        let _ = transcoder.supervisor.await;
        info!("rtsp: stopped {}", stream_id);
        true
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.transcoders.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Running transcoders as (stream id, playlist URL).
    pub async fn active(&self) -> Vec<(String, String)> {
        let mut list: Vec<_> = self
            .transcoders
            .lock()
            .await
            .iter()
            .map(|(id, t)| (id.clone(), t.playlist_url.clone()))
            .collect();
        list.sort();
        list
    }
}

/// Arguments for one RTSP → HLS ffmpeg run.
pub fn ffmpeg_args(rtsp_url: &str, output_dir: &Path) -> Vec<String> {
    let segments = output_dir.join("segment%03d.ts");
    let playlist = output_dir.join(PLAYLIST);
    [
        "-rtsp_transport",
        "tcp",
        "-i",
        rtsp_url,
        "-c:v",
        "libx264",
        "-preset",
        "ultrafast",
        "-tune",
        "zerolatency",
        "-c:a",
        "aac",
        "-f",
        "hls",
        "-hls_time",
        "2",
        "-hls_list_size",
        "3",
        "-hls_flags",
        "delete_segments",
        "-hls_segment_filename",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([
        segments.to_string_lossy().into_owned(),
        playlist.to_string_lossy().into_owned(),
    ])
    .collect()
}

/// Bind the first free port in `base..base + PORT_SCAN`.
pub async fn bind_first_free(bind_address: &str, base: u16) -> anyhow::Result<TcpListener> {
    for port in base..base.saturating_add(PORT_SCAN) {
        match TcpListener::bind((bind_address, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("rtsp: port {} unavailable: {}", port, e),
        }
    }
    anyhow::bail!("no free port in {}..{}", base, base.saturating_add(PORT_SCAN))
}

fn serve_dir(listener: TcpListener, dir: PathBuf, cancel: CancellationToken) -> JoinHandle<()> {
    let app = Router::new()
        .fallback_service(ServeDir::new(dir))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    tokio::spawn(async move {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        debug!("rtsp: serving HLS on {:?}", addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            warn!("rtsp: HLS server error: {}", e);
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    stream_id: String,
    generation: u64,
    mut child: Child,
    server: JoinHandle<()>,
    output_dir: PathBuf,
    cancel: CancellationToken,
    transcoders: Transcoders,
    exits: mpsc::Sender<TranscoderExit>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    cancel.cancel();
    if exited.is_none() {
        let _ = child.kill().await;
    }
    let _ = server.await;
    if let Err(e) = tokio::fs::remove_dir_all(&output_dir).await {
        debug!("rtsp: cleanup of {} failed: {}", output_dir.display(), e);
    }

    if let Some(status) = exited {
        let message = match status {
            Ok(status) => format!("ffmpeg exited with {}", status),
            Err(e) => format!("ffmpeg wait failed: {}", e),
        };
        warn!("rtsp: {}: {}", stream_id, message);
        {
            let mut guard = transcoders.lock().await;
            if guard.get(&stream_id).is_some_and(|t| t.generation == generation) {
                guard.remove(&stream_id);
            }
        }
        let _ = exits.send(TranscoderExit { stream_id, message }).await;
    }
}
