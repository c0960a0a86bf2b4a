//! JSON-lines bridge between a host UI and a grid session.
//!
//! Each stdin line is one `SessionCommand`; every `SessionUpdate` is written
//! to stdout as one line. Transcode requests are served here by the RTSP
//! service and answered back into the session.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use streamgrid_core::protocol::{SessionCommand, SessionUpdate};
use streamgrid_core::session::{SessionEvent, SessionHandle};

use crate::rtsp::{RtspService, TranscoderExit};

/// Decode one input line. Blank lines are skipped.
pub fn parse_line(line: &str) -> Option<Result<SessionCommand, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line).map_err(|e| format!("bad command: {}", e)))
}

pub fn encode_update(update: &SessionUpdate) -> anyhow::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(update)?;
    line.push(b'\n');
    Ok(line)
}

/// Run until stdin closes or a `Shutdown` command arrives, then stop the
/// session and every transcoder.
pub async fn run(
    handle: SessionHandle,
    rtsp: RtspService,
    exits: mpsc::Receiver<TranscoderExit>,
) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    run_with(handle, Arc::new(rtsp), exits, stdin, stdout).await
}

pub async fn run_with<R, W>(
    handle: SessionHandle,
    rtsp: Arc<RtspService>,
    mut exits: mpsc::Receiver<TranscoderExit>,
    input: R,
    output: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let updates = handle.subscribe();
    let events = handle.events.clone();
    let (local_tx, local_rx) = mpsc::channel::<SessionUpdate>(32);
    let writer = tokio::spawn(write_updates(
        updates,
        local_rx,
        output,
        Arc::clone(&rtsp),
        events.clone(),
    ));

    let mut lines = input.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("bridge: input closed");
                        break;
                    }
                    Err(e) => {
                        error!("bridge: read error: {}", e);
                        break;
                    }
                };
                match parse_line(&line) {
                    None => {}
                    Some(Ok(SessionCommand::Shutdown)) => break,
                    Some(Ok(cmd)) => {
                        if !handle.send(cmd).await {
                            warn!("bridge: session is gone");
                            break;
                        }
                    }
                    Some(Err(message)) => {
                        warn!("bridge: {}", message);
                        let _ = local_tx.send(SessionUpdate::Error { message }).await;
                    }
                }
            }
            Some(exit) = exits.recv() => {
                let _ = events
                    .send(SessionEvent::Command(SessionCommand::TranscodeFailed {
                        stream_id: exit.stream_id,
                        message: exit.message,
                    }))
                    .await;
            }
        }
    }

    drop(local_tx);
    let result = handle.shutdown().await;
    rtsp.stop_all().await;
    if let Err(e) = writer.await {
        error!("bridge: writer task failed: {}", e);
    }
    result.map_err(Into::into)
}

async fn write_updates<W>(
    mut updates: broadcast::Receiver<SessionUpdate>,
    mut local: mpsc::Receiver<SessionUpdate>,
    mut output: W,
    rtsp: Arc<RtspService>,
    events: mpsc::Sender<SessionEvent>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let update = tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => update,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("bridge: dropped {} updates", n);
                    let _ = events.send(SessionEvent::Command(SessionCommand::GetState)).await;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(update) = local.recv() => update,
        };

        match &update {
            SessionUpdate::TranscodeRequested { stream_id, url } => {
                spawn_transcode(Arc::clone(&rtsp), events.clone(), stream_id.clone(), url.clone());
            }
            SessionUpdate::TranscodeStopped { stream_id } => {
                rtsp.stop(stream_id).await;
            }
            _ => {}
        }

        let line = match encode_update(&update) {
            Ok(line) => line,
            Err(e) => {
                error!("bridge: cannot encode update: {}", e);
                continue;
            }
        };
        if output.write_all(&line).await.is_err() || output.flush().await.is_err() {
            debug!("bridge: output closed");
            break;
        }
    }
}

fn spawn_transcode(rtsp: Arc<RtspService>, events: mpsc::Sender<SessionEvent>, stream_id: String, url: String) {
    tokio::spawn(async move {
        let cmd = match rtsp.start(&stream_id, &url).await {
            Ok(hls_url) => SessionCommand::TranscodeReady { stream_id, hls_url },
            Err(e) => SessionCommand::TranscodeFailed {
                stream_id,
                message: format!("{:#}", e),
            },
        };
        let _ = events.send(SessionEvent::Command(cmd)).await;
    });
}
