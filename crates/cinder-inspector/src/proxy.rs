use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use nanoid::nanoid;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};

use cinder_stdio as stdio;

use crate::map::SourceMapRewriter;

/// Public<->private debugger frame proxy. DevTools connects to the public
/// port; frames relay to a WebSocket client dialed against the runtime's
/// private inspector port. One debugger session at a time: a new public
/// connection replaces the previous one.
pub struct InspectorBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    public_port: u16,
    private_port: u16,
    rewriter: Option<Arc<SourceMapRewriter>>,
    redial: Notify,
    session: Mutex<Option<JoinHandle<()>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl InspectorBridge {
    pub async fn start(
        public_port: u16,
        private_port: u16,
        rewriter: Option<Arc<SourceMapRewriter>>,
    ) -> Result<Self, String> {
        let listener = TcpListener::bind(("127.0.0.1", public_port))
            .await
            .map_err(|e| format!("failed to bind inspector port {}: {}", public_port, e))?;
        let public_port = listener
            .local_addr()
            .map_err(|e| format!("failed to read inspector addr: {}", e))?
            .port();

        let inner = Arc::new(BridgeInner {
            public_port,
            private_port,
            rewriter,
            redial: Notify::new(),
            session: Mutex::new(None),
            accept_task: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let accept = tokio::spawn(accept_loop(listener, inner.clone()));
        *inner.lock_accept() = Some(accept);
        stdio::logf!("inspector", "debugger bridge on 127.0.0.1:{}", public_port);
        Ok(Self { inner })
    }

    pub fn public_port(&self) -> u16 {
        self.inner.public_port
    }

    /// Drop the private-side connection and dial it again, keeping the
    /// public listener and the debugger session alive. Used across host
    /// reloads, where the private inspector endpoint restarts.
    pub fn reconnect(&self) {
        self.inner.redial.notify_waiters();
    }

    /// Idempotent teardown of listener and session tasks.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.inner.lock_accept().take() {
            task.abort();
        }
        if let Some(task) = self.inner.lock_session().take() {
            task.abort();
        }
        stdio::log("inspector", "debugger bridge closed");
    }
}

impl BridgeInner {
    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_accept(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.accept_task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn accept_loop(listener: TcpListener, inner: Arc<BridgeInner>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::debug!(error = %e, "inspector accept failed");
                continue;
            }
        };
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let session_id = nanoid!(8);
        stdio::logf!("inspector", "debugger connected from {} ({})", peer, session_id);

        let pump = tokio::spawn(run_session(stream, inner.clone(), session_id));
        let mut guard = inner.lock_session();
        if let Some(previous) = guard.replace(pump) {
            previous.abort();
        }
    }
}

async fn run_session(stream: TcpStream, inner: Arc<BridgeInner>, session_id: String) {
    let public = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            stdio::warn("inspector", &format!("websocket handshake failed: {}", e));
            return;
        }
    };
    let (mut public_tx, mut public_rx) = public.split();
    let private_url = format!("ws://127.0.0.1:{}/", inner.private_port);

    'session: loop {
        let private = match connect_async(private_url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                stdio::warn(
                    "inspector",
                    &format!("private inspector endpoint unreachable: {}", e),
                );
                break 'session;
            }
        };
        let (mut private_tx, mut private_rx) = private.split();

        loop {
            tokio::select! {
                _ = inner.redial.notified() => {
                    let _ = private_tx.close().await;
                    stdio::debugf!("inspector", "redialing private endpoint ({})", session_id);
                    continue 'session;
                }
                frame = public_rx.next() => {
                    match frame {
                        Some(Ok(message)) if !message.is_close() => {
                            if private_tx.send(message).await.is_err() {
                                break 'session;
                            }
                        }
                        _ => break 'session,
                    }
                }
                frame = private_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let text = match &inner.rewriter {
                                Some(rewriter) => {
                                    rewriter.rewrite_protocol_message(&text).unwrap_or(text)
                                }
                                None => text,
                            };
                            if public_tx.send(Message::Text(text)).await.is_err() {
                                break 'session;
                            }
                        }
                        Some(Ok(message)) if !message.is_close() => {
                            if public_tx.send(message).await.is_err() {
                                break 'session;
                            }
                        }
                        _ => break 'session,
                    }
                }
            }
        }
    }

    stdio::logf!("inspector", "debugger session ended ({})", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Minimal private-side inspector stand-in: accepts WebSocket
    /// connections and echoes text frames back.
    async fn spawn_echo_endpoint() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut tx, mut rx) = ws.split();
                    while let Some(Ok(message)) = rx.next().await {
                        if message.is_text() && tx.send(message).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_frames_relay_both_ways() {
        let private_port = spawn_echo_endpoint().await;
        let bridge = InspectorBridge::start(0, private_port, None).await.unwrap();

        let url = format!("ws://127.0.0.1:{}/", bridge.public_port());
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();

        client
            .send(Message::Text(r#"{"id":1,"method":"Runtime.enable"}"#.to_string()))
            .await
            .unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            echoed.into_text().unwrap(),
            r#"{"id":1,"method":"Runtime.enable"}"#
        );

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_new_session_replaces_previous() {
        let private_port = spawn_echo_endpoint().await;
        let bridge = InspectorBridge::start(0, private_port, None).await.unwrap();
        let url = format!("ws://127.0.0.1:{}/", bridge.public_port());

        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        first
            .send(Message::Text("hello".to_string()))
            .await
            .unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), first.next()).await;

        let (mut second, _) = connect_async(url.as_str()).await.unwrap();
        second
            .send(Message::Text("again".to_string()))
            .await
            .unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(5), second.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(echoed.into_text().unwrap(), "again");

        // the first session's pump was aborted; it stops yielding frames
        let first_next =
            tokio::time::timeout(Duration::from_millis(500), first.next()).await;
        match first_next {
            Ok(None) | Ok(Some(Err(_))) | Err(_) => {}
            Ok(Some(Ok(frame))) => panic!("replaced session still live: {frame:?}"),
        }

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let private_port = spawn_echo_endpoint().await;
        let bridge = InspectorBridge::start(0, private_port, None).await.unwrap();
        bridge.shutdown();
        bridge.shutdown();
    }
}
