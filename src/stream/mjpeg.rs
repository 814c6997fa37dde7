//! MJPEG frame hub
//!
//! Holds the latest encoded frame and fans it out to every attached HTTP
//! client. Each client gets its own forwarding task with a one-slot channel,
//! so a slow client only ever skips frames and never stalls the others.

use arc_swap::ArcSwap;
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::events::{EventBus, SystemEvent};
use crate::video::VideoFrame;

/// Resend the last frame after this long without a new one
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

pub type ClientId = String;

#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: ClientId,
    pub connected_at: Instant,
    pub frames_sent: u64,
}

/// Latest-frame store plus client registry
pub struct MjpegStreamHandler {
    current_frame: ArcSwap<Option<VideoFrame>>,
    frame_notify: broadcast::Sender<()>,
    online: AtomicBool,
    clients: RwLock<HashMap<ClientId, ClientSession>>,
    events: Option<Arc<EventBus>>,
}

impl MjpegStreamHandler {
    pub fn new(events: Option<Arc<EventBus>>) -> Self {
        let (frame_notify, _) = broadcast::channel(16);
        Self {
            current_frame: ArcSwap::from_pointee(None),
            frame_notify,
            online: AtomicBool::new(false),
            clients: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Publish a new encoded frame
    pub fn update_frame(&self, frame: VideoFrame) {
        self.current_frame.store(Arc::new(Some(frame)));
        let _ = self.frame_notify.send(());
    }

    /// Drop the stored frame; used when a new capture session begins
    pub fn clear_frame(&self) {
        self.current_frame.store(Arc::new(None));
    }

    pub fn current_frame(&self) -> Option<VideoFrame> {
        (**self.current_frame.load()).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.frame_notify.subscribe()
    }

    pub fn set_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    /// Mark offline and wake every client so its stream ends
    pub fn set_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        let _ = self.frame_notify.send(());
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    fn register_client(&self, client_id: ClientId) {
        let count = {
            let mut clients = self.clients.write();
            clients.insert(
                client_id.clone(),
                ClientSession {
                    id: client_id.clone(),
                    connected_at: Instant::now(),
                    frames_sent: 0,
                },
            );
            clients.len()
        };
        info!(client_id = %client_id, "MJPEG client connected (total: {})", count);
        self.publish_client_count(count);
    }

    fn unregister_client(&self, client_id: &str) {
        let (session, count) = {
            let mut clients = self.clients.write();
            (clients.remove(client_id), clients.len())
        };
        if let Some(session) = session {
            info!(
                client_id = %client_id,
                "MJPEG client disconnected after {:.1}s ({} frames)",
                session.connected_at.elapsed().as_secs_f32(),
                session.frames_sent
            );
            self.publish_client_count(count);
        }
    }

    fn record_frame_sent(&self, client_id: &str) {
        if let Some(session) = self.clients.write().get_mut(client_id) {
            session.frames_sent += 1;
        }
    }

    fn publish_client_count(&self, clients: usize) {
        if let Some(events) = &self.events {
            events.publish(SystemEvent::StreamClientsChanged { clients });
        }
    }

    /// Multipart body for one client
    ///
    /// Ends when the hub goes offline or the client goes away. Missing frames
    /// (device hiccups, encode failures) never end it; the last frame is
    /// repeated as a keepalive instead.
    pub fn client_stream(
        self: &Arc<Self>,
        guard: ClientGuard,
    ) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let guard = Arc::new(guard);
        let (tx, mut rx) = mpsc::channel::<Bytes>(1);

        let hub = self.clone();
        let task_guard = guard.clone();
        tokio::spawn(async move {
            let _guard = task_guard;
            let mut notify_rx = hub.subscribe();
            let mut last_seq = None;

            if let Some(frame) = hub.current_frame() {
                if tx.send(create_mjpeg_part(frame.data())).await.is_err() {
                    return;
                }
                last_seq = Some(frame.sequence);
            }

            loop {
                if !hub.is_online() {
                    break;
                }

                let resend = match tokio::time::timeout(KEEPALIVE_INTERVAL, notify_rx.recv()).await
                {
                    Ok(Ok(())) => false,
                    Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        debug!("MJPEG client lagged, skipped {} notifications", skipped);
                        false
                    }
                    Ok(Err(broadcast::error::RecvError::Closed)) => break,
                    Err(_) => true,
                };

                if !hub.is_online() {
                    break;
                }

                let Some(frame) = hub.current_frame() else {
                    continue;
                };
                if !resend && last_seq == Some(frame.sequence) {
                    continue;
                }
                if tx.send(create_mjpeg_part(frame.data())).await.is_err() {
                    break;
                }
                last_seq = Some(frame.sequence);
            }
        });

        let hub = self.clone();
        async_stream::stream! {
            while let Some(part) = rx.recv().await {
                yield Ok::<Bytes, std::io::Error>(part);
                hub.record_frame_sent(guard.id());
            }
        }
    }
}

/// Registers a client on creation and unregisters it on drop
pub struct ClientGuard {
    client_id: ClientId,
    handler: Arc<MjpegStreamHandler>,
}

impl ClientGuard {
    pub fn new(client_id: ClientId, handler: Arc<MjpegStreamHandler>) -> Self {
        handler.register_client(client_id.clone());
        Self { client_id, handler }
    }

    pub fn id(&self) -> &ClientId {
        &self.client_id
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.handler.unregister_client(&self.client_id);
    }
}

/// One multipart part: boundary, headers, blank line, JPEG, CRLF
pub fn create_mjpeg_part(jpeg_data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(96 + jpeg_data.len());
    buf.put_slice(b"--frame\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n\r\n", jpeg_data.len()).as_bytes());
    buf.put_slice(jpeg_data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{PixelFormat, Resolution};
    use futures::StreamExt;

    fn frame(seq: u64) -> VideoFrame {
        VideoFrame::new(
            Bytes::from(vec![seq as u8; 16]),
            Resolution::VGA,
            PixelFormat::Mjpeg,
            seq,
        )
    }

    #[test]
    fn test_create_mjpeg_part() {
        let part = create_mjpeg_part(b"JPEGDATA");
        assert_eq!(
            part.as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\nJPEGDATA\r\n"
        );
    }

    #[tokio::test]
    async fn test_client_guard_registration_and_events() {
        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe();
        let hub = Arc::new(MjpegStreamHandler::new(Some(events)));

        let guard = ClientGuard::new("a".to_string(), hub.clone());
        assert_eq!(hub.client_count(), 1);
        drop(guard);
        assert_eq!(hub.client_count(), 0);

        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::StreamClientsChanged { clients: 1 }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SystemEvent::StreamClientsChanged { clients: 0 }
        ));
    }

    #[tokio::test]
    async fn test_stream_delivers_frames_and_ends_offline() {
        let hub = Arc::new(MjpegStreamHandler::new(None));
        hub.set_online();
        hub.update_frame(frame(1));

        let guard = ClientGuard::new("viewer".to_string(), hub.clone());
        let mut stream = Box::pin(hub.client_stream(guard));

        let first = stream.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"--frame\r\n"));
        assert!(first.ends_with(&[1u8, 1, b'\r', b'\n']));

        hub.update_frame(frame(2));
        let second = stream.next().await.unwrap().unwrap();
        assert!(second.ends_with(&[2u8, 2, b'\r', b'\n']));

        hub.set_offline();
        let end = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
        drop(stream);

        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.client_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
