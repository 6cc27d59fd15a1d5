use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use ptt_contracts::ResponseStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

use super::sse::SseEvent;

/// Frames handed to the HTTP body.
pub type FrameSender = mpsc::Sender<Result<Bytes, Infallible>>;

/// Why a relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The module closed its stream.
    StreamEnded,
    /// The browser went away.
    ClientGone,
}

/// Copies a module event stream into `frames` as SSE until either side
/// stops.
///
/// Messages are written in the order the module emitted them. Once the
/// client is gone nothing else is written and the module stream is dropped,
/// which cancels it on the module side. With `keep_alive` set, a comment
/// frame goes out whenever that long passes without a message.
pub fn spawn_relay(
    plugin_id: String,
    mut stream: ResponseStream,
    frames: FrameSender,
    keep_alive: Option<Duration>,
) -> JoinHandle<RelayEnd> {
    tokio::spawn(async move {
        let mut ticker = keep_alive.map(|every| {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut relayed = 0usize;

        let end = loop {
            tokio::select! {
                biased;
                _ = frames.closed() => break RelayEnd::ClientGone,
                next = stream.next() => {
                    let Some(message) = next else {
                        break RelayEnd::StreamEnded;
                    };
                    let event = SseEvent::from_message(&message);
                    if event.is_empty() {
                        trace!(plugin_id = %plugin_id, "skipping empty event");
                        continue;
                    }
                    if frames.send(Ok(event.encode())).await.is_err() {
                        break RelayEnd::ClientGone;
                    }
                    relayed += 1;
                    if let Some(ticker) = ticker.as_mut() {
                        ticker.reset();
                    }
                }
                _ = next_tick(&mut ticker) => {
                    let comment = SseEvent::comment("keep-alive").encode();
                    if frames.send(Ok(comment)).await.is_err() {
                        break RelayEnd::ClientGone;
                    }
                }
            }
        };

        drop(stream);
        debug!(plugin_id = %plugin_id, relayed, reason = ?end, "event relay finished");
        end
    })
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;
    use ptt_contracts::ResponseMessage;

    use super::*;

    /// Three ticks one second apart, then `stop` at four seconds.
    fn ticking(emitted: Arc<AtomicUsize>) -> ResponseStream {
        async_stream::stream! {
            for n in 1..=4u64 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                emitted.fetch_add(1, Ordering::SeqCst);
                let body = if n < 4 { format!("tick {n}") } else { "stop".to_string() };
                yield ResponseMessage::new(200, body);
            }
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn relays_every_frame_in_order_then_closes() {
        let (tx, mut rx) = mpsc::channel(4);
        let emitted = Arc::new(AtomicUsize::new(0));
        let relay = spawn_relay(
            "demo".into(),
            ticking(Arc::clone(&emitted)),
            tx,
            Some(Duration::from_secs(15)),
        );

        let started = Instant::now();
        let mut received = Vec::new();
        while let Some(frame) = rx.recv().await {
            received.push(String::from_utf8(frame.unwrap().to_vec()).unwrap());
        }

        assert_eq!(
            received,
            [
                "data: tick 1\n\n",
                "data: tick 2\n\n",
                "data: tick 3\n\n",
                "data: stop\n\n"
            ]
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(relay.await.unwrap(), RelayEnd::StreamEnded);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_relay_and_module_stream() {
        let (tx, mut rx) = mpsc::channel(4);
        let emitted = Arc::new(AtomicUsize::new(0));
        let relay = spawn_relay("demo".into(), ticking(Arc::clone(&emitted)), tx, None);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(&first[..], b"data: tick 1\n\n");
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(rx);

        assert_eq!(relay.await.unwrap(), RelayEnd::ClientGone);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(emitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_streams_get_keep_alive_comments() {
        let (tx, mut rx) = mpsc::channel(4);
        let relay = spawn_relay(
            "demo".into(),
            stream::pending().boxed(),
            tx,
            Some(Duration::from_secs(15)),
        );

        for _ in 0..2 {
            let frame = rx.recv().await.unwrap().unwrap();
            assert_eq!(&frame[..], b": keep-alive\n\n");
        }
        drop(rx);
        assert_eq!(relay.await.unwrap(), RelayEnd::ClientGone);
    }

    #[tokio::test]
    async fn empty_events_are_skipped() {
        let (tx, mut rx) = mpsc::channel(4);
        let messages = vec![ResponseMessage::new(200, ""), ResponseMessage::new(200, "x")];
        let relay = spawn_relay("demo".into(), stream::iter(messages).boxed(), tx, None);

        assert_eq!(&rx.recv().await.unwrap().unwrap()[..], b"data: x\n\n");
        assert!(rx.recv().await.is_none());
        assert_eq!(relay.await.unwrap(), RelayEnd::StreamEnded);
    }
}
