//! Streams a crawl's progress events to one live viewer.
//!
//! A single loop owns the connection: it forwards broker messages, sends
//! keepalive pings and watches inbound traffic, so writes never overlap.

use crate::pubsub::{Broker, Message, Subscription};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::pin::{Pin, pin};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Transport-independent websocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveTimings {
    /// Time allowed to write one frame
    pub write_wait: Duration,
    /// Time allowed between two inbound frames
    pub pong_wait: Duration,
    /// Interval between pings, must be shorter than `pong_wait`
    pub ping_period: Duration,
}

impl Default for LiveTimings {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
        }
    }
}

/// Why a live connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The crawl finished and its terminal event was delivered
    CrawlEnded,
    ClientClosed,
    ReadTimeout,
    ReadFailed(String),
    WriteTimeout,
    WriteFailed(String),
    /// The subscription was removed from the broker
    Unsubscribed,
}

/// Serves one live connection until the crawl ends, the client leaves or a
/// deadline passes. The subscription is removed from the broker on return.
pub async fn serve_connection<W, R, E>(
    broker: &Broker,
    sink: W,
    stream: R,
    mut subscription: Subscription,
    timings: LiveTimings,
) -> ConnectionEnd
where
    W: Sink<Frame>,
    W::Error: Display,
    R: Stream<Item = Result<Frame, E>>,
    E: Display,
{
    let mut sink = pin!(sink);
    let mut stream = pin!(stream);

    let mut ping = tokio::time::interval_at(Instant::now() + timings.ping_period, timings.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let read_deadline = tokio::time::sleep(timings.pong_wait);
    let mut read_deadline = pin!(read_deadline);

    let end = loop {
        tokio::select! {
            message = subscription.recv() => {
                let Some(message) = message else {
                    break ConnectionEnd::Unsubscribed;
                };

                let is_end = matches!(message, Message::CrawlEnd(_));
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize live message");
                        continue;
                    }
                };

                if let Err(end) = send_frame(&mut sink, Frame::Text(text), timings.write_wait).await {
                    break end;
                }

                if is_end {
                    let _ = send_frame(&mut sink, Frame::Close, timings.write_wait).await;
                    break ConnectionEnd::CrawlEnded;
                }
            }
            _ = ping.tick() => {
                if let Err(end) = send_frame(&mut sink, Frame::Ping, timings.write_wait).await {
                    break end;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Frame::Close)) | None => break ConnectionEnd::ClientClosed,
                Some(Ok(_)) => {
                    read_deadline.as_mut().reset(Instant::now() + timings.pong_wait);
                }
                Some(Err(e)) => break ConnectionEnd::ReadFailed(e.to_string()),
            },
            _ = &mut read_deadline => break ConnectionEnd::ReadTimeout,
        }
    };

    broker.unsubscribe(subscription.handle());
    tracing::debug!(topic = subscription.handle().topic(), reason = ?end, "Live connection closed");

    end
}

async fn send_frame<W>(sink: &mut Pin<&mut W>, frame: Frame, wait: Duration) -> Result<(), ConnectionEnd>
where
    W: Sink<Frame>,
    W::Error: Display,
{
    match tokio::time::timeout(wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionEnd::WriteFailed(e.to_string())),
        Err(_) => Err(ConnectionEnd::WriteTimeout),
    }
}
