//! Adapters between the lock protocol and physical transports.
//!
//! The lock protocol only needs an ordered channel in each direction
//! carrying [ToAuthority](crate::msg::ToAuthority) and
//! [ToSubordinate](crate::msg::ToSubordinate) messages.
//! Anything that implements [Sink] and [Stream] for these message types can be
//! passed to [Link::connect](crate::Link::connect) and [Relay::serve](crate::Relay::serve).
//!
//! This module provides two ready-made transports:
//!
//!   * [local::pair] connects contexts within the same process, for example threads
//!     running their own Tokio runtime,
//!   * [framed] encodes messages as length-delimited JSON frames over any byte stream,
//!     for example pipes or sockets connecting OS processes.

use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, io};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub mod local;

/// Maximum length of a received frame.
pub const MAX_FRAME_LENGTH: usize = 65_536;

/// Sends and receives messages as length-delimited JSON frames over a byte stream.
///
/// Frames that cannot be decoded are logged and skipped.
/// The stream ends on the first I/O error.
pub fn framed<T, U, R, W>(
    reader: R, writer: W,
) -> (impl Sink<T, Error = io::Error> + Send + 'static, impl Stream<Item = U> + Send + 'static)
where
    T: Serialize + Send + 'static,
    U: DeserializeOwned + Send + 'static,
    R: AsyncRead + Send + 'static,
    W: AsyncWrite + Send + 'static,
{
    let codec = || LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_LENGTH).new_codec();

    let sink = FramedWrite::new(Box::pin(writer), codec())
        .with(|item: T| future::ready(serde_json::to_vec(&item).map(Bytes::from).map_err(io::Error::from)));

    let stream = FramedRead::new(Box::pin(reader), codec())
        .take_while(|res| {
            if let Err(err) = res {
                log::debug!("receiving frame failed: {}", err);
            }
            future::ready(res.is_ok())
        })
        .filter_map(|res| {
            let item = match res {
                Ok(buf) => match serde_json::from_slice::<U>(&buf) {
                    Ok(item) => Some(item),
                    Err(err) => {
                        log::warn!("skipping undecodable frame: {}", err);
                        None
                    }
                },
                Err(_) => None,
            };
            future::ready(item)
        });

    (sink, stream)
}

/// Forwards queued messages to the sink until the queue or the sink is closed.
pub(crate) async fn forward<T, S>(mut rx: mpsc::UnboundedReceiver<T>, sink: S)
where
    S: Sink<T>,
    S::Error: fmt::Display,
{
    futures::pin_mut!(sink);

    while let Some(msg) = rx.recv().await {
        if let Err(err) = sink.send(msg).await {
            log::debug!("sending message failed: {}", err);
            return;
        }
    }

    let _ = sink.close().await;
}
