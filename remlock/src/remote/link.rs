use futures::{Sink, Stream, StreamExt};
use std::{fmt, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use super::correlator::Correlator;
use crate::{
    error::LockError,
    msg::{ToAuthority, ToSubordinate},
    transport,
};

struct Inner {
    tx: mpsc::UnboundedSender<ToAuthority>,
    correlator: Correlator,
}

/// Connection of a subordinate to the lock authority.
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct Link(Arc<Inner>);

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Link").field("closed", &self.is_closed()).finish()
    }
}

impl Link {
    /// Connects to the authority using the specified message sink and stream.
    ///
    /// Messages are sent and received by background tasks.
    /// When the stream ends, all outstanding lock requests fail with [LockError::Disconnected].
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn connect<Tx, Rx>(tx: Tx, rx: Rx) -> Self
    where
        Tx: Sink<ToAuthority> + Send + 'static,
        Tx::Error: fmt::Display,
        Rx: Stream<Item = ToSubordinate> + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(transport::forward(out_rx, tx));

        let inner = Arc::new(Inner { tx: out_tx, correlator: Correlator::default() });
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            futures::pin_mut!(rx);
            while let Some(msg) = rx.next().await {
                log::trace!("<== {:?}", &msg);
                let Some(inner) = weak.upgrade() else { return };
                if let Some(release) = inner.correlator.resolve(msg) {
                    let _ = inner.tx.send(release);
                }
            }

            log::debug!("connection to lock authority closed");
            if let Some(inner) = weak.upgrade() {
                inner.correlator.close();
            }
        });

        Self(inner)
    }

    /// Connects to the authority over a byte stream using length-delimited JSON frames.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn connect_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let (tx, rx) = transport::framed::<ToAuthority, ToSubordinate, _, _>(reader, writer);
        Self::connect(tx, rx)
    }

    /// True, if the connection to the authority has been closed.
    pub fn is_closed(&self) -> bool {
        self.0.tx.is_closed() || self.0.correlator.is_closed()
    }

    pub(crate) fn send(&self, msg: ToAuthority) -> Result<(), LockError> {
        log::trace!("==> {:?}", &msg);
        self.0.tx.send(msg).map_err(|_| LockError::Disconnected)
    }

    pub(crate) fn correlator(&self) -> &Correlator {
        &self.0.correlator
    }
}
