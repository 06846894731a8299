//! The writing half of a link, frames every message with its length.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize};

/// The sending end handle of the communication.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    frame: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            frame: Vec::new(),
        }
    }

    /// Frames `msg` and writes it to the inner writer.
    ///
    /// The serialized head is staged behind a length placeholder, a borrowed tail is
    /// written straight from the message so payloads are never copied.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// An `InvalidInput` error if the frame is larger than `MAX_FRAME_LEN`, or the
    /// underlying writer's error.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.frame.clear();
        self.frame.extend_from_slice(&[0; LEN_TYPE_SIZE]);

        let tail = msg.serialize(&mut self.frame)?.unwrap_or_default();
        let body_len = self.frame.len() - LEN_TYPE_SIZE + tail.len();

        if body_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Frame of {body_len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        self.frame[..LEN_TYPE_SIZE].copy_from_slice(&(body_len as LenType).to_be_bytes());
        self.tx.write_all(&self.frame).await?;

        if !tail.is_empty() {
            self.tx.write_all(tail).await?;
        }

        self.tx.flush().await
    }
}
