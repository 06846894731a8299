use std::{sync::Arc, time::Duration};

use comms::{
    Client,
    msg::{CommMessage, MessageMeta, Protos},
};
use log::{debug, warn};

use crate::{
    error::{NodeErr, Result},
    tracking::MessageTracker,
};

/// Sends messages through a `Client` and correlates their responses.
pub struct SyncMessenger {
    tracker: Arc<MessageTracker>,
}

impl SyncMessenger {
    /// Creates a new `SyncMessenger` recording its requests in `tracker`.
    pub fn new(tracker: Arc<MessageTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &MessageTracker {
        &self.tracker
    }

    /// Sends a message expecting a single response, without waiting for it.
    ///
    /// # Arguments
    /// * `client` - The connection to send through.
    /// * `meta` - The message's header, its request id is overwritten.
    /// * `protos` - The encoding of `data`.
    /// * `data` - The raw payload.
    ///
    /// # Returns
    /// The request id to wait on, or a `Transport` error if the client refused the message.
    pub fn send_async(
        &self,
        client: &dyn Client,
        meta: MessageMeta,
        protos: Protos,
        data: &[u8],
    ) -> Result<u64> {
        self.send_tracked(client, meta, protos, data, 1)
    }

    /// Sends a message and blocks until its response arrives.
    ///
    /// An expired wait is reported the same way whether the message got lost on the way
    /// out or its response never came back.
    ///
    /// # Returns
    /// The response payloads, a `Transport` error if sending failed, a `Timeout` error if
    /// no response arrived in time or `Terminated` if the node shut down meanwhile.
    pub fn send_sync(
        &self,
        client: &dyn Client,
        meta: MessageMeta,
        protos: Protos,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>> {
        let request_id = self.send_async(client, meta, protos, data)?;

        match self.tracker.wait_for_responses(request_id, timeout) {
            Some(payloads) => Ok(payloads),
            None if self.tracker.is_closed() => Err(NodeErr::Terminated),
            None => {
                warn!(request_id = request_id; "no response within {timeout:?}");
                Err(NodeErr::Timeout {
                    what: "response",
                    after: timeout,
                })
            }
        }
    }

    /// Sends a message whose request completes after `expected` responses.
    pub fn send_tracked(
        &self,
        client: &dyn Client,
        mut meta: MessageMeta,
        protos: Protos,
        data: &[u8],
        expected: u32,
    ) -> Result<u64> {
        let request_id = self.tracker.add_message_track(expected);
        meta.request_id = request_id;

        if let Err(e) = client.send(&meta, protos, data) {
            warn!(request_id = request_id; "failed to send {:?}: {e}", meta.cmd);
            self.tracker.discard(request_id);
            return Err(NodeErr::Transport(e));
        }

        debug!(request_id = request_id; "sent {:?}", meta.cmd);
        Ok(request_id)
    }

    /// Routes an inbound response to its request.
    ///
    /// Responses nobody is tracking anymore are dropped.
    pub fn on_message_arrival(&self, msg: CommMessage) {
        let request_id = msg.meta.request_id;
        let payload = (!msg.data.is_empty()).then_some(msg.data);
        self.tracker.notify_message_arrival_with(request_id, payload);
    }
}
