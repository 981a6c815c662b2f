//! Transaction handles.

use bytes::Bytes;
use stomplite_core::{header, Headers};

use crate::client::Client;
use crate::error::Result;

/// An open transaction, returned by `Client::begin`.
///
/// The handle only carries the transaction id. Frames sent through it go
/// straight to the broker; nothing is batched locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: String,
}

impl Transaction {
    pub(crate) fn new(id: String) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send a message as part of this transaction.
    pub fn send(
        &self,
        client: &mut Client,
        destination: &str,
        mut headers: Headers,
        body: impl Into<Bytes>,
    ) -> Result<()> {
        headers.set(header::TRANSACTION, self.id.as_str());
        client.send(destination, headers, body)
    }

    pub fn commit(&self, client: &mut Client, headers: Headers) -> Result<()> {
        client.commit(&self.id, headers)
    }

    pub fn abort(&self, client: &mut Client, headers: Headers) -> Result<()> {
        client.abort(&self.id, headers)
    }
}
