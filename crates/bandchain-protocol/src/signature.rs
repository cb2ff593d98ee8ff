//! Two-party signature exchange.
//!
//! ```text
//! Requester                                   Responder
//!   | create_block + sign + persist half       |
//!   |-------- Signature(half-signed) --------->|
//!   |                                          | countersign + persist
//!   |<------- Signature(completed) ------------|
//!   | accept_response + persist completed      |
//! ```
//!
//! The requester keeps at most one request outstanding. Its half-signed block
//! is already the latest block of its chain, so a second request would have
//! to build on a block whose hash changes on completion. For the same reason
//! no incoming request is countersigned while our own one is outstanding,
//! except when two peers cross requests: the lower key then gives up its own
//! request, which stays half-signed for good, and answers the other.

use std::time::Duration;

use tokio::time::Instant;

use bandchain_core::{validate_block, Block, Keypair, PublicKey};
use bandchain_store::{InsertResult, LedgerStore, LedgerStoreExt};

use crate::error::{ProtocolError, Result};

/// Configuration for signature exchanges.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// How long a requester waits for the countersigned block.
    pub timeout: Duration,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Where the requester side of an exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    RequestSent,
    Completed,
    TimedOut,
    Rejected,
    /// Given up in favour of a crossed request from the same peer.
    Yielded,
}

impl ExchangeState {
    /// True once the exchange reached a final state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExchangeState::Completed
                | ExchangeState::TimedOut
                | ExchangeState::Rejected
                | ExchangeState::Yielded
        )
    }
}

#[derive(Debug)]
struct Outstanding {
    responder: PublicKey,
    request: Block,
    deadline: Instant,
}

/// Signature exchange for one local identity, in both roles.
pub struct SignatureExchange {
    keypair: Keypair,
    config: SignatureConfig,
    outstanding: Option<Outstanding>,
    state: ExchangeState,
}

impl SignatureExchange {
    pub fn new(keypair: Keypair, config: SignatureConfig) -> Self {
        Self {
            keypair,
            config,
            outstanding: None,
            state: ExchangeState::Idle,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// State of the most recent exchange started as requester.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// True while a request waits for its response.
    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Responder of the outstanding request.
    pub fn outstanding_peer(&self) -> Option<PublicKey> {
        self.outstanding.as_ref().map(|o| o.responder)
    }

    /// Deadline of the outstanding request.
    pub fn deadline(&self) -> Option<Instant> {
        self.outstanding.as_ref().map(|o| o.deadline)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requester
    // ─────────────────────────────────────────────────────────────────────────

    /// Build, sign and persist a half-signed block for an interaction with
    /// `responder`, and return it for sending.
    pub async fn request<S: LedgerStore + ?Sized>(
        &mut self,
        store: &S,
        responder: PublicKey,
        up: u64,
        down: u64,
        now: Instant,
    ) -> Result<Block> {
        if let Some(out) = &self.outstanding {
            return Err(ProtocolError::ExchangeInProgress { peer: out.responder });
        }

        let me = self.public_key();
        let mut block = store.create_block(&me, &responder).await?.with_interaction(up, down);
        block.sign_as_requester(&self.keypair);
        validate_block(&block)?;

        self.persist_signature_request(store, &block).await?;

        tracing::debug!(
            peer = %responder,
            seq = block.sequence_number_requester,
            up,
            down,
            "signature request sent"
        );

        self.outstanding = Some(Outstanding {
            responder,
            request: block.clone(),
            deadline: now + self.config.timeout,
        });
        self.state = ExchangeState::RequestSent;
        Ok(block)
    }

    async fn persist_signature_request<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        block: &Block,
    ) -> Result<()> {
        match store.add_block(block).await? {
            InsertResult::Conflict { existing } => Err(ProtocolError::Conflict { existing }),
            _ => Ok(()),
        }
    }

    /// Handle a countersigned block coming back from `from`.
    ///
    /// The response is accepted only if it answers the outstanding request:
    /// same responder, the requester half untouched (which covers the
    /// requester sequence number and previous hash), and a responder half
    /// that was actually added and verifies. A rejected response leaves the
    /// half-signed block as it is.
    pub async fn accept_response<S: LedgerStore + ?Sized>(
        &mut self,
        store: &S,
        from: &PublicKey,
        response: &Block,
    ) -> Result<ExchangeState> {
        let Some(out) = &self.outstanding else {
            tracing::warn!(peer = %from, "signature response without outstanding request");
            return Ok(ExchangeState::Rejected);
        };

        if out.responder != *from {
            tracing::warn!(
                peer = %from,
                expected = %out.responder,
                "signature response from unexpected peer"
            );
            return Ok(ExchangeState::Rejected);
        }

        if let Err(reason) = check_response(&out.request, response) {
            tracing::warn!(peer = %from, reason, "signature response rejected");
            return Ok(self.finish(ExchangeState::Rejected));
        }

        match store.add_block(response).await? {
            InsertResult::Conflict { existing } => {
                tracing::warn!(peer = %from, %existing, "completed block conflicts with stored block");
                Ok(self.finish(ExchangeState::Rejected))
            }
            _ => {
                tracing::info!(
                    peer = %from,
                    seq = response.sequence_number_requester,
                    hash = %response.compute_hash(),
                    "signature exchange completed"
                );
                Ok(self.finish(ExchangeState::Completed))
            }
        }
    }

    /// Time out the outstanding request if its deadline has passed.
    ///
    /// Returns the half-signed block that stays in the store. No message is
    /// sent and nothing is retried.
    pub fn expire(&mut self, now: Instant) -> Option<Block> {
        let expired = self.outstanding.as_ref().is_some_and(|o| now >= o.deadline);
        if !expired {
            return None;
        }

        let out = self.outstanding.take()?;
        self.state = ExchangeState::TimedOut;
        tracing::info!(
            peer = %out.responder,
            seq = out.request.sequence_number_requester,
            "signature request timed out"
        );
        Some(out.request)
    }

    fn finish(&mut self, state: ExchangeState) -> ExchangeState {
        self.outstanding = None;
        self.state = state;
        state
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Responder
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether `request` can be countersigned now.
    ///
    /// Always true when no request of ours is outstanding. A request from the
    /// peer our own request went to is a crossed request; the side with the
    /// lower key yields its own request and answers, the other side declines.
    /// Any other request is declined and left to time out at its requester.
    pub fn admit_request(&mut self, request: &Block) -> bool {
        let Some(out) = &self.outstanding else {
            return true;
        };
        let requester = request.public_key_requester;
        if out.responder != requester || self.public_key() > requester {
            tracing::debug!(
                peer = %requester,
                outstanding = %out.responder,
                "signature request declined, own request outstanding"
            );
            return false;
        }

        tracing::info!(
            peer = %requester,
            seq = out.request.sequence_number_requester,
            "crossed signature request, own request yielded"
        );
        self.finish(ExchangeState::Yielded);
        true
    }

    /// Countersign a request addressed to us, persist the completed block and
    /// return it for sending back.
    ///
    /// Only the shape and the requester signature are checked. The totals
    /// the requester claims are taken as they are. Fails while a request of
    /// our own is outstanding, see [`SignatureExchange::admit_request`].
    pub async fn respond<S: LedgerStore + ?Sized>(&self, store: &S, request: &Block) -> Result<Block> {
        let me = self.public_key();
        if request.public_key_responder != me {
            return Err(ProtocolError::UnexpectedRequest(format!(
                "addressed to {}",
                request.public_key_responder
            )));
        }
        if request.has_responder_half() || request.signature_responder.is_some() {
            return Err(ProtocolError::UnexpectedRequest("responder half already set".into()));
        }
        if let Some(out) = &self.outstanding {
            return Err(ProtocolError::ExchangeInProgress { peer: out.responder });
        }
        validate_block(request)?;

        let latest = store.get_latest(&me).await?;
        let block = request.countersign(latest.as_ref(), &self.keypair);
        self.persist_signature_response(store, &block).await?;

        tracing::debug!(
            peer = %request.public_key_requester,
            seq = block.sequence_number_responder,
            "signature response sent"
        );
        Ok(block)
    }

    async fn persist_signature_response<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        block: &Block,
    ) -> Result<()> {
        match store.add_block(block).await? {
            InsertResult::Conflict { existing } => Err(ProtocolError::Conflict { existing }),
            _ => Ok(()),
        }
    }
}

fn check_response(request: &Block, response: &Block) -> std::result::Result<(), &'static str> {
    if response.sequence_number_requester != request.sequence_number_requester
        || response.previous_hash_requester != request.previous_hash_requester
    {
        return Err("requester sequence number or previous hash changed");
    }
    if !response.same_request(request) {
        return Err("requester half changed");
    }
    if !response.has_responder_half() || response.signature_responder.is_none() {
        return Err("responder half missing");
    }
    validate_block(response).map_err(|_| "invalid signatures")
}
