//! Session-scoped ledger of messages the bot has sent, and the bulk deletion
//! engine that retracts them.
//!
//! The ledger lives for the lifetime of the process. A [`SentLedger`] is a
//! cheap cloneable handle; construct one at startup and hand clones to
//! everything that sends or deletes.

pub mod ledger;
pub mod pacing;
pub mod sweep;

pub use {
    ledger::{SentLedger, SentMessageRecord},
    pacing::{FixedDelay, NoDelay, Pacer},
    sweep::{BulkDeleter, ChatSweepReport, MessageOutcome, SweepError, SweepSummary},
};
