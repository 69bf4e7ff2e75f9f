use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus, Party, Round};
use crate::domain::quotation::{Quotation, QuotationId, QuotationStatus};
use crate::negotiation::rounds::{price_round, seed_from_quotation, ProposedLine, RoundValidationError};

/// Status-level events of the round protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "party", rename_all = "snake_case")]
pub enum NegotiationEvent {
    Counter(Party),
    Accept(Party),
    Close(Party),
    /// The buyer declined the owning quotation outright.
    Reject,
}

/// A request to move a negotiation, carrying whatever payload the event needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NegotiationCommand {
    Counter {
        party: Party,
        proposer_id: String,
        lines: Vec<ProposedLine>,
        message: Option<String>,
    },
    Accept {
        party: Party,
    },
    Close {
        party: Party,
        reason: Option<String>,
    },
    Reject,
}

impl NegotiationCommand {
    pub fn event(&self) -> NegotiationEvent {
        match self {
            Self::Counter { party, .. } => NegotiationEvent::Counter(*party),
            Self::Accept { party } => NegotiationEvent::Accept(*party),
            Self::Close { party, .. } => NegotiationEvent::Close(*party),
            Self::Reject => NegotiationEvent::Reject,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: NegotiationStatus,
    pub to: NegotiationStatus,
    pub event: NegotiationEvent,
    /// Number of the round appended by this transition, if any.
    pub appended_round: Option<u32>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("negotiation is already {status:?}")]
    Terminal { status: NegotiationStatus },
    #[error("{party:?} cannot act while the negotiation is {status:?}")]
    OutOfTurn { party: Party, status: NegotiationStatus },
    #[error("quotation `{quotation_id}` is {status:?} and cannot be negotiated")]
    QuotationNotOpen { quotation_id: QuotationId, status: QuotationStatus },
    #[error("negotiation `{negotiation_id}` does not belong to quotation `{quotation_id}`")]
    QuotationMismatch { negotiation_id: NegotiationId, quotation_id: QuotationId },
    #[error(transparent)]
    InvalidRound(#[from] RoundValidationError),
}

impl NegotiationError {
    /// Terminal and closed-quotation failures mean another actor moved the thread on.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::Terminal { .. } | Self::QuotationNotOpen { .. })
    }
}

/// Pure status transition table.
pub fn transition(
    current: NegotiationStatus,
    event: NegotiationEvent,
) -> Result<NegotiationStatus, NegotiationError> {
    use NegotiationEvent::{Accept, Close, Counter, Reject};
    use NegotiationStatus::{Accepted, Closed, CounterBuyer, CounterSeller, Open, Rejected};

    if current.is_terminal() {
        return Err(NegotiationError::Terminal { status: current });
    }

    let to = match (current, event) {
        (Open, Counter(Party::Buyer)) | (CounterSeller, Counter(Party::Buyer)) => CounterBuyer,
        (Open, Counter(Party::Seller)) | (CounterBuyer, Counter(Party::Seller)) => CounterSeller,
        (Open, Accept(_))
        | (CounterBuyer, Accept(Party::Seller))
        | (CounterSeller, Accept(Party::Buyer)) => Accepted,
        (_, Close(_)) => Closed,
        (_, Reject) => Rejected,
        (status, Counter(party)) | (status, Accept(party)) => {
            return Err(NegotiationError::OutOfTurn { party, status });
        }
    };
    Ok(to)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NegotiationEngine;

impl NegotiationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Opens a thread on a sent quotation with round 0 seeded from its prices.
    pub fn open(
        &self,
        id: NegotiationId,
        quotation: &Quotation,
        opened_by: Party,
        now: DateTime<Utc>,
    ) -> Result<Negotiation, NegotiationError> {
        if !quotation.is_open_for_negotiation() {
            return Err(NegotiationError::QuotationNotOpen {
                quotation_id: quotation.id.clone(),
                status: quotation.status,
            });
        }

        let seeded = seed_from_quotation(quotation);
        Ok(Negotiation {
            id,
            quotation_id: quotation.id.clone(),
            status: NegotiationStatus::Open,
            opened_by,
            rounds: vec![Round {
                number: 0,
                proposed_by: Party::Seller,
                proposer_id: quotation.created_by.clone(),
                items: seeded.items,
                proposed_total: seeded.total,
                message: None,
                created_at: now,
            }],
            closed_by: None,
            close_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Validates the command against the current state and applies it. The negotiation is left
    /// untouched when an error is returned.
    pub fn apply(
        &self,
        negotiation: &mut Negotiation,
        quotation: &Quotation,
        command: NegotiationCommand,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, NegotiationError> {
        if negotiation.quotation_id != quotation.id {
            return Err(NegotiationError::QuotationMismatch {
                negotiation_id: negotiation.id.clone(),
                quotation_id: quotation.id.clone(),
            });
        }

        let event = command.event();
        let from = negotiation.status;
        let to = transition(from, event)?;

        let mut appended_round = None;
        match command {
            NegotiationCommand::Counter { party, proposer_id, lines, message } => {
                if !quotation.is_open_for_negotiation() {
                    return Err(NegotiationError::QuotationNotOpen {
                        quotation_id: quotation.id.clone(),
                        status: quotation.status,
                    });
                }
                let priced = price_round(quotation, &lines)?;
                let number = negotiation.next_round_number();
                negotiation.rounds.push(Round {
                    number,
                    proposed_by: party,
                    proposer_id,
                    items: priced.items,
                    proposed_total: priced.total,
                    message,
                    created_at: now,
                });
                appended_round = Some(number);
            }
            NegotiationCommand::Accept { .. } => {}
            NegotiationCommand::Close { party, reason } => {
                negotiation.closed_by = Some(party);
                negotiation.close_reason = reason;
            }
            NegotiationCommand::Reject => {
                negotiation.closed_by = Some(Party::Buyer);
            }
        }

        negotiation.status = to;
        negotiation.updated_at = now;
        Ok(TransitionOutcome { from, to, event, appended_round })
    }

    pub fn apply_with_audit<S>(
        &self,
        negotiation: &mut Negotiation,
        quotation: &Quotation,
        command: NegotiationCommand,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, NegotiationError>
    where
        S: AuditSink,
    {
        let negotiation_id = negotiation.id.clone();
        let result = self.apply(negotiation, quotation, command, now);
        match &result {
            Ok(outcome) => {
                let mut event = AuditEvent::new(
                    audit,
                    "negotiation.transition_applied",
                    AuditCategory::Negotiation,
                    AuditOutcome::Success,
                )
                .with_metadata("negotiation_id", negotiation_id.0.clone())
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str())
                .with_metadata("event", format!("{:?}", outcome.event));
                if let Some(round) = outcome.appended_round {
                    event = event.with_metadata("round", round.to_string());
                }
                sink.emit(event);
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "negotiation.transition_rejected",
                        AuditCategory::Negotiation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("negotiation_id", negotiation_id.0)
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}
