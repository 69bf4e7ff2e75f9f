pub mod engine;
pub mod rounds;
pub mod terms;

pub use engine::{
    transition, NegotiationCommand, NegotiationEngine, NegotiationError, NegotiationEvent,
    TransitionOutcome,
};
pub use rounds::{price_round, seed_from_quotation, PricedRound, ProposedLine, RoundValidationError};
pub use terms::{effective_terms, EffectiveTerms};
