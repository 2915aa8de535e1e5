//! Turn state machine.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Where a turn is in the exchange with the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    /// The user message is on its way to the model.
    Sending,
    /// Tool calls of the given round are being dispatched and answered.
    AwaitingToolResults { round: usize },
    /// Waiting for the model's follow-up after a tool round.
    Finalizing { round: usize },
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Sending => f.write_str("sending"),
            Self::AwaitingToolResults { round } => write!(f, "awaiting_tool_results({round})"),
            Self::Finalizing { round } => write!(f, "finalizing({round})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid turn transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TurnState,
    pub to: TurnState,
}

impl TurnState {
    /// Validate and take the transition to `next`.
    pub fn advance(self, next: Self) -> Result<Self, InvalidTransition> {
        let allowed = match (self, next) {
            (Self::Idle, Self::Sending)
            | (Self::Sending | Self::Finalizing { .. }, Self::Idle)
            | (Self::Sending, Self::AwaitingToolResults { round: 1 }) => true,
            (Self::AwaitingToolResults { round }, Self::Finalizing { round: next_round }) => {
                round == next_round
            }
            (Self::Finalizing { round }, Self::AwaitingToolResults { round: next_round }) => {
                next_round == round + 1
            }
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Current state of one turn plus every state it passed through.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    state: TurnState,
    trace: Vec<TurnState>,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self {
            state: TurnState::Idle,
            trace: vec![TurnState::Idle],
        }
    }
}

impl TurnMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn advance(&mut self, next: TurnState) -> Result<(), InvalidTransition> {
        self.state = self.state.advance(next)?;
        self.trace.push(next);
        Ok(())
    }

    /// Return to `Idle` from anywhere, e.g. after a failed turn.
    pub fn reset(&mut self) {
        if self.state != TurnState::Idle {
            self.state = TurnState::Idle;
            self.trace.push(TurnState::Idle);
        }
    }

    #[must_use]
    pub fn trace(&self) -> &[TurnState] {
        &self.trace
    }

    #[must_use]
    pub fn into_trace(self) -> Vec<TurnState> {
        self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_answer_path() {
        let mut machine = TurnMachine::new();
        machine.advance(TurnState::Sending).unwrap();
        machine.advance(TurnState::Idle).unwrap();
        assert_eq!(
            machine.trace(),
            &[TurnState::Idle, TurnState::Sending, TurnState::Idle]
        );
    }

    #[test]
    fn tool_rounds_must_be_consecutive() {
        let mut machine = TurnMachine::new();
        machine.advance(TurnState::Sending).unwrap();
        machine
            .advance(TurnState::AwaitingToolResults { round: 1 })
            .unwrap();
        machine.advance(TurnState::Finalizing { round: 1 }).unwrap();

        let err = machine
            .advance(TurnState::AwaitingToolResults { round: 3 })
            .unwrap_err();
        assert_eq!(err.from, TurnState::Finalizing { round: 1 });

        machine
            .advance(TurnState::AwaitingToolResults { round: 2 })
            .unwrap();
        assert_eq!(machine.state(), TurnState::AwaitingToolResults { round: 2 });
    }

    #[test]
    fn cannot_skip_sending() {
        assert!(TurnState::Idle.advance(TurnState::Finalizing { round: 1 }).is_err());
        assert!(
            TurnState::Sending
                .advance(TurnState::Finalizing { round: 1 })
                .is_err()
        );
    }

    #[test]
    fn reset_records_idle_once() {
        let mut machine = TurnMachine::new();
        machine.advance(TurnState::Sending).unwrap();
        machine.reset();
        machine.reset();
        assert_eq!(machine.trace().len(), 3);
        assert_eq!(machine.state(), TurnState::Idle);
    }
}
