// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for escrow and settlement processing.

use thiserror::Error;

/// Broad classification of an [`EscrowError`].
///
/// Validation and conflict errors are rejected before any state change;
/// provider errors are retried by the scheduler; configuration errors are
/// surfaced to an operator and never silently defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Provider,
    Configuration,
}

/// Escrow and settlement processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// Amount is zero, negative, or otherwise malformed
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Check-out date is not after the check-in date
    #[error("invalid date range")]
    InvalidDateRange,

    /// Fee breakdown does not sum to the captured amount
    #[error("fee breakdown does not match captured amount")]
    CaptureMismatch,

    /// Referenced booking does not exist
    #[error("booking not found")]
    BookingNotFound,

    /// Booking ID already exists
    #[error("duplicate booking ID")]
    DuplicateBooking,

    /// The booking or payment does not permit the attempted transition
    #[error("transition not permitted from current status")]
    InvalidTransition,

    /// The dispute window for the subject has already closed
    #[error("dispute window closed for this subject")]
    DisputeWindowClosed,

    /// The subject's funds have already left escrow
    #[error("funds already released for this subject")]
    AlreadyReleased,

    /// A dispute on the same subject is already open
    #[error("dispute already open for this subject")]
    DisputeAlreadyOpen,

    /// No dispute exists for the referenced subject
    #[error("dispute not found for this subject")]
    DisputeNotFound,

    /// The dispute is not awaiting a responder action
    #[error("dispute is not awaiting a response")]
    DisputeNotAwaitingResponse,

    /// The dispute has not been escalated to admin review
    #[error("dispute is not escalated")]
    DisputeNotEscalated,

    /// Wallet debit would exceed the withdrawable balance
    #[error("insufficient available funds")]
    InsufficientFunds,

    /// Referenced wallet does not exist
    #[error("wallet not found")]
    WalletNotFound,

    /// Payment gateway call failed
    #[error("payment provider error: {0}")]
    Provider(String),

    /// Gateway verification did not confirm the charge
    #[error("payment verification failed")]
    VerificationFailed,

    /// Transfer retry budget exhausted; payment flagged for manual review
    #[error("transfer retry budget exhausted")]
    RetriesExhausted,

    /// No fee tier or config row matches the request
    #[error("no matching fee configuration")]
    ConfigurationMissing,

    /// Booking names a gateway provider with no registered adapter
    #[error("payment provider not registered")]
    ProviderNotRegistered,
}

impl EscrowError {
    /// Classifies the error per the propagation policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::InvalidAmount
            | EscrowError::InvalidDateRange
            | EscrowError::CaptureMismatch => ErrorKind::Validation,

            EscrowError::BookingNotFound
            | EscrowError::DuplicateBooking
            | EscrowError::InvalidTransition
            | EscrowError::DisputeWindowClosed
            | EscrowError::AlreadyReleased
            | EscrowError::DisputeAlreadyOpen
            | EscrowError::DisputeNotFound
            | EscrowError::DisputeNotAwaitingResponse
            | EscrowError::DisputeNotEscalated
            | EscrowError::InsufficientFunds
            | EscrowError::WalletNotFound => ErrorKind::Conflict,

            EscrowError::Provider(_)
            | EscrowError::VerificationFailed
            | EscrowError::RetriesExhausted => ErrorKind::Provider,

            EscrowError::ConfigurationMissing | EscrowError::ProviderNotRegistered => {
                ErrorKind::Configuration
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, EscrowError};

    #[test]
    fn error_display_messages() {
        assert_eq!(
            EscrowError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            EscrowError::CaptureMismatch.to_string(),
            "fee breakdown does not match captured amount"
        );
        assert_eq!(EscrowError::BookingNotFound.to_string(), "booking not found");
        assert_eq!(
            EscrowError::DisputeWindowClosed.to_string(),
            "dispute window closed for this subject"
        );
        assert_eq!(
            EscrowError::Provider("timeout".into()).to_string(),
            "payment provider error: timeout"
        );
        assert_eq!(
            EscrowError::ConfigurationMissing.to_string(),
            "no matching fee configuration"
        );
    }

    #[test]
    fn kinds_follow_propagation_policy() {
        assert_eq!(EscrowError::InvalidAmount.kind(), ErrorKind::Validation);
        assert_eq!(EscrowError::AlreadyReleased.kind(), ErrorKind::Conflict);
        assert_eq!(EscrowError::DisputeAlreadyOpen.kind(), ErrorKind::Conflict);
        assert_eq!(
            EscrowError::Provider("down".into()).kind(),
            ErrorKind::Provider
        );
        assert_eq!(
            EscrowError::ConfigurationMissing.kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = EscrowError::InsufficientFunds;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
