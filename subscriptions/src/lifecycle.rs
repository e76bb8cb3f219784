//! Pure subscription lifecycle transitions.
//!
//! Each function takes the current row and decides the next one without
//! touching storage, so the service can apply it with a compare-and-set and
//! recompute on contention.
//!
//! ```text
//!   pending_payment ──payment.completed──► active ──expiry passes──► expired
//!         │                                  │  ▲                      │
//!         │                                  │  └──payment.completed───┘
//!         └──────refund / cancel──────► cancelled ◄──refund / cancel──┘ (active only)
//! ```

use crate::error::SubscriptionError;
use chrono::{DateTime, Duration, Utc};
use gym_core::domain::{RenewalEntry, Subscription, SubscriptionState};

/// Outcome of a transition check.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Write this row.
    Apply(Box<Subscription>),
    /// Nothing to do; the reason is logged.
    Unchanged(&'static str),
}

/// A completed payment to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPayment<'a> {
    /// Payment id.
    pub payment_id: &'a str,
    /// Amount paid.
    pub amount: f64,
    /// Length of the paid period.
    pub period: Duration,
    /// Processing time.
    pub at: DateTime<Utc>,
}

/// Activate (or renew) on a completed payment.
///
/// A payment already applied is a replay and changes nothing, whatever the
/// state (an old payment redelivered after expiry must not revive it). The new
/// expiry extends from the later of `at` and the current expiry, so an early
/// renewal keeps the days already paid for.
///
/// # Errors
///
/// [`SubscriptionError::Validation`] for a blank payment id,
/// [`SubscriptionError::InvalidTransition`] from `cancelled`.
pub fn activate(current: &Subscription, payment: &AppliedPayment<'_>) -> Result<Transition, SubscriptionError> {
    if payment.payment_id.trim().is_empty() {
        return Err(SubscriptionError::Validation(format!(
            "payment for subscription {} has no payment id",
            current.id
        )));
    }

    let replay = current.payment_id.as_deref() == Some(payment.payment_id)
        || current.renewals.iter().any(|r| r.payment_id == payment.payment_id);
    if replay {
        return Ok(Transition::Unchanged("payment already applied"));
    }

    if current.state == SubscriptionState::Cancelled {
        return Err(SubscriptionError::InvalidTransition {
            id: current.id.clone(),
            from: current.state,
            change: "activate",
        });
    }

    let base = current.expires_at.map_or(payment.at, |expiry| expiry.max(payment.at));
    let mut next = current.clone();
    next.state = SubscriptionState::Active;
    next.expires_at = Some(base + payment.period);
    next.payment_id = Some(payment.payment_id.to_string());
    next.renewals.push(RenewalEntry {
        date: payment.at,
        payment_id: payment.payment_id.to_string(),
        amount: payment.amount,
    });
    next.updated_at = payment.at;
    Ok(Transition::Apply(Box::new(next)))
}

/// Cancel on refund or explicit request.
///
/// | From | To |
/// |------|----|
/// | `pending_payment` | `cancelled` |
/// | `active` | `cancelled` (expiry kept) |
/// | `cancelled` | unchanged |
/// | `expired` | unchanged |
#[must_use]
pub fn cancel(current: &Subscription, note: String, at: DateTime<Utc>) -> Transition {
    match current.state {
        SubscriptionState::Cancelled => Transition::Unchanged("already cancelled"),
        SubscriptionState::Expired => Transition::Unchanged("expired subscriptions stay expired"),
        SubscriptionState::PendingPayment | SubscriptionState::Active => {
            let mut next = current.clone();
            next.state = SubscriptionState::Cancelled;
            next.notes.push(note);
            next.updated_at = at;
            Transition::Apply(Box::new(next))
        }
    }
}

/// Note a failed payment; the state is left alone.
#[must_use]
pub fn record_failure(current: &Subscription, payment_id: &str, at: DateTime<Utc>) -> Transition {
    let note = failure_note(payment_id);
    if current.notes.contains(&note) {
        return Transition::Unchanged("failure already recorded");
    }
    let mut next = current.clone();
    next.notes.push(note);
    next.updated_at = at;
    Transition::Apply(Box::new(next))
}

/// Expire an active subscription whose period has ended.
#[must_use]
pub fn expire(current: &Subscription, at: DateTime<Utc>) -> Transition {
    match (current.state, current.expires_at) {
        (SubscriptionState::Active, Some(expiry)) if expiry <= at => {
            let mut next = current.clone();
            next.state = SubscriptionState::Expired;
            next.updated_at = at;
            Transition::Apply(Box::new(next))
        }
        _ => Transition::Unchanged("not overdue"),
    }
}

/// Note appended when a payment fails.
#[must_use]
pub fn failure_note(payment_id: &str) -> String {
    format!("Pago fallido: {payment_id}")
}
