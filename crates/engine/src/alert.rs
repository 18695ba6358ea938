//! Renewal alert wording.

use subsentry_common::types::{Subscription, format_cost};
use subsentry_notifier::OutgoingEmail;

/// Translate a due subscription into the email its owner receives.
pub fn renewal_alert(sub: &Subscription) -> OutgoingEmail {
    let cost = format_cost(sub.cost_cents, &sub.currency);
    OutgoingEmail::new(
        sub.user_email.clone(),
        format!("Renewal Alert: {}", sub.name),
        format!(
            "Your {} subscription ({}) renews on {}.\n\nCheck your dashboard to cancel or pause it.",
            sub.name,
            cost,
            sub.renewal_date.format("%Y-%m-%d")
        ),
    )
}
