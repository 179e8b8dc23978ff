//! Message text for countdown notifications.
//!
//! Messages use Telegram's HTML subset. Countdown names are restricted to word
//! characters and whitespace, so they never need escaping.

use crate::{DisplayFormat, Remaining};

/// Generic apology sent when an operation fails unexpectedly.
pub const UNEXPECTED_ERROR_TEXT: &str =
    "Sorry, I ran into something unexpected. Please try again later.";

/// Details of a countdown: name, divider, and time left in the chosen format.
pub fn render_details(name: &str, remaining: &Remaining, format: DisplayFormat) -> String {
    let divider = "=".repeat(name.chars().count());
    let mut text = format!("<b>{name}</b>\n{divider}\n");

    if remaining.is_past() || remaining.is_zero() {
        text.push_str("Time is up!");
        return text;
    }

    match format {
        DisplayFormat::Inline => {
            text.push_str(&format!("{remaining} left"));
        }
        DisplayFormat::Itemized => {
            text.push_str("<i>Time left:</i>");
            for item in remaining.items() {
                text.push('\n');
                text.push_str(&item);
            }
        }
    }

    text
}

/// Notice sent when a countdown expires and its record is removed.
pub fn render_expired(name: &str) -> String {
    format!("Time is up! Countdown <b>{name}</b> has ended and was deleted.")
}

/// Confirmation sent after a user deletes a countdown.
pub fn render_deleted(name: &str) -> String {
    format!("You have deleted <b>{name}</b>.")
}
