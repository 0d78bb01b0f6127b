//! The client's addressable location and the one-time checkout-return signal.
//!
//! The payment provider redirects back with marker query parameters. The
//! embedding shell owns real navigation; `ClientLocation` mirrors the
//! current URL so sync logic can read the marker and strip it exactly once,
//! keeping a page reload from re-triggering reconciliation.

use std::sync::RwLock;

use log::warn;
use url::Url;

/// Query parameter the checkout flow appends on a success redirect.
const CHECKOUT_PARAM: &str = "checkout";

/// Query parameter the provider portal appends on a return redirect.
const PORTAL_PARAM: &str = "portal";

/// Provider session reference forwarded on checkout success.
const SESSION_ID_PARAM: &str = "session_id";

/// How the user came back from the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutSignal {
    /// Returned from a completed checkout. Carries the provider's checkout
    /// session reference when the redirect included one.
    CheckoutSuccess { session_id: Option<String> },
    /// Returned from the customer portal (plan changes, cancellation).
    PortalReturn,
}

impl CheckoutSignal {
    /// Extracts the signal from a location, if present.
    pub fn from_location(location: &str) -> Option<CheckoutSignal> {
        let url = Url::parse(location).ok()?;
        let mut checkout_success = false;
        let mut portal_return = false;
        let mut session_id = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                CHECKOUT_PARAM if value == "success" => checkout_success = true,
                PORTAL_PARAM if value == "return" => portal_return = true,
                SESSION_ID_PARAM => session_id = Some(value.into_owned()),
                _ => {}
            }
        }

        if checkout_success {
            Some(CheckoutSignal::CheckoutSuccess { session_id })
        } else if portal_return {
            Some(CheckoutSignal::PortalReturn)
        } else {
            None
        }
    }

    /// Removes the signal parameters from a location, preserving everything
    /// else. Locations that do not parse as URLs are returned unchanged.
    pub fn strip_from(location: &str) -> String {
        let mut url = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => return location.to_string(),
        };

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| {
                key != CHECKOUT_PARAM && key != PORTAL_PARAM && key != SESSION_ID_PARAM
            })
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        if retained.is_empty() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &retained {
                pairs.append_pair(key, value);
            }
        }
        url.to_string()
    }
}

/// Shared view of the client's current location.
pub struct ClientLocation {
    current: RwLock<String>,
}

impl ClientLocation {
    pub fn new(initial: &str) -> Self {
        Self {
            current: RwLock::new(initial.to_string()),
        }
    }

    /// Current location value.
    pub fn get(&self) -> String {
        let guard = match self.current.read() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Location lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    /// Replaces the location, e.g. on navigation.
    pub fn set(&self, location: &str) {
        let mut guard = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Location lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = location.to_string();
    }

    /// Reads the checkout-return signal without consuming it.
    pub fn checkout_signal(&self) -> Option<CheckoutSignal> {
        CheckoutSignal::from_location(&self.get())
    }

    /// Strips the one-time signal parameters and returns the cleaned
    /// location. Idempotent: a location without the signal is unchanged.
    pub fn strip_checkout_signal(&self) -> String {
        let mut guard = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Location lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let cleaned = CheckoutSignal::strip_from(&guard);
        *guard = cleaned.clone();
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_success_signal_with_session_id() {
        let signal = CheckoutSignal::from_location(
            "https://app.papersync.app/settings/billing?checkout=success&session_id=cs_123",
        );
        assert_eq!(
            signal,
            Some(CheckoutSignal::CheckoutSuccess {
                session_id: Some("cs_123".to_string())
            })
        );
    }

    #[test]
    fn test_checkout_success_signal_without_session_id() {
        let signal =
            CheckoutSignal::from_location("https://app.papersync.app/billing?checkout=success");
        assert_eq!(
            signal,
            Some(CheckoutSignal::CheckoutSuccess { session_id: None })
        );
    }

    #[test]
    fn test_portal_return_signal() {
        let signal =
            CheckoutSignal::from_location("https://app.papersync.app/billing?portal=return");
        assert_eq!(signal, Some(CheckoutSignal::PortalReturn));
    }

    #[test]
    fn test_no_signal_on_plain_location() {
        assert_eq!(
            CheckoutSignal::from_location("https://app.papersync.app/billing?tab=invoices"),
            None
        );
    }

    #[test]
    fn test_checkout_param_with_other_value_is_not_a_signal() {
        assert_eq!(
            CheckoutSignal::from_location("https://app.papersync.app/billing?checkout=cancelled"),
            None
        );
    }

    #[test]
    fn test_strip_removes_only_signal_params() {
        let cleaned = CheckoutSignal::strip_from(
            "https://app.papersync.app/billing?tab=plans&checkout=success&session_id=cs_9",
        );
        assert_eq!(cleaned, "https://app.papersync.app/billing?tab=plans");
    }

    #[test]
    fn test_strip_drops_empty_query_entirely() {
        let cleaned =
            CheckoutSignal::strip_from("https://app.papersync.app/billing?checkout=success");
        assert_eq!(cleaned, "https://app.papersync.app/billing");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let once = CheckoutSignal::strip_from(
            "https://app.papersync.app/billing?checkout=success&tab=plans",
        );
        let twice = CheckoutSignal::strip_from(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_strip_tolerates_non_url_locations() {
        assert_eq!(CheckoutSignal::strip_from("not a url"), "not a url");
    }

    #[test]
    fn test_location_consumes_signal_once() {
        let location =
            ClientLocation::new("https://app.papersync.app/billing?checkout=success&tab=plans");
        assert!(location.checkout_signal().is_some());

        let cleaned = location.strip_checkout_signal();
        assert_eq!(cleaned, "https://app.papersync.app/billing?tab=plans");
        assert_eq!(location.checkout_signal(), None);
        assert_eq!(location.get(), cleaned);
    }

    #[test]
    fn test_location_set_replaces_value() {
        let location = ClientLocation::new("https://app.papersync.app/");
        location.set("https://app.papersync.app/library?portal=return");
        assert_eq!(location.checkout_signal(), Some(CheckoutSignal::PortalReturn));
    }
}
