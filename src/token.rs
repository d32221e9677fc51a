use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

static LAST_ISSUED_NANOS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Physical id handed to the parameter bridge. A new one on every synthesis
/// forces CloudFormation to send the bridge an Update, which re-reads the
/// parameter instead of reusing the previous deployment's value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeploymentToken(String);

impl DeploymentToken {
    pub fn fresh() -> Self {
        Self::at(Utc::now())
    }

    /// Token for `now`, bumped forward if needed so it is strictly later than
    /// every token this process has already issued.
    pub fn at(now: DateTime<Utc>) -> Self {
        let wanted = now.timestamp_nanos_opt().unwrap_or(i64::MAX - 1);
        let mut prev = LAST_ISSUED_NANOS.load(Ordering::SeqCst);
        let issued = loop {
            let next = wanted.max(prev.saturating_add(1));
            match LAST_ISSUED_NANOS.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break next,
                Err(actual) => prev = actual,
            }
        };
        let stamp = DateTime::<Utc>::from_timestamp_nanos(issued);
        Self(stamp.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_tokens_differ() {
        let a = DeploymentToken::fresh();
        let b = DeploymentToken::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn same_instant_still_yields_increasing_tokens() {
        let now = Utc::now();
        let a = DeploymentToken::at(now);
        let b = DeploymentToken::at(now);
        assert_ne!(a, b);
        let parse = |t: &DeploymentToken| DateTime::parse_from_rfc3339(t.as_str()).unwrap();
        assert!(parse(&b) > parse(&a));
    }

    #[test]
    fn clock_going_backwards_does_not_repeat() {
        let later = Utc::now() + chrono::Duration::seconds(60);
        let a = DeploymentToken::at(later);
        let b = DeploymentToken::at(Utc::now());
        assert_ne!(a, b);
    }

    #[test]
    fn token_is_rfc3339_utc() {
        let t = DeploymentToken::fresh();
        assert!(t.as_str().ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(t.as_str()).is_ok());
    }
}
