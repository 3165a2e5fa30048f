use std::str::FromStr;

use chrono::{Duration, TimeZone, Utc};
use fork_scout::api::RateLimitSignal;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;

pub(crate) const LIMIT: &str = "x-ratelimit-limit";
pub(crate) const REMAINING: &str = "x-ratelimit-remaining";
pub(crate) const RESET: &str = "x-ratelimit-reset";
/// Longest `retry-after` we honor, larger values are clamped.
const MAX_RETRY_AFTER_SECS: u64 = 24 * 60 * 60;

pub(crate) fn read_header<T: FromStr>(headers: &HeaderMap<HeaderValue>, header: &str) -> Option<T> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Quota state of a response. A `retry-after` header wins over `x-ratelimit-reset` when it resets later.
pub(crate) fn rate_limit_signal(headers: &HeaderMap<HeaderValue>) -> RateLimitSignal {
    let reset = read_header::<i64>(headers, RESET).and_then(|reset| Utc.timestamp_opt(reset, 0).single());
    let retry_after = read_header::<u64>(headers, RETRY_AFTER.as_str()).and_then(|secs| {
        let secs = secs.min(MAX_RETRY_AFTER_SECS) as i64;
        Utc::now().checked_add_signed(Duration::seconds(secs))
    });
    let signal = RateLimitSignal::new(
        read_header(headers, LIMIT),
        read_header(headers, REMAINING),
        reset.max(retry_after),
    );
    debug!("Rate limit: {:?}", signal);
    signal
}

/// A 403 is a rate limit only with an exhausted quota or a `retry-after` header, otherwise it is an authorization
/// failure.
pub(crate) fn is_rate_limited(status: StatusCode, headers: &HeaderMap<HeaderValue>) -> bool {
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => {
            read_header::<u32>(headers, REMAINING) == Some(0) || headers.contains_key(RETRY_AFTER)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap<HeaderValue> {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn reads_quota_headers() {
        let reset = Utc::now().timestamp() + 120;
        let headers = headers(&[(LIMIT, "5000"), (REMAINING, "0"), (RESET, &reset.to_string())]);

        let signal = rate_limit_signal(&headers);

        assert_eq!(signal.limit, Some(5000));
        assert_eq!(signal.remaining, Some(0));
        assert_eq!(signal.reset.map(|reset| reset.timestamp()), Some(reset));
    }

    #[test]
    fn missing_or_garbled_headers_are_absent() {
        let headers = headers(&[(LIMIT, "many"), (REMAINING, " 7 ")]);

        let signal = rate_limit_signal(&headers);

        assert_eq!(signal, RateLimitSignal::new(None, Some(7), None));
    }

    #[test]
    fn retry_after_sets_reset() {
        let headers = headers(&[("retry-after", "30")]);

        let wait = rate_limit_signal(&headers).reset_in(Utc::now()).unwrap();

        assert!(wait.as_secs() >= 28 && wait.as_secs() <= 30, "{:?}", wait);
    }

    #[test]
    fn huge_retry_after_is_clamped() {
        let headers = headers(&[("retry-after", "99999999999999999")]);

        let wait = rate_limit_signal(&headers).reset_in(Utc::now()).unwrap();

        assert!(wait.as_secs() <= MAX_RETRY_AFTER_SECS, "{:?}", wait);
        assert!(wait.as_secs() >= MAX_RETRY_AFTER_SECS - 2, "{:?}", wait);
    }

    #[test]
    fn negative_or_overflowing_retry_after_is_ignored() {
        for value in ["-5", "999999999999999999999999"] {
            let signal = rate_limit_signal(&headers(&[("retry-after", value)]));

            assert_eq!(signal.reset, None, "{}", value);
        }
    }

    #[test]
    fn classifies_forbidden_responses() {
        assert!(is_rate_limited(StatusCode::FORBIDDEN, &headers(&[(REMAINING, "0")])));
        assert!(is_rate_limited(StatusCode::FORBIDDEN, &headers(&[("retry-after", "5")])));
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new()));
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, &headers(&[(REMAINING, "42")])));
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, &HeaderMap::new()));
        assert!(!is_rate_limited(StatusCode::NOT_FOUND, &headers(&[(REMAINING, "0")])));
    }
}
