//! Production [`Clock`] and [`IdGenerator`] implementations. Test code
//! uses `saga_testing::{test_clock, SequentialIdGenerator}` instead.

use chrono::{DateTime, Utc};
use rand::Rng;
use saga_core::environment::{Clock, IdGenerator};

/// Wall-clock time via [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

const BOOKING_ID_SUFFIX_LEN: usize = 9;
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// UUID v4 request ids; `TRV-<unix-ms>-<9 char alphanumeric>` booking ids,
/// matching `^TRV-\d+-[A-Z0-9]{9}$`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate_request_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn generate_booking_id(&self, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..BOOKING_ID_SUFFIX_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
                SUFFIX_ALPHABET[idx] as char
            })
            .collect();
        format!("TRV-{}-{suffix}", now.timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex_lite_check::matches_booking_id_shape;

    mod regex_lite_check {
        pub fn matches_booking_id_shape(s: &str) -> bool {
            let Some(rest) = s.strip_prefix("TRV-") else {
                return false;
            };
            let Some((timestamp, suffix)) = rest.split_once('-') else {
                return false;
            };
            !timestamp.is_empty()
                && timestamp.chars().all(|c| c.is_ascii_digit())
                && suffix.len() == 9
                && suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        }
    }

    #[test]
    fn booking_id_matches_expected_shape() {
        let id = UuidIdGenerator.generate_booking_id(Utc::now());
        assert!(matches_booking_id_shape(&id), "unexpected shape: {id}");
    }

    #[test]
    fn request_ids_are_unique() {
        let r#gen = UuidIdGenerator;
        assert_ne!(r#gen.generate_request_id(), r#gen.generate_request_id());
    }
}
