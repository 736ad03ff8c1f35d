use dashmap::DashMap;
use rand::Rng;
use uuid::Uuid;

const CODE_DIGITS: u32 = 4;

/// Arrival verification codes for home-service jobs. The code is a
/// social-trust signal read aloud at the door, not a security boundary;
/// codes are process-ephemeral and single-use.
pub struct HandshakeVerifier {
    codes: DashMap<Uuid, CodeEntry>,
    max_attempts: u32,
}

#[derive(Debug)]
struct CodeEntry {
    code: String,
    failed_attempts: u32,
}

impl HandshakeVerifier {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            codes: DashMap::new(),
            max_attempts,
        }
    }

    /// Generates and stores a fresh code for the booking, replacing any
    /// previous one. Called once, when a home-service booking is accepted.
    pub fn generate(&self, booking_id: Uuid) -> String {
        let bound = 10u32.pow(CODE_DIGITS);
        let code = format!(
            "{:0width$}",
            rand::thread_rng().gen_range(0..bound),
            width = CODE_DIGITS as usize
        );

        self.codes.insert(
            booking_id,
            CodeEntry {
                code: code.clone(),
                failed_attempts: 0,
            },
        );
        code
    }

    /// Compares the supplied code against the booking's stored code. Failed
    /// attempts are counted; once the cap is reached every further attempt
    /// fails and the owner has to resolve the job out of band.
    pub fn validate(&self, booking_id: Uuid, supplied: &str) -> bool {
        let Some(mut entry) = self.codes.get_mut(&booking_id) else {
            return false;
        };

        if entry.failed_attempts >= self.max_attempts {
            tracing::warn!(booking_id = %booking_id, "verification attempts exhausted");
            return false;
        }

        if entry.code == supplied {
            true
        } else {
            entry.failed_attempts += 1;
            tracing::warn!(
                booking_id = %booking_id,
                failed_attempts = entry.failed_attempts,
                "verification code mismatch"
            );
            false
        }
    }

    /// Invalidates the code on completion so it can never be replayed.
    pub fn consume(&self, booking_id: Uuid) {
        self.codes.remove(&booking_id);
    }

    /// Current code for the booking, if one is live.
    pub fn peek(&self, booking_id: Uuid) -> Option<String> {
        self.codes.get(&booking_id).map(|entry| entry.code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_validates() {
        let verifier = HandshakeVerifier::new(10);
        let booking = Uuid::new_v4();

        let code = verifier.generate(booking);
        assert_eq!(code.len(), 4);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(verifier.validate(booking, &code));
    }

    #[test]
    fn code_is_scoped_to_its_booking() {
        let verifier = HandshakeVerifier::new(10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let code_a = verifier.generate(a);

        assert!(!verifier.validate(b, &code_a));
        assert!(verifier.validate(a, &code_a));
    }

    #[test]
    fn consumed_code_no_longer_validates() {
        let verifier = HandshakeVerifier::new(10);
        let booking = Uuid::new_v4();

        let code = verifier.generate(booking);
        verifier.consume(booking);
        assert!(!verifier.validate(booking, &code));
    }

    #[test]
    fn attempts_are_capped() {
        let verifier = HandshakeVerifier::new(3);
        let booking = Uuid::new_v4();

        let code = verifier.generate(booking);
        for _ in 0..3 {
            assert!(!verifier.validate(booking, "bad"));
        }
        assert!(!verifier.validate(booking, &code));
    }

    #[test]
    fn wrong_code_does_not_consume() {
        let verifier = HandshakeVerifier::new(10);
        let booking = Uuid::new_v4();

        let code = verifier.generate(booking);
        let wrong = if code == "1111" { "2222" } else { "1111" };

        assert!(!verifier.validate(booking, wrong));
        assert!(verifier.validate(booking, &code));
    }
}
