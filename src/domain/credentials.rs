//! Generated per-deployment server credentials.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

const PASSWORD_LENGTH: usize = 10;
const LOG_SECRET_MAX: u32 = 999_999;

/// Passwords and log secret handed to a freshly provisioned server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerCredentials {
    /// Password players need to join.
    pub server_password: String,
    /// Remote-console password.
    pub rcon_password: String,
    /// Spectator-feed password.
    pub tv_password: String,
    /// Secret the server attaches to its log stream.
    pub log_secret: u32,
}

/// Source of fresh [`ServerCredentials`].
///
/// Kept behind a trait so tests can pin the generated values.
pub trait CredentialGenerator: Send + Sync {
    /// Produces a new set of credentials.
    fn generate(&self) -> ServerCredentials;
}

/// Generator backed by the thread-local random number generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCredentials;

impl RandomCredentials {
    fn password<R: Rng>(rng: &mut R) -> String {
        rng.sample_iter(&Alphanumeric)
            .take(PASSWORD_LENGTH)
            .map(char::from)
            .collect()
    }
}

impl CredentialGenerator for RandomCredentials {
    fn generate(&self) -> ServerCredentials {
        let mut rng = rand::thread_rng();
        ServerCredentials {
            server_password: Self::password(&mut rng),
            rcon_password: Self::password(&mut rng),
            tv_password: Self::password(&mut rng),
            log_secret: rng.gen_range(1..=LOG_SECRET_MAX),
        }
    }
}
