//! Authentication chain (spec.md §4.6): a linked-list override pattern
//! through the broker, plus the ban filter link. Ban/UserInfo record shapes
//! are grounded on `authenticator::core::{Ban, UserInfo}`.

use crate::transport::wire::LoginResponseCode;
use broker::{Broker, Scope};
use chrono::{DateTime, Utc};
use flux::logging::Logger;
use hashbrown::HashMap;
use std::sync::{Arc, RwLock};

pub struct LoginRequest {
    pub name: String,
    pub squad: String,
    pub machine_id: u32,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accept { name: String, squad: String },
    Reject { code: LoginResponseCode, custom_text: Option<String> },
}

/// Each link may decide the result locally or delegate to the previously
/// registered `Authenticate` implementation (spec.md §4.6).
pub trait Authenticate: Send + Sync {
    fn authenticate(&self, request: &LoginRequest) -> AuthOutcome;
}

/// The terminal default: accepts all logins with the name and squad taken
/// straight from the login packet.
pub struct DefaultAuthenticator;

impl Authenticate for DefaultAuthenticator {
    fn authenticate(&self, request: &LoginRequest) -> AuthOutcome {
        AuthOutcome::Accept { name: request.name.clone(), squad: request.squad.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct Ban {
    pub created: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
    pub reason: String,
    pub attempts: u32,
}

/// Sits in the auth chain: looks up the login's machine id and rejects with
/// a countdown if a non-expired ban exists, otherwise delegates downstream
/// (spec.md §4.6 "The ban filter").
pub struct BanFilter {
    bans: RwLock<HashMap<u32, Ban>>,
    previous: Arc<dyn Authenticate>,
    log: Logger,
}

impl BanFilter {
    pub fn new(previous: Arc<dyn Authenticate>, log: &Logger) -> BanFilter {
        BanFilter {
            bans: RwLock::new(HashMap::new()),
            previous,
            log: log.new(flux::logging::o!()),
        }
    }

    pub fn install_ban(&self, machine_id: u32, reason: impl Into<String>, expiry: Option<DateTime<Utc>>) {
        self.bans.write().unwrap().insert(
            machine_id,
            Ban { created: Utc::now(), expiry, reason: reason.into(), attempts: 0 },
        );
    }

    pub fn ban(&self, machine_id: u32) -> Option<Ban> {
        self.bans.read().unwrap().get(&machine_id).cloned()
    }
}

impl Authenticate for BanFilter {
    fn authenticate(&self, request: &LoginRequest) -> AuthOutcome {
        {
            let mut bans = self.bans.write().unwrap();
            if let Some(ban) = bans.get(&request.machine_id) {
                let expired = ban.expiry.map(|expiry| Utc::now() >= expiry).unwrap_or(false);

                if expired {
                    bans.remove(&request.machine_id);
                } else {
                    let ban = bans.get_mut(&request.machine_id).unwrap();
                    ban.attempts += 1;
                    let remaining = ban
                        .expiry
                        .map(|expiry| (expiry - Utc::now()).num_seconds().max(0))
                        .unwrap_or(0);

                    flux::logging::info!(
                        self.log,
                        "login rejected by ban filter";
                        "machine_id" => request.machine_id,
                        "attempts" => ban.attempts,
                        "remaining_secs" => remaining
                    );

                    return AuthOutcome::Reject {
                        code: LoginResponseCode::CustomText,
                        custom_text: Some(format!(
                            "You have been temporarily kicked for {}. {} seconds remaining.",
                            ban.reason, remaining
                        )),
                    };
                }
            }
        }

        self.previous.authenticate(request)
    }
}

/// Captures the currently registered `auth` interface (if any) and installs
/// `build` on top of it, returning the new implementation so the caller can
/// keep extending the chain. This is the concrete realization of spec.md
/// §4.6's "each auth module captures the previously registered `auth`
/// interface on load and registers itself as the new one".
pub fn extend_chain<F>(broker: &Broker, log: &Logger, build: F) -> Arc<dyn Authenticate>
where
    F: FnOnce(Arc<dyn Authenticate>) -> Arc<dyn Authenticate>,
{
    let previous = broker
        .get_interface::<dyn Authenticate>("auth", Scope::Global)
        .map(|handle| (*handle).clone())
        .unwrap_or_else(|| Arc::new(DefaultAuthenticator));

    let next = build(previous);
    broker.register_interface::<dyn Authenticate>("auth", Scope::Global, next.clone(), "zonecore::auth");
    flux::logging::debug!(log, "auth chain extended");
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn request(machine_id: u32) -> LoginRequest {
        LoginRequest { name: "Alice".into(), squad: String::new(), machine_id, password: String::new() }
    }

    #[test]
    fn default_authenticator_accepts_everything() {
        let outcome = DefaultAuthenticator.authenticate(&request(1));
        assert_eq!(outcome, AuthOutcome::Accept { name: "Alice".into(), squad: String::new() });
    }

    #[test]
    fn active_ban_rejects_with_custom_text() {
        let log = flux::logging::init(&flux::logging::LoggingConfig { terminal: false, ..Default::default() });
        let filter = BanFilter::new(Arc::new(DefaultAuthenticator), &log);
        filter.install_ban(0xDEADBEEF, "rule violation", Some(Utc::now() + ChronoDuration::seconds(60)));

        match filter.authenticate(&request(0xDEADBEEF)) {
            AuthOutcome::Reject { code, custom_text } => {
                assert_eq!(code, crate::transport::wire::LoginResponseCode::CustomText);
                assert!(custom_text.unwrap().contains("temporarily kicked for"));
            }
            other => panic!("expected reject, got {:?}", other),
        }
        assert_eq!(filter.ban(0xDEADBEEF).unwrap().attempts, 1);
    }

    #[test]
    fn expired_ban_is_removed_and_delegates_downstream() {
        let log = flux::logging::init(&flux::logging::LoggingConfig { terminal: false, ..Default::default() });
        let filter = BanFilter::new(Arc::new(DefaultAuthenticator), &log);
        filter.install_ban(42, "old offense", Some(Utc::now() - ChronoDuration::seconds(1)));

        let outcome = filter.authenticate(&request(42));
        assert_eq!(outcome, AuthOutcome::Accept { name: "Alice".into(), squad: String::new() });
        assert!(filter.ban(42).is_none());
    }

    #[test]
    fn unbanned_machine_delegates_downstream() {
        let log = flux::logging::init(&flux::logging::LoggingConfig { terminal: false, ..Default::default() });
        let filter = BanFilter::new(Arc::new(DefaultAuthenticator), &log);
        let outcome = filter.authenticate(&request(7));
        assert_eq!(outcome, AuthOutcome::Accept { name: "Alice".into(), squad: String::new() });
    }
}
