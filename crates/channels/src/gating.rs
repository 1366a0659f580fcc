//! Admission policy: a sender is admitted iff `policy=open`, or
//! `policy=allowlist` and the sender matches an allowlist pattern, or
//! `policy=pairing` and the sender is already a paired device.

use conduit_config::AdmissionPolicy;

/// The manager's view of whether a sender may reach the bus, decided before
/// the adapter ever sees the inbound item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Denied outright (allowlist policy, no match).
    Denied,
    /// Unknown sender under `pairing` policy — the manager should issue a
    /// pairing-code prompt rather than admitting or denying silently.
    NeedsPairing,
}

/// Decide admission for `sender` under `policy`, given the channel's
/// allowlist and whether the sender is already a paired device.
pub fn admit(policy: AdmissionPolicy, sender: &str, allowlist: &[String], is_paired: bool) -> Admission {
    match policy {
        AdmissionPolicy::Open => Admission::Allowed,
        AdmissionPolicy::Allowlist => {
            if is_allowed(sender, allowlist) {
                Admission::Allowed
            } else {
                Admission::Denied
            }
        },
        AdmissionPolicy::Pairing => {
            if is_paired {
                Admission::Allowed
            } else {
                Admission::NeedsPairing
            }
        },
    }
}

/// Check if a peer is allowed to interact with the bot via the allowlist.
///
/// An empty allowlist means everyone is allowed. Entries are matched
/// case-insensitively against the peer ID. Supports exact match and
/// glob-style `*` wildcards.
pub fn is_allowed(peer_id: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let peer_lower = peer_id.to_lowercase();
    allowlist.iter().any(|pattern| {
        let pat = pattern.to_lowercase();
        if pat.contains('*') { glob_match(&pat, &peer_lower) } else { pat == peer_lower }
    })
}

/// Simple glob matching supporting `*` as a wildcard for any sequence of chars.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(idx) => {
                if i == 0 && idx != 0 {
                    return false;
                }
                pos += idx + part.len();
            },
            None => return false,
        }
    }
    if !parts.last().unwrap_or(&"").is_empty() { pos == text.len() } else { true }
}
