//! Profile definitions harvested from the process environment.
//!
//! Variables of the form `MTLSPROXY_PROFILE_<NAME>_<SUFFIX>` contribute
//! one field to the profile `<NAME>`. The credential suffixes fill the
//! raw PEM slots directly.

use crate::profile::Profile;

const PROFILE_PREFIX: &str = "MTLSPROXY_PROFILE_";

/// Recognized suffixes, longest first so that e.g. `_CERT_LISTEN` is
/// never misread as `_LISTEN` with a name ending in `_CERT`.
const SUFFIXES: &[&str] = &[
    "_AUTHORITY_LISTEN",
    "_AUTHORITY_SEND",
    "_PRIVATE_LISTEN",
    "_PRIVATE_SEND",
    "_CERT_LISTEN",
    "_CERT_SEND",
    "_PROTOCOL",
    "_LISTEN",
    "_PROXY",
];

/// Build the base profile set from the process environment.
pub fn profiles_from_env() -> Vec<Profile> {
    profiles_from_pairs(std::env::vars())
}

fn profiles_from_pairs(vars: impl Iterator<Item = (String, String)>) -> Vec<Profile> {
    let mut profiles: Vec<Profile> = Vec::new();

    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(PROFILE_PREFIX) else {
            continue;
        };
        let Some((name, suffix)) = split_suffix(rest) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let index = match profiles.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                profiles.push(Profile {
                    name: name.to_string(),
                    ..Profile::default()
                });
                profiles.len() - 1
            }
        };
        let profile = &mut profiles[index];

        match suffix {
            "_LISTEN" => profile.listen = value,
            "_PROXY" => profile.proxy = value,
            "_PROTOCOL" => profile.protocol = value,
            "_CERT_LISTEN" => profile.listen_cert_raw = value,
            "_CERT_SEND" => profile.send_cert_raw = value,
            "_PRIVATE_LISTEN" => profile.listen_private_raw = value,
            "_PRIVATE_SEND" => profile.send_private_raw = value,
            "_AUTHORITY_LISTEN" => profile.listen_authority_raw = value,
            "_AUTHORITY_SEND" => profile.send_authority_raw = value,
            _ => {}
        }
    }

    profiles
}

/// Split `NAME_SUFFIX` into name and recognized suffix, if any.
fn split_suffix(rest: &str) -> Option<(&str, &str)> {
    for suffix in SUFFIXES {
        if let Some(name) = rest.strip_suffix(suffix) {
            return Some((name, suffix));
        }
    }
    None
}
