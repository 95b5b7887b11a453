//! The profile model: one named proxy plus its credential material.

use std::fs;

use serde::Deserialize;

use crate::error::CredentialError;

/// One named proxy profile: a listen endpoint, a destination endpoint,
/// and optional TLS credential material for either side.
///
/// Credential slots come in pairs: a filesystem path and a raw PEM blob.
/// [`Profile::resolve`] reads each path into its raw slot; a raw slot
/// that is already populated is never overwritten. Empty strings mean
/// absent throughout.
///
/// Identity is the profile name: two profiles describe the same logical
/// proxy iff their names match, and a same-name delivery with different
/// fields is a modification, not a replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Profile {
    #[serde(skip)]
    pub name: String,
    pub listen: String,
    pub proxy: String,
    /// Transport protocol; empty means `tcp`.
    pub protocol: String,
    pub listen_cert_path: String,
    pub listen_cert_raw: String,
    pub listen_private_path: String,
    pub listen_private_raw: String,
    pub listen_authority_path: String,
    pub listen_authority_raw: String,
    pub send_cert_path: String,
    pub send_cert_raw: String,
    pub send_private_path: String,
    pub send_private_raw: String,
    pub send_authority_path: String,
    pub send_authority_raw: String,
    /// Path of the config file that introduced this profile; empty for
    /// environment-defined profiles.
    #[serde(skip)]
    pub source: String,
}

impl Profile {
    /// The transport protocol, defaulting to `tcp` when unset.
    pub fn effective_protocol(&self) -> &str {
        if self.protocol.is_empty() {
            "tcp"
        } else {
            &self.protocol
        }
    }

    /// Whether the listen side of the connection differs between the two
    /// profiles. Symmetric: `p.listen_changed(q) == q.listen_changed(p)`.
    pub fn listen_changed(&self, other: &Profile) -> bool {
        self.listen != other.listen
            || self.protocol != other.protocol
            || self.listen_authority_raw != other.listen_authority_raw
            || self.listen_cert_raw != other.listen_cert_raw
            || self.listen_private_raw != other.listen_private_raw
    }

    /// Whether the destination side of the connection differs between the
    /// two profiles. Symmetric, like [`Profile::listen_changed`].
    pub fn destination_changed(&self, other: &Profile) -> bool {
        self.proxy != other.proxy
            || self.protocol != other.protocol
            || self.send_authority_raw != other.send_authority_raw
            || self.send_cert_raw != other.send_cert_raw
            || self.send_private_raw != other.send_private_raw
    }

    /// Merge step: copy each value field from `other` only where this
    /// profile's field is still empty. First non-empty wins.
    pub fn fill_missing(&mut self, other: &Profile) {
        fill(&mut self.listen, &other.listen);
        fill(&mut self.proxy, &other.proxy);
        fill(&mut self.protocol, &other.protocol);
        fill(&mut self.listen_cert_path, &other.listen_cert_path);
        fill(&mut self.listen_cert_raw, &other.listen_cert_raw);
        fill(&mut self.listen_private_path, &other.listen_private_path);
        fill(&mut self.listen_private_raw, &other.listen_private_raw);
        fill(&mut self.listen_authority_path, &other.listen_authority_path);
        fill(&mut self.listen_authority_raw, &other.listen_authority_raw);
        fill(&mut self.send_cert_path, &other.send_cert_path);
        fill(&mut self.send_cert_raw, &other.send_cert_raw);
        fill(&mut self.send_private_path, &other.send_private_path);
        fill(&mut self.send_private_raw, &other.send_private_raw);
        fill(&mut self.send_authority_path, &other.send_authority_path);
        fill(&mut self.send_authority_raw, &other.send_authority_raw);
    }

    /// Load any credential files that are still pending: for each slot
    /// pair, a set path with an empty raw slot is read from disk. Raw
    /// slots that already hold material are left untouched.
    pub fn resolve(&mut self) -> Result<(), CredentialError> {
        read_pending(&mut self.listen_cert_raw, &self.listen_cert_path)?;
        read_pending(&mut self.listen_private_raw, &self.listen_private_path)?;
        read_pending(&mut self.listen_authority_raw, &self.listen_authority_path)?;
        read_pending(&mut self.send_cert_raw, &self.send_cert_path)?;
        read_pending(&mut self.send_private_raw, &self.send_private_path)?;
        read_pending(&mut self.send_authority_raw, &self.send_authority_path)?;
        Ok(())
    }
}

fn fill(dst: &mut String, src: &str) {
    if dst.is_empty() {
        src.clone_into(dst);
    }
}

fn read_pending(raw: &mut String, path: &str) -> Result<(), CredentialError> {
    if raw.is_empty() && !path.is_empty() {
        *raw = fs::read_to_string(path).map_err(|source| CredentialError {
            path: path.to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Merge `incoming` profiles into `acc` by name. An unknown name is
/// appended; a known name has its empty fields filled from the incoming
/// profile, so the accumulator's values always win.
pub fn merge_profiles(mut acc: Vec<Profile>, incoming: Vec<Profile>) -> Vec<Profile> {
    for profile in incoming {
        match acc.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => existing.fill_missing(&profile),
            None => acc.push(profile),
        }
    }
    acc
}
