use crate::RemoteError;
use std::fmt;

pub const OCI_SCHEME: &str = "oci://";

/// A package location in an OCI registry: `oci://<registry>/<repository>[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    pub registry: String,
    pub repository: String,
    /// Tag or `sha256:<hex>` digest; `latest` when omitted.
    pub reference: String,
}

impl OciReference {
    pub fn parse(input: &str) -> Result<Self, RemoteError> {
        let invalid = |reason: &str| RemoteError::InvalidReference {
            reference: input.to_owned(),
            reason: reason.to_owned(),
        };
        let rest = input
            .strip_prefix(OCI_SCHEME)
            .ok_or_else(|| invalid("must start with oci://"))?;
        let (registry, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing repository"))?;
        if registry.is_empty() {
            return Err(invalid("missing registry"));
        }

        let (repository, reference) = if let Some((repo, digest)) = path.split_once('@') {
            (repo, digest.to_owned())
        } else {
            let last_slash = path.rfind('/').map_or(0, |i| i + 1);
            match path[last_slash..].rfind(':') {
                Some(i) => (
                    &path[..last_slash + i],
                    path[last_slash + i + 1..].to_owned(),
                ),
                None => (path, "latest".to_owned()),
            }
        };
        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository path component"));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository must be lowercase"));
        }
        if reference.is_empty() {
            return Err(invalid("empty tag or digest"));
        }
        if reference.contains(':') && bale_schema::Sha256Digest::from_oci(&reference).is_none() {
            return Err(invalid("only sha256 digests are supported"));
        }

        Ok(Self {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            reference,
        })
    }

    pub fn is_oci(input: &str) -> bool {
        input.starts_with(OCI_SCHEME)
    }
}

impl fmt::Display for OciReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.reference.starts_with("sha256:") {
            '@'
        } else {
            ':'
        };
        write!(
            f,
            "{OCI_SCHEME}{}/{}{sep}{}",
            self.registry, self.repository, self.reference
        )
    }
}
