//! Parsing of container image references and git repository URLs.

use crate::SchemaError;
use regex::Regex;
use std::sync::OnceLock;

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

/// A container image reference broken into its parts.
///
/// `reference` is the fully-qualified form (`docker.io/library/nginx:1.25`)
/// used to key images inside an OCI image layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub host: String,
    pub path: String,
    pub tag: String,
    pub digest: String,
    /// `:tag` or `@sha256:...`; digest wins when both are present.
    pub tag_or_digest: String,
    pub reference: String,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidImageRef {
            reference: input.to_owned(),
            reason: reason.to_owned(),
        };
        if input.is_empty() || input.chars().any(char::is_whitespace) {
            return Err(invalid("empty or contains whitespace"));
        }

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => {
                let (algo, hex) = digest
                    .split_once(':')
                    .ok_or_else(|| invalid("digest must be <algorithm>:<hex>"))?;
                if algo.is_empty() || hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit())
                {
                    return Err(invalid("malformed digest"));
                }
                (rest, digest.to_owned())
            }
            None => (input, String::new()),
        };

        let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (&rest[..last_slash + i], rest[last_slash + i + 1..].to_owned()),
            None => (rest, String::new()),
        };
        if name.is_empty() || tag.contains(':') {
            return Err(invalid("missing repository name"));
        }
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository name must be lowercase"));
        }

        let (host, path) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_owned(), remainder.to_owned())
            }
            Some(_) => (DEFAULT_REGISTRY.to_owned(), name.to_owned()),
            None => (DEFAULT_REGISTRY.to_owned(), format!("library/{name}")),
        };
        if path.is_empty() || path.split('/').any(str::is_empty) {
            return Err(invalid("empty path component"));
        }

        let tag = if tag.is_empty() && digest.is_empty() {
            DEFAULT_TAG.to_owned()
        } else {
            tag
        };
        let tag_or_digest = if digest.is_empty() {
            format!(":{tag}")
        } else {
            format!("@{digest}")
        };
        let reference = if tag.is_empty() || digest.is_empty() {
            format!("{host}/{path}{tag_or_digest}")
        } else {
            format!("{host}/{path}:{tag}@{digest}")
        };

        Ok(Self {
            host,
            path,
            tag,
            digest,
            tag_or_digest,
            reference,
        })
    }

    /// The short form some older packages recorded for Docker Hub images.
    pub fn docker_hub_short_form(&self) -> Option<String> {
        (self.host == DEFAULT_REGISTRY).then(|| format!("{}{}", self.path, self.tag_or_digest))
    }
}

/// Classification of the `@ref` suffix of a git repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    /// No `@ref` was given.
    None,
    /// A full 40-character commit hash.
    Hash(String),
    /// `refs/tags/<name>`; a bare ref name is treated as a tag.
    Tag(String),
    /// `refs/heads/<name>`.
    Branch(String),
    /// Any other fully-qualified `refs/...` name.
    Other(String),
}

impl GitRef {
    pub fn classify(r: &str) -> Self {
        if r.is_empty() {
            Self::None
        } else if r.len() == 40 && r.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::Hash(r.to_owned())
        } else if let Some(tag) = r.strip_prefix("refs/tags/") {
            Self::Tag(tag.to_owned())
        } else if let Some(branch) = r.strip_prefix("refs/heads/") {
            Self::Branch(branch.to_owned())
        } else if r.starts_with("refs/") {
            Self::Other(r.to_owned())
        } else {
            Self::Tag(r.to_owned())
        }
    }

    /// True when the ref names immutable content (a tag or a commit).
    pub fn is_pinned(&self) -> bool {
        matches!(self, Self::Hash(_) | Self::Tag(_))
    }
}

fn git_url_regex() -> Option<&'static Regex> {
    static GIT_URL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    GIT_URL_RE
        .get_or_init(|| {
            Regex::new(
                r"^(?P<proto>[a-z]+://)(?P<hostPath>.+?)/(?P<repo>[\w\-.]+?)?(?P<git>\.git)?(/)?(?P<atRef>@(?P<force>\+)?(?P<ref>[/+\w\-.]+))?(?P<gitPath>/(?P<gitPathId>info/.*|git-upload-pack|git-receive-pack))?$",
            )
            .ok()
        })
        .as_ref()
}

/// Split a git URL into the URL without its `@ref` suffix and the raw ref.
pub fn split_git_ref(url: &str) -> Result<(String, String), SchemaError> {
    let invalid = || SchemaError::InvalidGitUrl(url.to_owned());
    let caps = git_url_regex()
        .and_then(|re| re.captures(url))
        .ok_or_else(invalid)?;
    let group = |name: &str| caps.name(name).map_or("", |m| m.as_str());
    let base = format!(
        "{}{}/{}{}",
        group("proto"),
        group("hostPath"),
        group("repo"),
        group("git")
    );
    Ok((base, group("ref").to_owned()))
}
