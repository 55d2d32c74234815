//! Loading external documents from disk or the network.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use concord_spec_parser::pointer::{navigate, split_fragment};
use concord_spec_parser::SchemaNode;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::error::ResolveError;

/// Context a relative pointer is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseContext {
    /// Directory of the document that holds the pointer.
    Dir(PathBuf),
    /// URL of the remote document that holds the pointer.
    Url(Url),
}

impl BaseContext {
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        BaseContext::Dir(path.into())
    }
}

impl fmt::Display for BaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseContext::Dir(dir) => write!(f, "{}", dir.display()),
            BaseContext::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Absolute location of an external document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Remote(Url),
}

impl Location {
    /// Base context for pointers found inside the document at this location.
    pub fn child_context(&self) -> BaseContext {
        match self {
            Location::File(path) => BaseContext::Dir(
                path.parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
            ),
            Location::Remote(url) => BaseContext::Url(url.clone()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// An external pointer made absolute: where to load from and which fragment
/// of the loaded document to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub location: Location,
    pub fragment: Option<String>,
}

impl Target {
    /// Cache key: the absolute location plus fragment.
    pub fn key(&self) -> String {
        match &self.fragment {
            Some(fragment) => format!("{}#{}", self.location, fragment),
            None => self.location.to_string(),
        }
    }
}

/// Make an external pointer absolute against `base`.
pub fn locate(pointer: &str, base: &BaseContext) -> Result<Target, ResolveError> {
    let (location, fragment) = split_fragment(pointer);
    let invalid = || ResolveError::InvalidLocation {
        pointer: pointer.to_string(),
        base: base.to_string(),
    };

    let location = if location.starts_with("http://") || location.starts_with("https://") {
        Location::Remote(Url::parse(location).map_err(|_| invalid())?)
    } else {
        match base {
            BaseContext::Dir(dir) => {
                let path = Path::new(location);
                if path.is_absolute() {
                    Location::File(normalize_path(path))
                } else {
                    Location::File(normalize_path(&dir.join(path)))
                }
            }
            BaseContext::Url(url) => Location::Remote(url.join(location).map_err(|_| invalid())?),
        }
    };

    Ok(Target {
        location,
        fragment: fragment.filter(|f| !f.is_empty()).map(str::to_string),
    })
}

/// Fold `.` and `..` components without touching the filesystem, so one
/// file has one key however the chain of relative pointers reached it.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` above the root stays at the root.
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A URL prefix served from a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub prefix: String,
    pub dir: PathBuf,
}

impl Mirror {
    pub fn new(prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            dir: dir.into(),
        }
    }

    /// Local path for `url`, if it falls under this mirror's prefix.
    fn local_path(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.prefix)?;
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() || rest.split('/').any(|segment| segment == "..") {
            return None;
        }
        Some(self.dir.join(rest))
    }
}

/// Load the document at `target` and return the requested fragment.
pub async fn load(
    client: Client,
    mirrors: Vec<Mirror>,
    target: Target,
) -> Result<SchemaNode, ResolveError> {
    let document = match &target.location {
        Location::File(path) => read_file(path).await?,
        Location::Remote(url) => load_remote(&client, &mirrors, url).await?,
    };

    match &target.fragment {
        None => Ok(document),
        Some(fragment) => navigate(&document, fragment).cloned().ok_or_else(|| {
            ResolveError::MissingFragment {
                location: target.location.to_string(),
                fragment: fragment.clone(),
            }
        }),
    }
}

async fn load_remote(
    client: &Client,
    mirrors: &[Mirror],
    url: &Url,
) -> Result<SchemaNode, ResolveError> {
    for mirror in mirrors {
        if let Some(path) = mirror.local_path(url.as_str()) {
            match read_file(&path).await {
                Ok(node) => {
                    tracing::debug!(url = %url, path = %path.display(), "resolved from local mirror");
                    return Ok(node);
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "mirror miss, falling back to network");
                }
            }
        }
    }
    fetch_remote(client, url).await
}

/// Fetch a remote document. Redirects are followed by the client's policy.
async fn fetch_remote(client: &Client, url: &Url) -> Result<SchemaNode, ResolveError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| ResolveError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ResolveError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(|e| ResolveError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    parse_body(&body, url.as_str())
}

async fn read_file(path: &Path) -> Result<SchemaNode, ResolveError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ResolveError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    parse_body(&content, &path.display().to_string())
}

fn parse_body(body: &str, location: &str) -> Result<SchemaNode, ResolveError> {
    serde_yaml::from_str::<Value>(body)
        .map(SchemaNode::from)
        .map_err(|e| ResolveError::Parse {
            location: location.to_string(),
            message: e.to_string(),
        })
}
