//! Resource read resolution: URI template matching and the built-in
//! file-scheme reader.

use std::path::{Component, Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use futures::future::BoxFuture;

use crate::model::{ErrorData, ReadResourceRequestParam, ReadResourceResult, ResourceContents};
use crate::service::{RequestContext, RoleServer};

/// An RFC 6570 Level 2 URI template: literal text interleaved with `{var}`
/// expressions, where `{+var}` may also match `/`.
#[derive(Debug, Clone)]
pub(crate) struct UriTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Variable { greedy: bool },
}

impl UriTemplate {
    pub(crate) fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = template;
        while !rest.is_empty() {
            match rest.find('{') {
                Some(0) => {
                    let end = rest
                        .find('}')
                        .ok_or_else(|| format!("unterminated expression in {template:?}"))?;
                    let mut name = &rest[1..end];
                    let greedy = name.starts_with('+');
                    if greedy {
                        name = &name[1..];
                    }
                    if name.is_empty()
                        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        return Err(format!("invalid variable {name:?} in {template:?}"));
                    }
                    segments.push(Segment::Variable { greedy });
                    rest = &rest[end + 1..];
                }
                Some(index) => {
                    segments.push(Segment::Literal(rest[..index].to_string()));
                    rest = &rest[index..];
                }
                None => {
                    segments.push(Segment::Literal(rest.to_string()));
                    rest = "";
                }
            }
        }
        Ok(UriTemplate { segments })
    }

    pub(crate) fn matches(&self, uri: &str) -> bool {
        match_segments(&self.segments, uri)
    }
}

fn match_segments(segments: &[Segment], uri: &str) -> bool {
    match segments.split_first() {
        None => uri.is_empty(),
        Some((Segment::Literal(literal), rest)) => uri
            .strip_prefix(literal.as_str())
            .is_some_and(|tail| match_segments(rest, tail)),
        Some((Segment::Variable { greedy }, rest)) => match rest.first() {
            None => *greedy || !uri.contains('/'),
            Some(Segment::Literal(literal)) => {
                let mut search_from = 0;
                while search_from <= uri.len() {
                    let Some(found) = uri[search_from..].find(literal.as_str()) else {
                        break;
                    };
                    let split = search_from + found;
                    let span = &uri[..split];
                    if (*greedy || !span.contains('/')) && match_segments(rest, &uri[split..]) {
                        return true;
                    }
                    let advance = uri[split..]
                        .chars()
                        .next()
                        .map(|c| c.len_utf8())
                        .unwrap_or(1);
                    search_from = split + advance;
                }
                false
            }
            // Adjacent variables: let this one take any prefix.
            Some(Segment::Variable { .. }) => (0..=uri.len()).any(|split| {
                uri.is_char_boundary(split)
                    && (*greedy || !uri[..split].contains('/'))
                    && match_segments(rest, &uri[split..])
            }),
        },
    }
}

/// A read handler serving `file://` URIs as paths relative to `root`.
///
/// The resolved path is normalized lexically and any traversal that would
/// escape `root` is answered with resource-not-found. This check is
/// mandatory: `file:///../private.txt` must never read outside the root.
pub fn file_resource_handler(
    root: impl Into<PathBuf>,
) -> impl Fn(
    RequestContext<RoleServer>,
    ReadResourceRequestParam,
) -> BoxFuture<'static, Result<ReadResourceResult, ErrorData>>
+ Send
+ Sync
+ Clone
+ 'static {
    let root = root.into();
    move |_context, params| {
        let root = root.clone();
        Box::pin(async move { read_file_resource(&root, &params.uri).await })
    }
}

async fn read_file_resource(root: &Path, uri: &str) -> Result<ReadResourceResult, ErrorData> {
    let relative = uri.strip_prefix("file://").ok_or_else(|| {
        ErrorData::invalid_params(format!("unsupported scheme in uri {uri}"), None)
    })?;
    let path = sandboxed_path(root, relative).ok_or_else(|| ErrorData::resource_not_found(uri))?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(ErrorData::resource_not_found(uri));
        }
        Err(error) => {
            return Err(ErrorData::internal_error(
                format!("reading {uri}: {error}"),
                None,
            ));
        }
    };
    let contents = match String::from_utf8(bytes) {
        Ok(text) => ResourceContents::Text {
            uri: uri.to_string(),
            mime_type: None,
            text,
        },
        Err(not_utf8) => ResourceContents::Blob {
            uri: uri.to_string(),
            mime_type: None,
            blob: BASE64_STANDARD.encode(not_utf8.into_bytes()),
        },
    };
    Ok(ReadResourceResult {
        contents: vec![contents],
    })
}

/// Resolve `relative` under `root`, returning `None` when normalization
/// pops above the root.
fn sandboxed_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
        }
    }
    Some(root.join(clean))
}
