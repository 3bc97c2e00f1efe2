use crate::error::GatewayError;

/// Score awarded when the root pattern `/` matches the root request path.
const ROOT_SCORE: u32 = 100;
/// Per-segment score for an exact literal match.
const LITERAL_SCORE: u32 = 3;
/// Per-segment score for a parameter match (`:name` / `{name}`).
const PARAM_SCORE: u32 = 1;

/// A compiled URI pattern: slash-separated segments where each segment is a
/// literal, a named parameter, or the terminal `*` catch-all.
///
/// Compiled once at config load so that per-request matching walks plain
/// enum variants instead of re-parsing strings.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

impl PathPattern {
    /// Compile a pattern. The wildcard `*` is only valid as the last segment.
    pub fn compile(pattern: &str) -> Result<Self, GatewayError> {
        let raw = normalize_path(pattern);
        let mut segments = Vec::new();

        for (i, part) in split_segments(&raw).enumerate() {
            if i > 0 && segments.last() == Some(&Segment::Wildcard) {
                return Err(GatewayError::Config(format!(
                    "pattern {:?}: wildcard must be the last segment",
                    pattern
                )));
            }
            let seg = if part == "*" {
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
                Segment::Param(part[1..part.len() - 1].to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(seg);
        }

        Ok(Self { raw, segments })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Score a normalized request path against this pattern.
    ///
    /// Walks pattern and request segments in lock-step: a literal contributes
    /// 3, a parameter 1, and a final `*` swallows any remaining segments for
    /// 0. Root matching root is the special case scoring 100. `None` means
    /// the pattern does not match at all.
    pub fn score(&self, request_path: &str) -> Option<u32> {
        let req: Vec<&str> = split_segments(request_path).collect();

        if self.segments.is_empty() {
            // Root pattern: matches only the root request.
            return if req.is_empty() { Some(ROOT_SCORE) } else { None };
        }

        let mut score = 0u32;
        let mut ri = 0usize;

        for seg in &self.segments {
            match seg {
                Segment::Wildcard => return Some(score),
                Segment::Param(_) => {
                    if ri >= req.len() {
                        return None;
                    }
                    score += PARAM_SCORE;
                    ri += 1;
                }
                Segment::Literal(lit) => {
                    if ri >= req.len() || req[ri] != lit {
                        return None;
                    }
                    score += LITERAL_SCORE;
                    ri += 1;
                }
            }
        }

        // Pattern exhausted with request segments left over and no wildcard.
        if ri < req.len() {
            return None;
        }
        Some(score)
    }
}

/// Normalize a URI path: strip any `?`/`#` suffix, collapse duplicate
/// slashes, drop the trailing slash (except at root), and guarantee a
/// leading slash. Applied to both patterns at compile time and request
/// paths at match time so the two always compare in the same shape.
pub fn normalize_path(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];

    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    let mut prev_slash = true;
    for ch in path.chars() {
        if ch == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(ch);
            prev_slash = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn split_segments(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split('/').filter(|s| !s.is_empty())
}
