//! Content-hash revisioning (cache busting).
//!
//! [`revise`] takes the artifacts selected by the `revision` stage and returns
//! them renamed and rewritten:
//!
//! ```text
//! index.html   <script src="js/app.js">      index.html   <script src="js/app.3f2a9c1e.js">
//! js/app.js                              ->   js/app.3f2a9c1e.js
//! css/a.css    url(../img/logo.png)           css/a.c01d77e4.css  url(../img/logo.9e0b1a22.png)
//! img/logo.png                                img/logo.9e0b1a22.png
//! ```
//!
//! # Fingerprints
//!
//! An artifact's fingerprint covers its own content and, transitively, the
//! fingerprints of everything it references. Before hashing, every resolvable
//! reference in the content is replaced by the *base path* of its target (the
//! path with any fingerprint segment removed). This makes the fingerprint a
//! function of the unrevisioned tree: revisioning an already revisioned tree
//! produces the same names and no orphans.
//!
//! References form a graph that may contain cycles (two stylesheets importing
//! each other, a page linking to itself). The graph is collapsed into strongly
//! connected components; a component hashes the sorted content hashes of its
//! members plus the hashes of the components it points to. Traversal order
//! never affects the result.
//!
//! # Names
//!
//! Protected artifacts (matched by `dont_rename`, by default markup and data
//! entry points) keep their names but still have their references rewritten.
//! In [`RevisionMode::Query`] no artifact is renamed; references gain a
//! `?v=<fingerprint>` parameter instead.
//!
//! # Rewriting
//!
//! A reference is rewritten only when it resolves to a renamed artifact and
//! the token's extension equals the new name's extension, so a script
//! reference can never be turned into a reference to something else that
//! shares its stem. Only the file-name portion of a token changes; its
//! directory style, query, and fragment are preserved. Local references that
//! resolve to nothing are left untouched and reported in
//! [`Revision::unresolved`].

pub mod naming;
pub mod references;

use naming::{extension_of, file_name, parse_name};
use references::{ContentKind, Token, resolve, split_suffix};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionMode {
    /// Embed the fingerprint in the file name.
    #[default]
    Rename,
    /// Keep names, append a query parameter to references.
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RevisionOptions {
    /// Extensions (`.html`) or file names (`sw.js`) that are never renamed.
    pub dont_rename: Vec<String>,
    /// Number of hex digits kept from the SHA-256 digest.
    pub hash_length: usize,
    pub mode: RevisionMode,
    pub query_param: String,
}

impl Default for RevisionOptions {
    fn default() -> Self {
        Self {
            dont_rename: [".html", ".xml", ".json", ".txt"]
                .into_iter()
                .map(String::from)
                .collect(),
            hash_length: 8,
            mode: RevisionMode::Rename,
            query_param: "v".to_string(),
        }
    }
}

impl RevisionOptions {
    pub fn is_protected(&self, path: &str) -> bool {
        let name = file_name(path).to_ascii_lowercase();
        self.dont_rename.iter().any(|rule| {
            let rule = rule.to_ascii_lowercase();
            if rule.starts_with('.') {
                name.ends_with(&rule)
            } else {
                name == rule
            }
        })
    }
}

/// A file of the working tree, addressed by its slash-separated path
/// relative to the tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: String,
    pub content: Vec<u8>,
    /// Path at discovery, before any rename.
    pub original_path: String,
}

impl Artifact {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let path = path.into();
        Self {
            original_path: path.clone(),
            path,
            content: content.into(),
        }
    }

    fn kind(&self) -> Option<ContentKind> {
        ContentKind::for_extension(&extension_of(&self.path))
    }

    /// Content as text, for file types that can hold references.
    pub fn text(&self) -> Option<(&str, ContentKind)> {
        let kind = self.kind()?;
        std::str::from_utf8(&self.content).ok().map(|t| (t, kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub original_path: String,
    pub new_path: String,
    pub fingerprint: String,
}

/// A local reference that matched no artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    /// Artifact containing the reference.
    pub file: String,
    /// The reference as written.
    pub reference: String,
    /// Root-relative path it resolved to.
    pub resolved: String,
}

/// Outcome of [`revise`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revision {
    /// Every input artifact under its final path, with rewritten content.
    pub artifacts: Vec<Artifact>,
    /// One record per renameable artifact, renamed or not.
    pub records: Vec<RevisionRecord>,
    /// Original paths no longer present in the output.
    pub orphans: Vec<String>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl Revision {
    pub fn renamed(&self) -> impl Iterator<Item = &RevisionRecord> {
        self.records
            .iter()
            .filter(|r| r.original_path != r.new_path)
    }
}

struct Link {
    token: Token,
    target: Option<usize>,
    suffix_start: usize,
}

/// Fingerprint, rename, and rewrite a set of artifacts.
pub fn revise(mut artifacts: Vec<Artifact>, options: &RevisionOptions) -> Revision {
    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    let index: HashMap<&str, usize> = artifacts
        .iter()
        .enumerate()
        .map(|(i, a)| (a.path.as_str(), i))
        .collect();

    let mut unresolved = Vec::new();
    let links: Vec<Vec<Link>> = artifacts
        .iter()
        .map(|a| link_artifact(a, &index, &mut unresolved))
        .collect();

    let protected: Vec<bool> = artifacts
        .iter()
        .map(|a| options.is_protected(&a.path))
        .collect();
    let bases: Vec<String> = artifacts
        .iter()
        .zip(&protected)
        .map(|(a, &p)| {
            if p {
                a.path.clone()
            } else {
                parse_name(&a.path, options.hash_length).base_path()
            }
        })
        .collect();

    let own: Vec<[u8; 32]> = artifacts
        .iter()
        .zip(&links)
        .map(|(a, l)| content_hash(a, l, &bases, &options.query_param))
        .collect();
    let fingerprints = fingerprints(&own, &links, options.hash_length);

    let mut records = Vec::new();
    for (i, artifact) in artifacts.iter().enumerate() {
        if protected[i] {
            continue;
        }
        let new_path = match options.mode {
            RevisionMode::Rename => {
                parse_name(&artifact.path, options.hash_length).revisioned(&fingerprints[i])
            }
            RevisionMode::Query => artifact.path.clone(),
        };
        records.push(RevisionRecord {
            original_path: artifact.path.clone(),
            new_path,
            fingerprint: fingerprints[i].clone(),
        });
    }

    let rewritten = rewrite_references(&artifacts, &records, options);
    let new_paths: HashMap<&str, &str> = records
        .iter()
        .map(|r| (r.original_path.as_str(), r.new_path.as_str()))
        .collect();

    let mut seen = HashSet::new();
    let mut output = Vec::with_capacity(rewritten.len());
    for mut artifact in rewritten {
        if let Some(new_path) = new_paths.get(artifact.path.as_str()) {
            artifact.path = new_path.to_string();
        }
        // Two inputs can collapse onto one name (a stale revisioned copy
        // next to its source); keep the first.
        if seen.insert(artifact.path.clone()) {
            output.push(artifact);
        } else {
            tracing::warn!(
                path = %artifact.path,
                original = %artifact.original_path,
                "revisioned name already taken, dropping duplicate"
            );
        }
    }

    let orphans = artifacts
        .iter()
        .map(|a| a.path.as_str())
        .filter(|p| !seen.contains(*p))
        .map(String::from)
        .collect();

    Revision {
        artifacts: output,
        records,
        orphans,
        unresolved,
    }
}

fn link_artifact(
    artifact: &Artifact,
    index: &HashMap<&str, usize>,
    unresolved: &mut Vec<UnresolvedReference>,
) -> Vec<Link> {
    let Some((text, kind)) = artifact.text() else {
        return Vec::new();
    };
    references::scan(text, kind)
        .into_iter()
        .filter_map(|token| {
            let trimmed = token.value.trim();
            let (target, _) = resolve(&artifact.path, trimmed)?;
            let found = index.get(target.as_str()).copied();
            if found.is_none() && !token.literal {
                unresolved.push(UnresolvedReference {
                    file: artifact.path.clone(),
                    reference: token.value.clone(),
                    resolved: target,
                });
            }
            let suffix_start = split_suffix(trimmed).0.len();
            Some(Link {
                target: found,
                suffix_start,
                token,
            })
        })
        .collect()
}

/// Hash of an artifact's content with references canonicalized to base paths.
fn content_hash(artifact: &Artifact, links: &[Link], bases: &[String], param: &str) -> [u8; 32] {
    let Some((text, _)) = artifact.text() else {
        return sha256(&artifact.content);
    };
    let mut canonical = String::with_capacity(text.len());
    let mut last = 0;
    for link in links {
        let Some(target) = link.target else {
            continue;
        };
        let suffix = &link.token.value.trim()[link.suffix_start..];
        canonical.push_str(&text[last..link.token.span.start]);
        canonical.push('/');
        canonical.push_str(&bases[target]);
        canonical.push_str(&set_query_param(suffix, param, None));
        last = link.token.span.end;
    }
    canonical.push_str(&text[last..]);
    sha256(canonical.as_bytes())
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// Combine content hashes along the reference graph.
fn fingerprints(own: &[[u8; 32]], links: &[Vec<Link>], hash_length: usize) -> Vec<String> {
    let edges: Vec<BTreeSet<usize>> = links
        .iter()
        .map(|l| l.iter().filter_map(|link| link.target).collect())
        .collect();
    let components = strongly_connected(&edges);

    let mut component_of = vec![0; own.len()];
    for (c, members) in components.iter().enumerate() {
        for &m in members {
            component_of[m] = c;
        }
    }

    // Components come out successors-first, so dependencies are ready.
    let mut component_hash: Vec<[u8; 32]> = Vec::with_capacity(components.len());
    for (c, members) in components.iter().enumerate() {
        let mut hasher = Sha256::new();
        let member_hashes: BTreeSet<[u8; 32]> = members.iter().map(|&m| own[m]).collect();
        for h in &member_hashes {
            hasher.update(h);
        }
        let successors: BTreeSet<[u8; 32]> = members
            .iter()
            .flat_map(|&m| edges[m].iter())
            .map(|&t| component_of[t])
            .filter(|&t| t != c)
            .map(|t| component_hash[t])
            .collect();
        hasher.update(b"\0deps");
        for h in &successors {
            hasher.update(h);
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        component_hash.push(digest);
    }

    own.iter()
        .enumerate()
        .map(|(i, h)| {
            let mut hasher = Sha256::new();
            hasher.update(h);
            hasher.update(component_hash[component_of[i]]);
            let hex = format!("{:x}", hasher.finalize());
            hex[..hash_length.min(hex.len())].to_string()
        })
        .collect()
}

/// Tarjan's algorithm. Components are returned in reverse topological order.
fn strongly_connected(edges: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    struct State<'a> {
        edges: &'a [BTreeSet<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    fn visit(s: &mut State<'_>, v: usize) {
        s.index[v] = Some(s.next);
        s.low[v] = s.next;
        s.next += 1;
        s.stack.push(v);
        s.on_stack[v] = true;
        for &w in s.edges[v].iter() {
            match s.index[w] {
                None => {
                    visit(s, w);
                    s.low[v] = s.low[v].min(s.low[w]);
                }
                Some(wi) if s.on_stack[w] => s.low[v] = s.low[v].min(wi),
                Some(_) => {}
            }
        }
        if Some(s.low[v]) == s.index[v] {
            let mut component = Vec::new();
            while let Some(w) = s.stack.pop() {
                s.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            s.components.push(component);
        }
    }

    let n = edges.len();
    let mut state = State {
        edges,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if state.index[v].is_none() {
            visit(&mut state, v);
        }
    }
    state.components
}

/// Rewrite references to renamed artifacts. Paths are left as they are.
pub fn rewrite_references(
    artifacts: &[Artifact],
    records: &[RevisionRecord],
    options: &RevisionOptions,
) -> Vec<Artifact> {
    let by_original: HashMap<&str, &RevisionRecord> = records
        .iter()
        .map(|r| (r.original_path.as_str(), r))
        .collect();
    let existing: HashSet<&str> = artifacts.iter().map(|a| a.path.as_str()).collect();

    artifacts
        .iter()
        .map(|artifact| {
            let Some((text, kind)) = artifact.text() else {
                return artifact.clone();
            };
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for token in references::scan(text, kind) {
                let Some(replacement) = replacement_for(
                    &artifact.path,
                    &token,
                    &by_original,
                    &existing,
                    options,
                ) else {
                    continue;
                };
                out.push_str(&text[last..token.span.start]);
                out.push_str(&replacement);
                last = token.span.end;
            }
            out.push_str(&text[last..]);
            Artifact {
                path: artifact.path.clone(),
                content: out.into_bytes(),
                original_path: artifact.original_path.clone(),
            }
        })
        .collect()
}

fn replacement_for(
    from: &str,
    token: &Token,
    records: &HashMap<&str, &RevisionRecord>,
    existing: &HashSet<&str>,
    options: &RevisionOptions,
) -> Option<String> {
    let value = token.value.trim();
    let (target, suffix) = resolve(from, value)?;
    let (path, _) = split_suffix(value);
    let Some(record) = records.get(target.as_str()) else {
        // A placeholder to an existing, unrenamed file just loses its marker.
        return (token.placeholder && existing.contains(target.as_str()))
            .then(|| value.to_string());
    };
    // Extensions are compared with any fingerprint segment removed, so an
    // extensionless `LICENSE` still matches `LICENSE.3f2a9c1e`.
    let extension = |p: &str| {
        parse_name(p, options.hash_length)
            .extension
            .to_ascii_lowercase()
    };
    let original = extension(&record.original_path);
    if extension(path) != original || extension(&record.new_path) != original {
        tracing::debug!(
            reference = value,
            new_path = %record.new_path,
            "extension mismatch, reference left as is"
        );
        return token.placeholder.then(|| value.to_string());
    }
    let rewritten = match options.mode {
        RevisionMode::Rename => {
            let dir_len = path.rfind('/').map_or(0, |i| i + 1);
            format!(
                "{}{}{}",
                &path[..dir_len],
                file_name(&record.new_path),
                suffix
            )
        }
        RevisionMode::Query => format!(
            "{}{}",
            path,
            set_query_param(suffix, &options.query_param, Some(&record.fingerprint))
        ),
    };
    if rewritten == token.value && !token.placeholder {
        return None;
    }
    Some(rewritten)
}

/// Remove `param` from a `?query#fragment` suffix, then append `param=value`
/// when given.
fn set_query_param(suffix: &str, param: &str, value: Option<&str>) -> String {
    let (query, fragment) = match suffix.find('#') {
        Some(i) => suffix.split_at(i),
        None => (suffix, ""),
    };
    let mut pairs: Vec<String> = query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some(param))
        .map(String::from)
        .collect();
    if let Some(value) = value {
        pairs.push(format!("{param}={value}"));
    }
    if pairs.is_empty() {
        fragment.to_string()
    } else {
        format!("?{}{}", pairs.join("&"), fragment)
    }
}
