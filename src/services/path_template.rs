use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use regex::Regex;

use super::matcher::normalize;

const ALLOWED_VARS: [&str; 4] = ["artist", "album", "title", "ext"];

#[derive(Debug, thiserror::Error)]
pub enum PathTemplateError {
    #[error("template must be relative, not start with '/'")]
    NotRelative,

    #[error("template must not contain '..'")]
    ContainsParentTraversal,

    #[error("illegal variables in template: {0}")]
    IllegalVariables(String),

    #[error("template must include {{ext}}")]
    MissingExt,

    #[error("failed to compile derived path regex: {0}")]
    RegexCompile(#[from] regex::Error),
}

fn var_token_pattern() -> Regex {
    Regex::new(r"\{([a-zA-Z0-9_]+)\}").unwrap()
}

pub fn validate_user_template(tmpl: &str) -> Result<(), PathTemplateError> {
    if tmpl.starts_with('/') {
        return Err(PathTemplateError::NotRelative);
    }
    if tmpl.contains("..") {
        return Err(PathTemplateError::ContainsParentTraversal);
    }

    let allowed: HashSet<&str> = ALLOWED_VARS.into_iter().collect();
    let found: HashSet<String> = var_token_pattern()
        .captures_iter(tmpl)
        .map(|c| c[1].to_string())
        .collect();

    let illegal: Vec<&String> = found.iter().filter(|v| !allowed.contains(v.as_str())).collect();
    if !illegal.is_empty() {
        let mut names: Vec<&str> = illegal.iter().map(|s| s.as_str()).collect();
        names.sort_unstable();
        return Err(PathTemplateError::IllegalVariables(names.join(", ")));
    }

    if !found.contains("ext") {
        return Err(PathTemplateError::MissingExt);
    }

    Ok(())
}

/// Renders the output template the extractor receives: each `{var}` substituted
/// with the caller-supplied values. The extractor's own placeholder syntax (e.g.
/// `%(artist)s`) is applied by the caller before or after this step as needed —
/// this function only fills in the four allowed variables.
pub fn render(tmpl: &str, artist: &str, album: &str, title: &str, ext: &str) -> Result<String, PathTemplateError> {
    validate_user_template(tmpl)?;

    let rendered = tmpl
        .replace("{artist}", artist)
        .replace("{album}", album)
        .replace("{title}", title)
        .replace("{ext}", ext);

    Ok(rendered)
}

/// Derives a regex over a POSIX-style relative path by a tokenise-escape-substitute
/// pipeline: placeholders are swapped for private tokens, the whole string is
/// regex-escaped, then tokens are swapped for named capture groups. This ordering
/// matters — escaping after substitution would corrupt any regex metacharacter that
/// happens to sit next to a variable.
pub fn to_path_regex(tmpl: &str) -> Result<Regex, PathTemplateError> {
    validate_user_template(tmpl)?;

    let mut occurrence = HashMap::new();
    let mut group_names = Vec::new();

    let tokenised = var_token_pattern().replace_all(tmpl, |caps: &regex::Captures| {
        let var = &caps[1];
        let count = occurrence.entry(var.to_string()).or_insert(0);
        let group_name = if *count == 0 {
            var.to_string()
        } else {
            format!("{var}_{count}")
        };
        *count += 1;
        group_names.push((group_name.clone(), var.to_string()));
        format!("\u{0}{group_name}\u{0}")
    });

    let escaped = regex::escape(&tokenised);

    let mut pattern = escaped;
    for (group_name, var) in &group_names {
        let placeholder = regex::escape(&format!("\u{0}{group_name}\u{0}"));
        let capture = match var.as_str() {
            "ext" => format!("(?P<{group_name}>[^/]+)"),
            _ => format!("(?P<{group_name}>.+?)"),
        };
        pattern = pattern.replacen(&placeholder, &capture, 1);
    }

    let anchored = format!("^{pattern}$");
    Ok(Regex::new(&anchored)?)
}

/// Matches a relative, `/`-separated path against the template's derived regex and
/// returns the decoded variable values, merging duplicate-variable occurrences.
pub fn match_path<'a>(regex: &Regex, relative_path: &'a str) -> Option<HashMap<&'static str, String>> {
    let caps = regex.captures(relative_path)?;
    let mut out = HashMap::new();

    for var in ALLOWED_VARS {
        if let Some(m) = caps.name(var) {
            out.insert(var, m.as_str().to_string());
            continue;
        }
        // Look for suffixed duplicates (artist_1, artist_2, ...) if the primary name missed.
        for name in regex.capture_names().flatten() {
            if name.starts_with(&format!("{var}_")) {
                if let Some(m) = caps.name(name) {
                    out.entry(var).or_insert_with(|| m.as_str().to_string());
                }
            }
        }
    }

    Some(out)
}

/// Recursively walks the music root and returns every regular file found, soft-error
/// collecting: a single unreadable subtree is logged and skipped rather than aborting
/// the whole scan. Reconciliation only needs this set for existence checks against a
/// row's stored `local_path`; it deliberately does not filter by the path regex, since
/// a file relocated by hand should still count as present at its stored path.
pub fn scan_music_root(root: &Path) -> HashSet<PathBuf> {
    let mut found = HashSet::new();

    for entry in walkdir::WalkDir::new(root).into_iter() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                found.insert(entry.path().to_path_buf());
            }
            Ok(_) => {}
            Err(err) => log::warn!("skipping unreadable path while scanning the music root: {err}"),
        }
    }

    found
}

/// Indexes every disk file that matches the template into its normalised
/// `(artist, title)` pair. This is how a file placed on disk by hand, or
/// migrated from another library, is recognised for a track the daemon has
/// never downloaded itself — `reconcile_against_disk` otherwise only ever
/// checks a row's own recorded `local_path`, which a never-downloaded row
/// doesn't have yet. Returns an empty index (logging a warning) if the
/// template fails to compile, which should not happen for one that already
/// passed `validate_user_template`.
pub fn index_disk_by_identity(root: &Path, template: &str) -> HashMap<(String, String), PathBuf> {
    let mut index = HashMap::new();

    let regex = match to_path_regex(template) {
        Ok(regex) => regex,
        Err(err) => {
            log::warn!("could not compile path template while indexing the music root: {err}");
            return index;
        }
    };

    for entry in walkdir::WalkDir::new(root).into_iter() {
        let entry = match entry {
            Ok(entry) if entry.file_type().is_file() => entry,
            Ok(_) => continue,
            Err(err) => {
                log::warn!("skipping unreadable path while indexing the music root: {err}");
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(root) else { continue };
        let Some(relative) = relative.to_str() else { continue };
        let relative = relative.replace(std::path::MAIN_SEPARATOR, "/");

        if let Some(vars) = match_path(&regex, &relative) {
            if let (Some(artist), Some(title)) = (vars.get("artist"), vars.get("title")) {
                let key = (normalize(artist), normalize(title));
                index.entry(key).or_insert_with(|| entry.path().to_path_buf());
            }
        }
    }

    index
}
